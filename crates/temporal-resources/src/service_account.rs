//! ServiceAccount shared by the server pods

use std::sync::Arc;

use k8s_openapi::api::core::v1::ServiceAccount;
use kube::api::DynamicObject;
use kube::discovery::ApiResource;

use temporal_common::kube_utils::build_api_resource;
use temporal_common::{naming, Error};

use crate::builder::{merge_typed, stub, ObservedState, ResourceBuilder, ResourceKey, UpdateOutcome};
use crate::meta::ClusterContext;

/// `<cluster>` ServiceAccount
pub struct ServiceAccountBuilder {
    ctx: Arc<ClusterContext>,
}

impl ServiceAccountBuilder {
    /// Builder for the cluster in `ctx`
    pub fn new(ctx: Arc<ClusterContext>) -> Self {
        Self { ctx }
    }

    fn name(&self) -> String {
        naming::service_account(&self.ctx.name)
    }
}

impl ResourceBuilder for ServiceAccountBuilder {
    fn key(&self) -> ResourceKey {
        ResourceKey::new("ServiceAccount", self.name())
    }

    fn api_resource(&self) -> ApiResource {
        build_api_resource("v1", "ServiceAccount")
    }

    fn build(&self) -> DynamicObject {
        stub(&self.api_resource(), &self.name(), &self.ctx.namespace)
    }

    fn update(
        &self,
        object: &mut DynamicObject,
        _observed: &ObservedState,
    ) -> Result<UpdateOutcome, Error> {
        let pull_secrets = &self.ctx.spec.image_pull_secrets;
        let desired = ServiceAccount {
            metadata: self.ctx.object_meta(&self.name(), "server"),
            image_pull_secrets: (!pull_secrets.is_empty()).then(|| pull_secrets.clone()),
            ..Default::default()
        };
        merge_typed(object, &desired)?;
        Ok(UpdateOutcome::Applied)
    }
}
