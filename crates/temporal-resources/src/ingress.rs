//! Ingress exposing the UI

use std::sync::Arc;

use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use kube::api::DynamicObject;
use kube::discovery::ApiResource;

use temporal_common::defaults::UI_PORT;
use temporal_common::kube_utils::build_api_resource;
use temporal_common::{naming, Error};

use crate::builder::{merge_typed, stub, ObservedState, ResourceBuilder, ResourceKey, UpdateOutcome};
use crate::meta::ClusterContext;

/// `<cluster>-ui` Ingress
pub struct UiIngressBuilder {
    ctx: Arc<ClusterContext>,
}

impl UiIngressBuilder {
    /// Builder for the cluster in `ctx`
    pub fn new(ctx: Arc<ClusterContext>) -> Self {
        Self { ctx }
    }

    fn name(&self) -> String {
        naming::ui(&self.ctx.name)
    }
}

impl ResourceBuilder for UiIngressBuilder {
    fn key(&self) -> ResourceKey {
        ResourceKey::new("Ingress", self.name())
    }

    fn api_resource(&self) -> ApiResource {
        build_api_resource("networking.k8s.io/v1", "Ingress")
    }

    fn enabled(&self) -> bool {
        self.ctx
            .spec
            .ui
            .as_ref()
            .is_some_and(|ui| ui.enabled && ui.ingress.is_some())
    }

    fn build(&self) -> DynamicObject {
        stub(&self.api_resource(), &self.name(), &self.ctx.namespace)
    }

    fn update(
        &self,
        object: &mut DynamicObject,
        _observed: &ObservedState,
    ) -> Result<UpdateOutcome, Error> {
        let Some(spec) = self.ctx.spec.ui.as_ref().and_then(|ui| ui.ingress.as_ref()) else {
            return Err(Error::config_for_field(
                &self.ctx.name,
                "spec.ui.ingress",
                "ingress is not configured",
            ));
        };

        let backend = IngressBackend {
            service: Some(IngressServiceBackend {
                name: self.name(),
                port: Some(ServiceBackendPort {
                    number: Some(UI_PORT),
                    ..Default::default()
                }),
            }),
            ..Default::default()
        };
        let rules = spec
            .hosts
            .iter()
            .map(|host| IngressRule {
                host: Some(host.clone()),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some("/".to_string()),
                        path_type: "Prefix".to_string(),
                        backend: backend.clone(),
                    }],
                }),
            })
            .collect();

        let mut metadata = self.ctx.object_meta(&self.name(), "ui");
        if !spec.annotations.is_empty() {
            metadata.annotations = Some(spec.annotations.clone());
        }
        let desired = Ingress {
            metadata,
            spec: Some(IngressSpec {
                ingress_class_name: spec.ingress_class_name.clone(),
                rules: Some(rules),
                tls: (!spec.tls.is_empty()).then(|| spec.tls.clone()),
                ..Default::default()
            }),
            ..Default::default()
        };
        merge_typed(object, &desired)?;
        Ok(UpdateOutcome::Applied)
    }

    fn depends_on(&self) -> Vec<ResourceKey> {
        vec![ResourceKey::new("Service", self.name())]
    }
}
