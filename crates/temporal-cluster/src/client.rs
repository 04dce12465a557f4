//! Kubernetes access used by the cluster controllers
//!
//! Every child object goes through [`ClusterKubeClient`] as a
//! `DynamicObject` addressed by its `ApiResource`, so the engine can drive
//! core kinds and cert-manager kinds through one code path and tests can
//! swap in a mock or an in-memory API.

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, PostParams};
use kube::discovery::ApiResource;
use kube::{Client, ResourceExt};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use temporal_common::crd::{
    TemporalCluster, TemporalClusterClient, TemporalClusterClientStatus, TemporalClusterStatus,
};
use temporal_common::kube_utils::patch_resource_status;
use temporal_common::{Error, FIELD_MANAGER};

/// Trait abstracting Kubernetes client operations for the cluster controllers
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterKubeClient: Send + Sync {
    /// Get a child object, `None` if it does not exist
    async fn get(
        &self,
        api_resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error>;

    /// Create a child object
    async fn create(
        &self,
        api_resource: &ApiResource,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, Error>;

    /// Replace a child object
    ///
    /// The object carries the `resourceVersion` it was read at; a stale
    /// version fails with [`Error::Conflict`].
    async fn replace(
        &self,
        api_resource: &ApiResource,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, Error>;

    /// Delete a child object; deleting an absent object succeeds
    async fn delete(
        &self,
        api_resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<(), Error>;

    /// Get a TemporalCluster by name and namespace
    async fn get_cluster(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<TemporalCluster>, Error>;

    /// Patch the status subresource of a TemporalCluster
    async fn patch_cluster_status(
        &self,
        name: &str,
        namespace: &str,
        status: &TemporalClusterStatus,
    ) -> Result<(), Error>;

    /// Patch the status subresource of a TemporalClusterClient
    async fn patch_client_status(
        &self,
        name: &str,
        namespace: &str,
        status: &TemporalClusterClientStatus,
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct ClusterKubeClientImpl {
    client: Client,
}

impl ClusterKubeClientImpl {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, api_resource: &ApiResource, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, api_resource)
    }
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    }
}

/// Map a write failure, turning 409 into a retryable conflict
fn write_error(error: kube::Error, kind: &str, name: &str) -> Error {
    match error {
        kube::Error::Api(ae) if ae.code == 409 => Error::conflict(kind, name),
        other => other.into(),
    }
}

#[async_trait]
impl ClusterKubeClient for ClusterKubeClientImpl {
    async fn get(
        &self,
        api_resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error> {
        Ok(self.api(api_resource, namespace).get_opt(name).await?)
    }

    async fn create(
        &self,
        api_resource: &ApiResource,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, Error> {
        let name = object.name_any();
        debug!(kind = %api_resource.kind, name = %name, "creating resource");
        self.api(api_resource, namespace)
            .create(&post_params(), object)
            .await
            .map_err(|e| write_error(e, &api_resource.kind, &name))
    }

    async fn replace(
        &self,
        api_resource: &ApiResource,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, Error> {
        let name = object.name_any();
        debug!(kind = %api_resource.kind, name = %name, "replacing resource");
        self.api(api_resource, namespace)
            .replace(&name, &post_params(), object)
            .await
            .map_err(|e| write_error(e, &api_resource.kind, &name))
    }

    async fn delete(
        &self,
        api_resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<(), Error> {
        match self
            .api(api_resource, namespace)
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_cluster(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<TemporalCluster>, Error> {
        let api: Api<TemporalCluster> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn patch_cluster_status(
        &self,
        name: &str,
        namespace: &str,
        status: &TemporalClusterStatus,
    ) -> Result<(), Error> {
        patch_resource_status::<TemporalCluster>(
            &self.client,
            name,
            namespace,
            status,
            FIELD_MANAGER,
        )
        .await?;
        Ok(())
    }

    async fn patch_client_status(
        &self,
        name: &str,
        namespace: &str,
        status: &TemporalClusterClientStatus,
    ) -> Result<(), Error> {
        patch_resource_status::<TemporalClusterClient>(
            &self.client,
            name,
            namespace,
            status,
            FIELD_MANAGER,
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "the object has been modified".to_string(),
            reason: "Conflict".to_string(),
            code,
        })
    }

    #[test]
    fn stale_write_becomes_conflict() {
        let err = write_error(api_error(409), "Deployment", "prod-frontend");
        assert!(matches!(err, Error::Conflict { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn other_write_failures_keep_kube_error() {
        let err = write_error(api_error(422), "Deployment", "prod-frontend");
        assert!(matches!(err, Error::Kube { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn writes_carry_the_operator_field_manager() {
        assert_eq!(post_params().field_manager.as_deref(), Some(FIELD_MANAGER));
    }
}
