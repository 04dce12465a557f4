//! Admin tools add-on: a long-running pod with `tctl` and `temporal` preconfigured

use std::sync::Arc;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::api::DynamicObject;
use kube::discovery::ApiResource;

use temporal_common::kube_utils::build_api_resource;
use temporal_common::{naming, Error};

use crate::builder::{merge_typed, stub, ObservedState, ResourceBuilder, ResourceKey, UpdateOutcome};
use crate::config::frontend_address;
use crate::meta::ClusterContext;
use crate::mtls::{self, certificate_issued};
use crate::pod::{client_cert, env};

const COMPONENT: &str = "admintools";

/// Admin tools Deployment
pub struct AdminToolsBuilder {
    ctx: Arc<ClusterContext>,
}

impl AdminToolsBuilder {
    /// Builder for the cluster in `ctx`
    pub fn new(ctx: Arc<ClusterContext>) -> Self {
        Self { ctx }
    }

    fn name(&self) -> String {
        naming::admintools(&self.ctx.name)
    }

    fn desired(&self) -> Deployment {
        let ctx = &self.ctx;
        let address = frontend_address(ctx);

        let mut env_vars = vec![
            env("TEMPORAL_CLI_ADDRESS", address.clone()),
            env("TEMPORAL_ADDRESS", address),
        ];
        let mut volumes = Vec::new();
        let mut mounts = Vec::new();
        if let Some(cert) = client_cert(ctx, COMPONENT) {
            env_vars.extend([
                // tctl
                env("TEMPORAL_CLI_TLS_CA", cert.ca_file()),
                env("TEMPORAL_CLI_TLS_CERT", cert.cert_file()),
                env("TEMPORAL_CLI_TLS_KEY", cert.key_file()),
                env("TEMPORAL_CLI_TLS_SERVER_NAME", cert.server_name.clone()),
                env("TEMPORAL_CLI_TLS_ENABLE_HOST_VERIFICATION", "true"),
                // temporal
                env("TEMPORAL_TLS_CA", cert.ca_file()),
                env("TEMPORAL_TLS_CERT", cert.cert_file()),
                env("TEMPORAL_TLS_KEY", cert.key_file()),
                env("TEMPORAL_TLS_SERVER_NAME", cert.server_name.clone()),
            ]);
            let (volume, mount) = cert.volume();
            volumes.push(volume);
            mounts.push(mount);
        }

        let resources = ctx.spec.admintools.as_ref().and_then(|a| a.resources.clone());
        let pull_secrets = &ctx.spec.image_pull_secrets;
        Deployment {
            metadata: ctx.object_meta(&self.name(), COMPONENT),
            spec: Some(DeploymentSpec {
                replicas: Some(1),
                selector: LabelSelector {
                    match_labels: Some(ctx.selector_labels(COMPONENT)),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(ctx.labels(COMPONENT)),
                        annotations: Some(mtls::mesh_annotations(ctx.spec.mtls.as_ref())),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        image_pull_secrets: (!pull_secrets.is_empty())
                            .then(|| pull_secrets.clone()),
                        containers: vec![Container {
                            name: COMPONENT.to_string(),
                            image: Some(ctx.spec.admintools_image()),
                            image_pull_policy: Some("IfNotPresent".to_string()),
                            command: Some(vec![
                                "tail".to_string(),
                                "-f".to_string(),
                                "/dev/null".to_string(),
                            ]),
                            env: Some(env_vars),
                            resources,
                            volume_mounts: Some(mounts),
                            ..Default::default()
                        }],
                        volumes: Some(volumes),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

impl ResourceBuilder for AdminToolsBuilder {
    fn key(&self) -> ResourceKey {
        ResourceKey::new("Deployment", self.name())
    }

    fn api_resource(&self) -> ApiResource {
        build_api_resource("apps/v1", "Deployment")
    }

    fn enabled(&self) -> bool {
        self.ctx.spec.admintools.as_ref().is_some_and(|a| a.enabled)
    }

    fn build(&self) -> DynamicObject {
        stub(&self.api_resource(), &self.name(), &self.ctx.namespace)
    }

    fn update(
        &self,
        object: &mut DynamicObject,
        observed: &ObservedState,
    ) -> Result<UpdateOutcome, Error> {
        if let Some(cert) = client_cert(&self.ctx, COMPONENT) {
            let issued = observed
                .get(&mtls::state::certificate_key(&cert.certificate))
                .is_some_and(certificate_issued);
            if !issued {
                return Ok(UpdateOutcome::deferred(format!(
                    "waiting for certificate {} to be issued",
                    cert.certificate
                )));
            }
        }
        merge_typed(object, &self.desired())?;
        Ok(UpdateOutcome::Applied)
    }

    fn depends_on(&self) -> Vec<ResourceKey> {
        client_cert(&self.ctx, COMPONENT)
            .map(|c| vec![mtls::state::certificate_key(c.certificate)])
            .unwrap_or_default()
    }
}
