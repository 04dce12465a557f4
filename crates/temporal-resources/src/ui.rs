//! Web UI add-on

use std::sync::Arc;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::DynamicObject;
use kube::discovery::ApiResource;

use temporal_common::defaults::UI_PORT;
use temporal_common::kube_utils::build_api_resource;
use temporal_common::{naming, Error};

use crate::builder::{merge_typed, stub, ObservedState, ResourceBuilder, ResourceKey, UpdateOutcome};
use crate::config::frontend_address;
use crate::meta::ClusterContext;
use crate::mtls::{self, certificate_issued};
use crate::pod::{client_cert, env};

const COMPONENT: &str = "ui";
const PORT_NAME: &str = "http";

fn ui_enabled(ctx: &ClusterContext) -> bool {
    ctx.spec.ui.as_ref().is_some_and(|u| u.enabled)
}

/// UI Deployment
pub struct UiDeploymentBuilder {
    ctx: Arc<ClusterContext>,
}

impl UiDeploymentBuilder {
    /// Builder for the cluster in `ctx`
    pub fn new(ctx: Arc<ClusterContext>) -> Self {
        Self { ctx }
    }

    fn desired(&self) -> Deployment {
        let ctx = &self.ctx;
        let ui = ctx.spec.ui.clone().unwrap_or_default();
        let name = naming::ui(&ctx.name);

        let mut env_vars = vec![
            env("TEMPORAL_ADDRESS", frontend_address(ctx)),
            env("TEMPORAL_UI_PORT", UI_PORT.to_string()),
        ];
        let mut volumes = Vec::new();
        let mut mounts = Vec::new();
        if let Some(cert) = client_cert(ctx, COMPONENT) {
            env_vars.extend([
                env("TEMPORAL_TLS_CA", cert.ca_file()),
                env("TEMPORAL_TLS_CERT", cert.cert_file()),
                env("TEMPORAL_TLS_KEY", cert.key_file()),
                env("TEMPORAL_TLS_SERVER_NAME", cert.server_name.clone()),
                env("TEMPORAL_TLS_ENABLE_HOST_VERIFICATION", "true"),
            ]);
            let (volume, mount) = cert.volume();
            volumes.push(volume);
            mounts.push(mount);
        }

        let pull_secrets = &ctx.spec.image_pull_secrets;
        Deployment {
            metadata: ctx.object_meta(&name, COMPONENT),
            spec: Some(DeploymentSpec {
                replicas: ui.replicas.or(Some(1)),
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
                            image: Some(ctx.spec.ui_image()),
                            image_pull_policy: Some("IfNotPresent".to_string()),
                            env: Some(env_vars),
                            ports: Some(vec![ContainerPort {
                                name: Some(PORT_NAME.to_string()),
                                container_port: UI_PORT,
                                protocol: Some("TCP".to_string()),
                                ..Default::default()
                            }]),
                            resources: ui.resources.clone(),
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

impl ResourceBuilder for UiDeploymentBuilder {
    fn key(&self) -> ResourceKey {
        ResourceKey::new("Deployment", naming::ui(&self.ctx.name))
    }

    fn api_resource(&self) -> ApiResource {
        build_api_resource("apps/v1", "Deployment")
    }

    fn enabled(&self) -> bool {
        ui_enabled(&self.ctx)
    }

    fn build(&self) -> DynamicObject {
        stub(&self.api_resource(), &naming::ui(&self.ctx.name), &self.ctx.namespace)
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

/// UI Service
pub struct UiServiceBuilder {
    ctx: Arc<ClusterContext>,
}

impl UiServiceBuilder {
    /// Builder for the cluster in `ctx`
    pub fn new(ctx: Arc<ClusterContext>) -> Self {
        Self { ctx }
    }
}

impl ResourceBuilder for UiServiceBuilder {
    fn key(&self) -> ResourceKey {
        ResourceKey::new("Service", naming::ui(&self.ctx.name))
    }

    fn api_resource(&self) -> ApiResource {
        build_api_resource("v1", "Service")
    }

    fn enabled(&self) -> bool {
        ui_enabled(&self.ctx)
    }

    fn build(&self) -> DynamicObject {
        stub(&self.api_resource(), &naming::ui(&self.ctx.name), &self.ctx.namespace)
    }

    fn update(
        &self,
        object: &mut DynamicObject,
        _observed: &ObservedState,
    ) -> Result<UpdateOutcome, Error> {
        let desired = Service {
            metadata: self.ctx.object_meta(&naming::ui(&self.ctx.name), COMPONENT),
            spec: Some(ServiceSpec {
                type_: Some("ClusterIP".to_string()),
                selector: Some(self.ctx.selector_labels(COMPONENT)),
                ports: Some(vec![ServicePort {
                    name: Some(PORT_NAME.to_string()),
                    port: UI_PORT,
                    target_port: Some(IntOrString::String(PORT_NAME.to_string())),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };
        merge_typed(object, &desired)?;
        Ok(UpdateOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::test_support::*;
    use crate::mtls::state::fixtures::issued_certificate;
    use temporal_common::crd::{DomainSpec, MtlsProvider, MtlsSpec, UiSpec};

    fn ui_context(mtls: bool) -> Arc<ClusterContext> {
        let mut spec = cluster_spec();
        spec.ui = Some(UiSpec {
            enabled: true,
            ..Default::default()
        });
        if mtls {
            spec.mtls = Some(MtlsSpec {
                provider: MtlsProvider::CertManager,
                frontend: Some(DomainSpec { enabled: true }),
                ..Default::default()
            });
        }
        Arc::new(context_for(spec))
    }

    #[test]
    fn ui_points_at_the_frontend_service() {
        let builder = UiDeploymentBuilder::new(ui_context(false));
        assert!(builder.enabled());
        let mut obj = builder.build();
        builder.update(&mut obj, &ObservedState::new()).unwrap();
        let container = &obj.data["spec"]["template"]["spec"]["containers"][0];
        assert_eq!(container["env"][0]["name"], "TEMPORAL_ADDRESS");
        assert_eq!(
            container["env"][0]["value"],
            "prod-frontend.temporal.svc.cluster.local:7233"
        );
        assert_eq!(container["ports"][0]["containerPort"], 8080);
    }

    #[test]
    fn ui_with_mtls_waits_for_its_client_certificate() {
        let builder = UiDeploymentBuilder::new(ui_context(true));
        let mut observed = ObservedState::new();
        let mut obj = builder.build();
        assert!(builder.update(&mut obj, &observed).unwrap().is_deferred());

        let cert = "prod-ui-mtls-certificate";
        observed.insert(mtls::state::certificate_key(cert), issued_certificate(cert));
        builder.update(&mut obj, &observed).unwrap();
        let env = obj.data["spec"]["template"]["spec"]["containers"][0]["env"]
            .as_array()
            .unwrap()
            .clone();
        assert!(env.iter().any(|e| e["name"] == "TEMPORAL_TLS_SERVER_NAME"
            && e["value"] == "frontend.prod"));
    }

    #[test]
    fn ui_is_disabled_by_default() {
        let ctx = Arc::new(context());
        assert!(!UiDeploymentBuilder::new(ctx.clone()).enabled());
        assert!(!UiServiceBuilder::new(ctx).enabled());
    }

    #[test]
    fn update_is_idempotent() {
        let builders: Vec<Box<dyn ResourceBuilder>> = vec![
            Box::new(UiDeploymentBuilder::new(ui_context(false))),
            Box::new(UiServiceBuilder::new(ui_context(false))),
        ];
        for builder in builders {
            let observed = ObservedState::new();
            let mut obj = builder.build();
            builder.update(&mut obj, &observed).unwrap();
            let first = serde_json::to_string(&obj).unwrap();
            builder.update(&mut obj, &observed).unwrap();
            assert_eq!(first, serde_json::to_string(&obj).unwrap());
        }
    }
}
