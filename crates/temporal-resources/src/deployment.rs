//! Deployments of the server services
//!
//! One Deployment per enabled service, all running the same server image
//! with `SERVICES` selecting the role. The pod template carries a hash of
//! the rendered config so a config change rolls the pods.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, PodSpec, PodTemplateSpec, Probe,
    TCPSocketAction, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::DynamicObject;
use kube::discovery::ApiResource;

use temporal_common::crd::{ServiceName, ServiceStatus, TrafficDomain};
use temporal_common::kube_utils::{build_api_resource, data_i64, data_str, deterministic_hash};
use temporal_common::{naming, Error, ANNOTATION_CONFIG_HASH, LABEL_VERSION};

use crate::builder::{
    merge_typed, stub, Observation, ObservedState, ResourceBuilder, ResourceKey, UpdateOutcome,
};
use crate::config::{
    self, render_config, CONFIG_KEY, CONFIG_MOUNT_PATH, DYNAMIC_CONFIG_KEY,
    DYNAMIC_CONFIG_MOUNT_PATH,
};
use crate::meta::ClusterContext;
use crate::mtls::{self, certificate_issued};
use crate::persistence::{active_schema_jobs, schema_pending};
use crate::pod::{self, env, field_env, mount, password_env, secret_volume};
use crate::service::{GRPC_PORT_NAME, HTTP_PORT_NAME, MEMBERSHIP_PORT_NAME, METRICS_PORT_NAME};

const CONFIG_VOLUME: &str = "config";
const DYNAMIC_CONFIG_VOLUME: &str = "dynamic-config";

/// A certificate secret mounted into a server pod
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertMount {
    /// Certificate (and secret) name
    pub certificate: String,
    /// Directory it is mounted at
    pub path: String,
}

impl CertMount {
    fn volume_name(&self) -> String {
        self.certificate.clone()
    }
}

/// Certificates a service's pods mount
///
/// Every service presents the internode certificate; the frontends serve
/// the frontend certificate and the worker dials the frontend with its
/// client certificate.
pub fn cert_mounts(ctx: &ClusterContext, service: ServiceName) -> Vec<CertMount> {
    let Some(mtls) = ctx.spec.mtls.as_ref().filter(|m| m.uses_cert_manager()) else {
        return Vec::new();
    };
    let mut mounts = Vec::new();
    if mtls.internode_enabled() {
        mounts.push(CertMount {
            certificate: naming::domain_certificate(&ctx.name, TrafficDomain::Internode),
            path: mtls::certs_mount_path(TrafficDomain::Internode),
        });
    }
    if mtls.frontend_enabled() {
        match service {
            ServiceName::Frontend | ServiceName::InternalFrontend => mounts.push(CertMount {
                certificate: naming::domain_certificate(&ctx.name, TrafficDomain::Frontend),
                path: mtls::certs_mount_path(TrafficDomain::Frontend),
            }),
            ServiceName::Worker => mounts.push(CertMount {
                certificate: naming::worker_certificate(&ctx.name),
                path: mtls::WORKER_CERTS_MOUNT_PATH.to_string(),
            }),
            ServiceName::History | ServiceName::Matching => {}
        }
    }
    mounts
}

/// Deployment of one server service
pub struct ServiceDeploymentBuilder {
    ctx: Arc<ClusterContext>,
    service: ServiceName,
}

impl ServiceDeploymentBuilder {
    /// Builder for `service` of the cluster in `ctx`
    pub fn new(ctx: Arc<ClusterContext>, service: ServiceName) -> Self {
        Self { ctx, service }
    }

    fn name(&self) -> String {
        naming::service_deployment(&self.ctx.name, self.service)
    }

    fn ports(&self) -> Vec<ContainerPort> {
        let resolved = self.ctx.spec.service(self.service);
        let container_port = |name: &str, port: i32| ContainerPort {
            name: Some(name.to_string()),
            container_port: port,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        };
        let mut ports = vec![
            container_port(GRPC_PORT_NAME, resolved.port),
            container_port(MEMBERSHIP_PORT_NAME, resolved.membership_port),
        ];
        if config::http_api_enabled(&self.ctx) {
            if let Some(http) = resolved.http_port {
                ports.push(container_port(HTTP_PORT_NAME, http));
            }
        }
        if let Some(metrics) = self.ctx.spec.metrics_port() {
            ports.push(container_port(METRICS_PORT_NAME, metrics));
        }
        ports
    }

    fn volumes(&self) -> (Vec<Volume>, Vec<VolumeMount>) {
        let mut volumes = vec![
            Volume {
                name: CONFIG_VOLUME.to_string(),
                config_map: Some(ConfigMapVolumeSource {
                    name: naming::config_map(&self.ctx.name),
                    ..Default::default()
                }),
                ..Default::default()
            },
            Volume {
                name: DYNAMIC_CONFIG_VOLUME.to_string(),
                config_map: Some(ConfigMapVolumeSource {
                    name: naming::dynamic_config_map(&self.ctx.name),
                    ..Default::default()
                }),
                ..Default::default()
            },
        ];
        let mut mounts = vec![
            VolumeMount {
                name: CONFIG_VOLUME.to_string(),
                mount_path: format!("{CONFIG_MOUNT_PATH}/{CONFIG_KEY}"),
                sub_path: Some(CONFIG_KEY.to_string()),
                read_only: Some(true),
                ..Default::default()
            },
            VolumeMount {
                name: DYNAMIC_CONFIG_VOLUME.to_string(),
                mount_path: format!("{DYNAMIC_CONFIG_MOUNT_PATH}/{DYNAMIC_CONFIG_KEY}"),
                sub_path: Some(DYNAMIC_CONFIG_KEY.to_string()),
                read_only: Some(true),
                ..Default::default()
            },
        ];

        for cert in cert_mounts(&self.ctx, self.service) {
            volumes.push(secret_volume(&cert.volume_name(), &cert.certificate));
            mounts.push(mount(&cert.volume_name(), &cert.path));
        }

        for (_, store) in self.ctx.spec.persistence.stores() {
            if let Some((volume, volume_mount)) = pod::datastore_tls(store) {
                volumes.push(volume);
                mounts.push(volume_mount);
            }
        }
        (volumes, mounts)
    }

    fn desired(&self) -> Result<Deployment, Error> {
        let ctx = &self.ctx;
        let component = self.service.as_str();
        let resolved = ctx.spec.service(self.service);

        let mut env_vars = vec![
            field_env("POD_IP", "status.podIP"),
            env("SERVICES", component),
        ];
        env_vars.extend(
            ctx.spec
                .persistence
                .stores()
                .into_iter()
                .filter_map(|(_, store)| password_env(store)),
        );

        let (volumes, volume_mounts) = self.volumes();

        let mut annotations = mtls::mesh_annotations(ctx.spec.mtls.as_ref());
        annotations.insert(
            ANNOTATION_CONFIG_HASH.to_string(),
            deterministic_hash(&render_config(ctx)?),
        );

        let container = Container {
            name: "temporal".to_string(),
            image: Some(ctx.spec.server_image()),
            image_pull_policy: Some("IfNotPresent".to_string()),
            env: Some(env_vars),
            ports: Some(self.ports()),
            readiness_probe: Some(Probe {
                tcp_socket: Some(TCPSocketAction {
                    port: IntOrString::String(GRPC_PORT_NAME.to_string()),
                    ..Default::default()
                }),
                initial_delay_seconds: Some(10),
                period_seconds: Some(10),
                ..Default::default()
            }),
            resources: resolved.resources.clone(),
            volume_mounts: Some(volume_mounts),
            ..Default::default()
        };

        Ok(Deployment {
            metadata: ctx.object_meta(&self.name(), component),
            spec: Some(DeploymentSpec {
                replicas: Some(resolved.replicas),
                selector: LabelSelector {
                    match_labels: Some(ctx.selector_labels(component)),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(ctx.labels(component)),
                        annotations: Some(annotations),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        service_account_name: Some(naming::service_account(&ctx.name)),
                        containers: vec![container],
                        volumes: Some(volumes),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        })
    }
}

impl ResourceBuilder for ServiceDeploymentBuilder {
    fn key(&self) -> ResourceKey {
        ResourceKey::new("Deployment", self.name())
    }

    fn api_resource(&self) -> ApiResource {
        build_api_resource("apps/v1", "Deployment")
    }

    fn enabled(&self) -> bool {
        self.ctx.spec.service(self.service).enabled
    }

    fn build(&self) -> DynamicObject {
        stub(&self.api_resource(), &self.name(), &self.ctx.namespace)
    }

    fn update(
        &self,
        object: &mut DynamicObject,
        observed: &ObservedState,
    ) -> Result<UpdateOutcome, Error> {
        if let Some(reason) = schema_pending(&self.ctx, observed) {
            return Ok(UpdateOutcome::deferred(reason));
        }
        for cert in cert_mounts(&self.ctx, self.service) {
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
        merge_typed(object, &self.desired()?)?;
        Ok(UpdateOutcome::Applied)
    }

    fn observe(&self, object: &DynamicObject) -> Observation {
        Observation::Service(deployment_status(self.service.as_str(), object))
    }

    fn depends_on(&self) -> Vec<ResourceKey> {
        let mut deps = vec![
            ResourceKey::new("ConfigMap", naming::config_map(&self.ctx.name)),
            ResourceKey::new("ConfigMap", naming::dynamic_config_map(&self.ctx.name)),
        ];
        deps.extend(active_schema_jobs(&self.ctx));
        deps.extend(
            cert_mounts(&self.ctx, self.service)
                .into_iter()
                .map(|c| mtls::state::certificate_key(c.certificate)),
        );
        deps
    }
}

/// Readiness of a Deployment as a service status
///
/// Ready once the controller observed the current generation and every
/// desired replica is updated and ready. The version is the one labelled
/// on the pod template.
pub fn deployment_status(name: &str, deployment: &DynamicObject) -> ServiceStatus {
    let desired = data_i64(deployment, "/spec/replicas").unwrap_or(1);
    let updated = data_i64(deployment, "/status/updatedReplicas").unwrap_or(0);
    let ready = data_i64(deployment, "/status/readyReplicas").unwrap_or(0);
    let observed_generation = data_i64(deployment, "/status/observedGeneration").unwrap_or(0);
    let generation = deployment.metadata.generation.unwrap_or(0);
    let label_pointer = format!(
        "/spec/template/metadata/labels/{}",
        LABEL_VERSION.replace('~', "~0").replace('/', "~1")
    );
    ServiceStatus {
        name: name.to_string(),
        version: data_str(deployment, &label_pointer)
            .unwrap_or_default()
            .to_string(),
        ready: observed_generation >= generation && updated >= desired && ready >= desired,
    }
}

/// Deployments of every service in rollout order
pub fn deployments(ctx: &Arc<ClusterContext>) -> Vec<Box<dyn ResourceBuilder>> {
    ServiceName::ALL
        .into_iter()
        .map(|s| {
            Box::new(ServiceDeploymentBuilder::new(ctx.clone(), s)) as Box<dyn ResourceBuilder>
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::test_support::*;
    use crate::mtls::state::fixtures::issued_certificate;
    use crate::persistence::jobs::JOB_COMPLETE;
    use temporal_common::crd::{
        DatastoreStatus, DatastoreType, DomainSpec, MtlsProvider, MtlsSpec, TemporalClusterSpec,
    };

    /// Context whose stores are recorded at the spec version
    fn provisioned(spec: TemporalClusterSpec) -> Arc<ClusterContext> {
        let mut ctx = context_for(spec);
        ctx.status.persistence = ctx
            .spec
            .persistence
            .stores()
            .into_iter()
            .map(|(_, store)| DatastoreStatus {
                name: store.name.clone(),
                type_: DatastoreType::Sql,
                created: true,
                setup: true,
                schema_version: Some(ctx.spec.version.clone()),
            })
            .collect();
        Arc::new(ctx)
    }

    fn apply(builder: &ServiceDeploymentBuilder, observed: &ObservedState) -> DynamicObject {
        let mut obj = builder.build();
        builder.update(&mut obj, observed).unwrap();
        obj
    }

    fn mtls_context(provider: MtlsProvider) -> Arc<ClusterContext> {
        let mut spec = cluster_spec();
        spec.mtls = Some(MtlsSpec {
            provider,
            internode: Some(DomainSpec { enabled: true }),
            frontend: Some(DomainSpec { enabled: true }),
            ..Default::default()
        });
        provisioned(spec)
    }

    /// Story: a fresh cluster is applied while its databases are empty
    ///
    /// The Deployment waits on every schema job and stays deferred until the
    /// update-schema jobs of both stores complete.
    #[test]
    fn story_servers_wait_for_the_schema() {
        let ctx = Arc::new(context());
        let builder = ServiceDeploymentBuilder::new(ctx, ServiceName::Frontend);
        let deps = builder.depends_on();
        assert!(deps.contains(&ResourceKey::new("Job", "prod-default-create-database")));
        assert!(deps.contains(&ResourceKey::new("Job", "prod-visibility-update-schema-1-18-4")));

        let mut observed = ObservedState::new();
        let mut obj = builder.build();
        for store in ["default", "visibility"] {
            assert!(builder.update(&mut obj, &observed).unwrap().is_deferred());
            let name = format!("prod-{store}-update-schema-1-18-4");
            let mut job = stub(&build_api_resource("batch/v1", "Job"), &name, "temporal");
            job.data = serde_json::json!({
                "status": {"conditions": [{"type": JOB_COMPLETE, "status": "True"}]}
            });
            observed.insert(ResourceKey::new("Job", &name), job);
        }
        assert_eq!(
            builder.update(&mut obj, &observed).unwrap(),
            UpdateOutcome::Applied
        );
    }

    #[test]
    fn upgrade_keeps_the_old_image_until_the_schema_is_updated() {
        let mut spec = cluster_spec();
        spec.version = "1.19.1".to_string();
        let mut ctx = context_for(spec);
        for status in provisioned(cluster_spec()).status.persistence.clone() {
            ctx.status.persistence.push(status);
        }
        let builder = ServiceDeploymentBuilder::new(Arc::new(ctx), ServiceName::History);

        let mut obj = apply(
            &ServiceDeploymentBuilder::new(provisioned(cluster_spec()), ServiceName::History),
            &ObservedState::new(),
        );
        let outcome = builder.update(&mut obj, &ObservedState::new()).unwrap();
        assert!(outcome.is_deferred());
        assert_eq!(
            obj.data["spec"]["template"]["spec"]["containers"][0]["image"],
            "temporalio/server:1.18.4"
        );
    }

    #[test]
    fn deployment_runs_one_service_with_store_passwords() {
        let ctx = provisioned(cluster_spec());
        let builder = ServiceDeploymentBuilder::new(ctx, ServiceName::History);
        let obj = apply(&builder, &ObservedState::new());
        assert_eq!(obj.metadata.name.as_deref(), Some("prod-history"));

        let container = &obj.data["spec"]["template"]["spec"]["containers"][0];
        assert_eq!(container["image"], "temporalio/server:1.18.4");
        let env = container["env"].as_array().unwrap();
        let names: Vec<&str> = env.iter().filter_map(|e| e["name"].as_str()).collect();
        assert_eq!(
            names,
            vec![
                "POD_IP",
                "SERVICES",
                "TEMPORAL_DEFAULT_DATASTORE_PASSWORD",
                "TEMPORAL_VISIBILITY_DATASTORE_PASSWORD",
            ]
        );
        assert_eq!(env[1]["value"], "history");
    }

    #[test]
    fn config_hash_changes_with_config() {
        let ctx = provisioned(cluster_spec());
        let first = apply(
            &ServiceDeploymentBuilder::new(ctx, ServiceName::Frontend),
            &ObservedState::new(),
        );
        let mut spec = cluster_spec();
        spec.num_history_shards = 1024;
        let second = apply(
            &ServiceDeploymentBuilder::new(provisioned(spec), ServiceName::Frontend),
            &ObservedState::new(),
        );
        let hash = |obj: &DynamicObject| {
            obj.data["spec"]["template"]["metadata"]["annotations"][ANNOTATION_CONFIG_HASH].clone()
        };
        assert!(hash(&first).is_string());
        assert_ne!(hash(&first), hash(&second));
    }

    #[test]
    fn frontend_waits_for_its_certificates() {
        let ctx = mtls_context(MtlsProvider::CertManager);
        let builder = ServiceDeploymentBuilder::new(ctx, ServiceName::Frontend);
        assert!(builder
            .depends_on()
            .contains(&mtls::state::certificate_key("prod-frontend-certificate")));

        let mut observed = ObservedState::new();
        let mut obj = builder.build();
        assert!(builder.update(&mut obj, &observed).unwrap().is_deferred());

        for cert in ["prod-internode-certificate", "prod-frontend-certificate"] {
            observed.insert(mtls::state::certificate_key(cert), issued_certificate(cert));
        }
        let obj = apply(&builder, &observed);
        let mounts = obj.data["spec"]["template"]["spec"]["containers"][0]["volumeMounts"]
            .as_array()
            .unwrap()
            .clone();
        let paths: Vec<&str> = mounts.iter().filter_map(|m| m["mountPath"].as_str()).collect();
        assert!(paths.contains(&"/etc/temporal/config/certs/cluster/internode"));
        assert!(paths.contains(&"/etc/temporal/config/certs/cluster/frontend"));
    }

    #[test]
    fn worker_mounts_its_client_certificate() {
        let ctx = mtls_context(MtlsProvider::CertManager);
        let mounts = cert_mounts(&ctx, ServiceName::Worker);
        assert_eq!(mounts.len(), 2);
        assert_eq!(mounts[1].certificate, "prod-worker-certificate");
        assert!(cert_mounts(&ctx, ServiceName::History)
            .iter()
            .all(|m| m.certificate == "prod-internode-certificate"));
    }

    #[test]
    fn linkerd_adds_injection_annotation() {
        let ctx = mtls_context(MtlsProvider::Linkerd);
        assert!(cert_mounts(&ctx, ServiceName::Frontend).is_empty());
        let obj = apply(
            &ServiceDeploymentBuilder::new(ctx, ServiceName::Matching),
            &ObservedState::new(),
        );
        assert_eq!(
            obj.data["spec"]["template"]["metadata"]["annotations"]["linkerd.io/inject"],
            "enabled"
        );
    }

    #[test]
    fn status_requires_every_replica_updated_and_ready() {
        let ctx = provisioned(cluster_spec());
        let builder = ServiceDeploymentBuilder::new(ctx, ServiceName::History);
        let mut obj = apply(&builder, &ObservedState::new());
        obj.metadata.generation = Some(2);
        obj.data["status"] = serde_json::json!({
            "observedGeneration": 2,
            "updatedReplicas": 1,
            "readyReplicas": 0
        });
        let Observation::Service(status) = builder.observe(&obj) else {
            panic!("expected service observation");
        };
        assert!(!status.ready);
        assert_eq!(status.version, "1.18.4");

        obj.data["status"]["readyReplicas"] = serde_json::json!(1);
        let Observation::Service(status) = builder.observe(&obj) else {
            panic!("expected service observation");
        };
        assert!(status.ready);

        obj.metadata.generation = Some(3);
        let Observation::Service(status) = builder.observe(&obj) else {
            panic!("expected service observation");
        };
        assert!(!status.ready);
    }

    #[test]
    fn update_is_idempotent() {
        let ctx = provisioned(cluster_spec());
        let builder = ServiceDeploymentBuilder::new(ctx, ServiceName::Frontend);
        let observed = ObservedState::new();
        let mut obj = builder.build();
        builder.update(&mut obj, &observed).unwrap();
        let first = serde_json::to_string(&obj).unwrap();
        builder.update(&mut obj, &observed).unwrap();
        assert_eq!(first, serde_json::to_string(&obj).unwrap());
    }
}
