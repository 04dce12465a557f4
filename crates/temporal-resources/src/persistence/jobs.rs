//! Schema jobs
//!
//! Each datastore is provisioned by up to three Jobs that must run in
//! order: create-database, setup-schema, update-schema. A job defers until
//! its predecessor reports `Complete`; a failed job stops the chain.
//! Steps already recorded in the cluster status are not run again.

use std::sync::Arc;

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, EnvVar, EnvVarSource, PodSpec, PodTemplateSpec,
    SecretKeySelector, Volume,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use tracing::debug;

use temporal_common::crd::{DatastoreSpec, DatastoreType};
use temporal_common::kube_utils::{build_api_resource, has_condition};
use temporal_common::{naming, Error};

use super::scripts::{SchemaStep, SCRIPTS_MOUNT_PATH};
use crate::builder::{
    merge_typed, stub, DatastoreObservation, Observation, ObservedState, ResourceBuilder,
    ResourceKey, UpdateOutcome,
};
use crate::meta::ClusterContext;
use crate::pod;

const SCRIPTS_VOLUME: &str = "scripts";

/// Job condition set once the job succeeded
pub const JOB_COMPLETE: &str = "Complete";
/// Job condition set once the job gave up
pub const JOB_FAILED: &str = "Failed";

/// Whether a Job finished successfully
pub fn job_complete(job: &DynamicObject) -> bool {
    has_condition(job, JOB_COMPLETE)
}

/// Whether a Job exhausted its retries
pub fn job_failed(job: &DynamicObject) -> bool {
    has_condition(job, JOB_FAILED)
}

/// Env var the schema tools read the password from
fn tool_password_var(type_: DatastoreType) -> Option<&'static str> {
    match type_ {
        DatastoreType::Sql => Some("SQL_PASSWORD"),
        DatastoreType::Cassandra => Some("CASSANDRA_PASSWORD"),
        DatastoreType::Elasticsearch => Some("ES_PWD"),
        DatastoreType::Unknown => None,
    }
}

/// One schema job of one datastore
pub struct SchemaJobBuilder {
    ctx: Arc<ClusterContext>,
    store: DatastoreSpec,
    step: SchemaStep,
}

impl SchemaJobBuilder {
    /// Builder for `step` of `store`
    pub fn new(ctx: Arc<ClusterContext>, store: DatastoreSpec, step: SchemaStep) -> Self {
        Self { ctx, store, step }
    }

    /// Name of the job of `step`
    fn job_name(&self, step: SchemaStep) -> String {
        let (cluster, store) = (&self.ctx.name, &self.store.name);
        match step {
            SchemaStep::CreateDatabase => naming::create_database_job(cluster, store),
            SchemaStep::SetupSchema => naming::setup_schema_job(cluster, store),
            SchemaStep::UpdateSchema => {
                naming::update_schema_job(cluster, store, &self.ctx.version)
            }
        }
    }

    fn name(&self) -> String {
        self.job_name(self.step)
    }

    fn recorded(&self) -> (bool, bool, Option<&str>) {
        match self.ctx.status.datastore(&self.store.name) {
            Some(s) => (
                s.created || self.store.skip_create,
                s.setup,
                s.schema_version.as_deref(),
            ),
            None => (self.store.skip_create, false, None),
        }
    }

    /// Step that must be complete before this one runs
    fn predecessor(&self) -> Option<SchemaStep> {
        let (created, setup, _) = self.recorded();
        match self.step {
            SchemaStep::CreateDatabase => None,
            SchemaStep::SetupSchema if created => None,
            SchemaStep::SetupSchema => Some(SchemaStep::CreateDatabase),
            SchemaStep::UpdateSchema if setup => None,
            SchemaStep::UpdateSchema => Some(SchemaStep::SetupSchema),
        }
    }

    fn desired(&self) -> Job {
        let ctx = &self.ctx;
        let component = "schema";
        let script = format!("{SCRIPTS_MOUNT_PATH}/{}", self.step.script_name(&self.store.name));

        let mut env: Vec<EnvVar> = Vec::new();
        if let (Some(var), Some(secret)) = (
            tool_password_var(self.store.datastore_type()),
            self.store.password_secret_ref.as_ref(),
        ) {
            env.push(EnvVar {
                name: var.to_string(),
                value_from: Some(EnvVarSource {
                    secret_key_ref: Some(SecretKeySelector {
                        name: secret.name.clone(),
                        key: secret.key.clone(),
                        optional: None,
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            });
        }

        let mut volumes = vec![Volume {
            name: SCRIPTS_VOLUME.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: naming::schema_scripts(&ctx.name),
                default_mode: Some(0o555),
                ..Default::default()
            }),
            ..Default::default()
        }];
        let mut mounts = vec![pod::mount(SCRIPTS_VOLUME, SCRIPTS_MOUNT_PATH)];
        if let Some((volume, mount)) = pod::datastore_tls(&self.store) {
            volumes.push(volume);
            mounts.push(mount);
        }

        let pull_secrets = &ctx.spec.image_pull_secrets;
        Job {
            metadata: ctx.object_meta(&self.name(), component),
            spec: Some(JobSpec {
                backoff_limit: Some(3),
                ttl_seconds_after_finished: Some(ctx.spec.job_ttl_seconds()),
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(ctx.labels(component)),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        restart_policy: Some("OnFailure".to_string()),
                        image_pull_secrets: (!pull_secrets.is_empty())
                            .then(|| pull_secrets.clone()),
                        containers: vec![Container {
                            name: self.step.to_string(),
                            image: Some(ctx.spec.admintools_image()),
                            image_pull_policy: Some("IfNotPresent".to_string()),
                            command: Some(vec!["/bin/bash".to_string(), script]),
                            env: (!env.is_empty()).then_some(env),
                            resources: ctx.spec.job_resources.clone(),
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

impl ResourceBuilder for SchemaJobBuilder {
    fn key(&self) -> ResourceKey {
        ResourceKey::new("Job", self.name())
    }

    fn api_resource(&self) -> ApiResource {
        build_api_resource("batch/v1", "Job")
    }

    fn enabled(&self) -> bool {
        let (created, setup, schema_version) = self.recorded();
        match self.step {
            SchemaStep::CreateDatabase => !created && !setup,
            SchemaStep::SetupSchema => !setup,
            SchemaStep::UpdateSchema => schema_version != Some(self.ctx.spec.version.as_str()),
        }
    }

    fn build(&self) -> DynamicObject {
        stub(&self.api_resource(), &self.name(), &self.ctx.namespace)
    }

    fn update(
        &self,
        object: &mut DynamicObject,
        observed: &ObservedState,
    ) -> Result<UpdateOutcome, Error> {
        if job_failed(object) {
            return Err(Error::dependency(
                self.name(),
                format!("{} job for datastore {} failed", self.step, self.store.name),
            ));
        }

        if let Some(step) = self.predecessor() {
            let name = self.job_name(step);
            match observed.get(&ResourceKey::new("Job", &name)) {
                Some(job) if job_failed(job) => {
                    return Err(Error::dependency(
                        name,
                        format!("{step} job for datastore {} failed", self.store.name),
                    ));
                }
                Some(job) if job_complete(job) => {}
                _ => {
                    debug!(
                        cluster = %self.ctx.name,
                        job = %self.name(),
                        waiting_on = %name,
                        "schema job waiting for predecessor"
                    );
                    return Ok(UpdateOutcome::deferred(format!(
                        "waiting for job {name} to complete"
                    )));
                }
            }
        }

        // The pod template of a Job is immutable once created
        if object.metadata.resource_version.is_some() {
            let meta = Job {
                metadata: self.ctx.object_meta(&self.name(), "schema"),
                ..Default::default()
            };
            merge_typed(object, &meta)?;
        } else {
            merge_typed(object, &self.desired())?;
        }
        Ok(UpdateOutcome::Applied)
    }

    fn observe(&self, object: &DynamicObject) -> Observation {
        let complete = job_complete(object);
        let mut observation = DatastoreObservation {
            name: self.store.name.clone(),
            type_: self.store.datastore_type(),
            ..Default::default()
        };
        match self.step {
            SchemaStep::CreateDatabase => observation.created = complete,
            SchemaStep::SetupSchema => {
                observation.created = true;
                observation.setup = complete;
            }
            SchemaStep::UpdateSchema => {
                observation.created = true;
                observation.setup = true;
                observation.schema_version = complete.then(|| self.ctx.spec.version.clone());
            }
        }
        Observation::Datastore(observation)
    }

    fn depends_on(&self) -> Vec<ResourceKey> {
        let mut deps = vec![ResourceKey::new(
            "ConfigMap",
            naming::schema_scripts(&self.ctx.name),
        )];
        if let Some(step) = self.predecessor() {
            deps.push(ResourceKey::new("Job", self.job_name(step)));
        }
        deps
    }
}

/// Schema jobs of every datastore, each store's steps in order
pub fn schema_jobs(ctx: &Arc<ClusterContext>) -> Vec<Box<dyn ResourceBuilder>> {
    let mut builders: Vec<Box<dyn ResourceBuilder>> = Vec::new();
    for (_, store) in ctx.spec.persistence.stores() {
        for step in SchemaStep::ALL {
            builders.push(Box::new(SchemaJobBuilder::new(
                ctx.clone(),
                store.clone(),
                step,
            )));
        }
    }
    builders
}

/// Keys of the schema jobs that run in this pass
pub fn active_schema_jobs(ctx: &Arc<ClusterContext>) -> Vec<ResourceKey> {
    schema_jobs(ctx)
        .into_iter()
        .filter(|b| b.enabled())
        .map(|b| b.key())
        .collect()
}

/// Why the server cannot run against its datastores yet
///
/// A store is current once its schema is recorded at `spec.version`, or its
/// update-schema job for that version completed in this pass.
pub fn schema_pending(ctx: &ClusterContext, observed: &ObservedState) -> Option<String> {
    let version = ctx.spec.version.as_str();
    ctx.spec.persistence.stores().into_iter().find_map(|(_, store)| {
        let recorded = ctx
            .status
            .datastore(&store.name)
            .is_some_and(|s| s.setup && s.schema_version.as_deref() == Some(version));
        if recorded {
            return None;
        }
        let name = naming::update_schema_job(&ctx.name, &store.name, &ctx.version);
        let complete = observed
            .get(&ResourceKey::new("Job", &name))
            .is_some_and(job_complete);
        (!complete).then(|| format!("waiting for job {name} to complete"))
    })
}
