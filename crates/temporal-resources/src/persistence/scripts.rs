//! Schema provisioning scripts
//!
//! One ConfigMap holds three scripts per datastore; the schema jobs mount it
//! and run the one for their step. Scripts are rendered from the templates
//! under `templates/` and read credentials from the job environment only.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use minijinja::{context, Environment};
use serde::Serialize;

use temporal_common::crd::{DatastoreRole, DatastoreSpec, DatastoreType};
use temporal_common::defaults::DEFAULT_CASSANDRA_PORT;
use temporal_common::kube_utils::build_api_resource;
use temporal_common::{naming, Error};

use crate::builder::{
    merge_typed, stub, ObservedState, ResourceBuilder, ResourceKey, UpdateOutcome,
};
use crate::meta::ClusterContext;

const SQL_TEMPLATE: &str = include_str!("../../templates/sql.sh.j2");
const CASSANDRA_TEMPLATE: &str = include_str!("../../templates/cassandra.sh.j2");
const ELASTICSEARCH_TEMPLATE: &str = include_str!("../../templates/elasticsearch.sh.j2");

/// Directory the scripts ConfigMap is mounted at in job pods
pub const SCRIPTS_MOUNT_PATH: &str = "/etc/temporal/scripts";

/// Directory holding the schema files shipped in the admin tools image
pub const SCHEMA_DIR: &str = "/etc/temporal/schema";

/// One provisioning step of a datastore
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SchemaStep {
    /// Create the database or keyspace
    CreateDatabase,
    /// Install the base schema
    SetupSchema,
    /// Apply versioned schema updates
    UpdateSchema,
}

impl SchemaStep {
    /// Steps in execution order
    pub const ALL: [SchemaStep; 3] = [
        SchemaStep::CreateDatabase,
        SchemaStep::SetupSchema,
        SchemaStep::UpdateSchema,
    ];

    fn template_step(&self) -> &'static str {
        match self {
            Self::CreateDatabase => "create",
            Self::SetupSchema => "setup",
            Self::UpdateSchema => "update",
        }
    }

    /// Script file name for `store`
    pub fn script_name(&self, store: &str) -> String {
        match self {
            Self::CreateDatabase => format!("create-{store}-database.sh"),
            Self::SetupSchema => format!("setup-{store}-schema.sh"),
            Self::UpdateSchema => format!("update-{store}-schema.sh"),
        }
    }
}

impl std::fmt::Display for SchemaStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CreateDatabase => write!(f, "create-database"),
            Self::SetupSchema => write!(f, "setup-schema"),
            Self::UpdateSchema => write!(f, "update-schema"),
        }
    }
}

#[derive(Serialize)]
struct TlsContext {
    ca_file: Option<String>,
    cert_file: Option<String>,
    key_file: Option<String>,
    enable_host_verification: bool,
    server_name: Option<String>,
}

fn tls_context(store: &DatastoreSpec) -> Option<TlsContext> {
    let tls = store.tls.as_ref().filter(|t| t.enabled)?;
    let dir = store.tls_mount_path();
    let path = |file: &str| format!("{dir}/{file}");
    Some(TlsContext {
        ca_file: tls.ca_file_ref.as_ref().map(|_| path("ca.pem")),
        cert_file: tls.cert_file_ref.as_ref().map(|_| path("client.pem")),
        key_file: tls.key_file_ref.as_ref().map(|_| path("client.key")),
        enable_host_verification: tls.enable_host_verification,
        server_name: tls.server_name.clone(),
    })
}

fn schema_family(role: DatastoreRole) -> &'static str {
    if role.is_visibility() {
        "visibility"
    } else {
        "temporal"
    }
}

/// Versioned schema directory of a SQL plugin
fn sql_schema_dir(plugin: &str, role: DatastoreRole) -> String {
    let engine = if plugin.starts_with("postgres") {
        "postgresql/v12"
    } else if plugin == "mysql8" {
        "mysql/v8"
    } else {
        "mysql/v57"
    };
    format!("{SCHEMA_DIR}/{engine}/{}/versioned", schema_family(role))
}

/// Render the script of one step for one store
pub fn render_script(
    cluster: &str,
    role: DatastoreRole,
    store: &DatastoreSpec,
    step: SchemaStep,
) -> Result<String, Error> {
    let template_error =
        |e: minijinja::Error| Error::internal_with_context("schema-scripts", e.to_string());

    let mut env = Environment::new();
    env.set_keep_trailing_newline(true);
    let step_name = step.template_step();

    let (template, ctx) = match store.datastore_type() {
        DatastoreType::Sql => {
            let sql = store.sql.as_ref().ok_or_else(|| {
                Error::config_for_field(cluster, role.field(), "sql backend is not set")
            })?;
            let (host, port) = sql.host_port().ok_or_else(|| {
                Error::config_for_field(
                    cluster,
                    format!("{}.sql.connectAddr", role.field()),
                    format!("{:?} must be host:port", sql.connect_addr),
                )
            })?;
            (
                SQL_TEMPLATE,
                context! {
                    step => step_name,
                    store => &store.name,
                    plugin => &sql.plugin_name,
                    host => host,
                    port => port,
                    user => &sql.user,
                    database => &sql.database_name,
                    schema_dir => sql_schema_dir(&sql.plugin_name, role),
                    tls => tls_context(store),
                },
            )
        }
        DatastoreType::Cassandra => {
            let cassandra = store.cassandra.as_ref().ok_or_else(|| {
                Error::config_for_field(cluster, role.field(), "cassandra backend is not set")
            })?;
            (
                CASSANDRA_TEMPLATE,
                context! {
                    step => step_name,
                    store => &store.name,
                    hosts => cassandra.hosts.join(","),
                    port => cassandra.port.unwrap_or(DEFAULT_CASSANDRA_PORT),
                    user => &cassandra.user,
                    keyspace => &cassandra.keyspace,
                    datacenter => &cassandra.datacenter,
                    replication_factor => cassandra.replication_factor.unwrap_or(1),
                    schema_dir => format!(
                        "{SCHEMA_DIR}/cassandra/{}/versioned",
                        schema_family(role)
                    ),
                    tls => tls_context(store),
                },
            )
        }
        DatastoreType::Elasticsearch => {
            let es = store.elasticsearch.as_ref().ok_or_else(|| {
                Error::config_for_field(cluster, role.field(), "elasticsearch backend is not set")
            })?;
            let mut indices = vec![es.indices.visibility.clone()];
            indices.extend(es.indices.secondary_visibility.clone());
            (
                ELASTICSEARCH_TEMPLATE,
                context! {
                    step => step_name,
                    store => &store.name,
                    url => es.url.trim_end_matches('/'),
                    username => &es.username,
                    version => &es.version,
                    indices => indices,
                    tls => tls_context(store),
                },
            )
        }
        DatastoreType::Unknown => {
            return Err(Error::config_for_field(
                cluster,
                role.field(),
                "exactly one of sql, cassandra or elasticsearch must be set",
            ));
        }
    };

    env.add_template("script", template).map_err(template_error)?;
    env.get_template("script")
        .and_then(|t| t.render(ctx))
        .map_err(template_error)
}

/// Every script of the cluster keyed by file name
pub fn render_scripts(ctx: &ClusterContext) -> Result<BTreeMap<String, String>, Error> {
    let mut scripts = BTreeMap::new();
    for (role, store) in ctx.spec.persistence.stores() {
        for step in SchemaStep::ALL {
            scripts.insert(
                step.script_name(&store.name),
                render_script(&ctx.name, role, store, step)?,
            );
        }
    }
    Ok(scripts)
}

/// `<cluster>-schema-scripts`
pub struct SchemaScriptsBuilder {
    ctx: Arc<ClusterContext>,
}

impl SchemaScriptsBuilder {
    /// Builder for the cluster in `ctx`
    pub fn new(ctx: Arc<ClusterContext>) -> Self {
        Self { ctx }
    }

    fn name(&self) -> String {
        naming::schema_scripts(&self.ctx.name)
    }
}

impl ResourceBuilder for SchemaScriptsBuilder {
    fn key(&self) -> ResourceKey {
        ResourceKey::new("ConfigMap", self.name())
    }

    fn api_resource(&self) -> ApiResource {
        build_api_resource("v1", "ConfigMap")
    }

    fn build(&self) -> DynamicObject {
        stub(&self.api_resource(), &self.name(), &self.ctx.namespace)
    }

    fn update(
        &self,
        object: &mut DynamicObject,
        _observed: &ObservedState,
    ) -> Result<UpdateOutcome, Error> {
        let desired = ConfigMap {
            metadata: self.ctx.object_meta(&self.name(), "schema"),
            data: Some(render_scripts(&self.ctx)?),
            ..Default::default()
        };
        merge_typed(object, &desired)?;
        Ok(UpdateOutcome::Applied)
    }
}
