//! Temporal server configuration
//!
//! Renders `config_template.yaml` from the normalized spec. Secrets never
//! land in the file: each datastore password is a template placeholder the
//! server image fills from the environment at startup.

pub mod model;

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::DynamicObject;
use kube::discovery::ApiResource;

use temporal_common::crd::{
    ArchivalSpec, ArchivalTarget, DatastoreRole, DatastoreSpec, DatastoreType, ServiceName,
    TrafficDomain,
};
use temporal_common::defaults::DEFAULT_CONNECT_PROTOCOL;
use temporal_common::kube_utils::build_api_resource;
use temporal_common::{naming, Error, Version};

use crate::builder::{
    merge_typed, stub, ObservedState, ResourceBuilder, ResourceKey, UpdateOutcome,
};
use crate::meta::ClusterContext;
use crate::mtls::{self, CA_CERT_FILE, TLS_CERT_FILE, TLS_KEY_FILE};
use model::*;

/// Key of the server config inside the ConfigMap
pub const CONFIG_KEY: &str = "config_template.yaml";

/// Directory the server config is mounted at
pub const CONFIG_MOUNT_PATH: &str = "/etc/temporal/config";

/// Directory the dynamic config is mounted at
pub const DYNAMIC_CONFIG_MOUNT_PATH: &str = "/etc/temporal/dynamic_config";

/// Key of the dynamic config inside its ConfigMap
pub const DYNAMIC_CONFIG_KEY: &str = "dynamic_config.yaml";

/// First release whose frontends serve the HTTP API
pub const HTTP_API_MIN_VERSION: Version = Version::new(1, 22, 0);

/// Whether the frontends serve the HTTP API at this version
pub fn http_api_enabled(ctx: &ClusterContext) -> bool {
    ctx.version.greater_or_equal(&HTTP_API_MIN_VERSION)
}

/// Placeholder the server image replaces with the store's password
pub fn password_placeholder(store: &DatastoreSpec) -> String {
    format!("{{{{ .Env.{} }}}}", store.password_env_var())
}

/// Build the server config model
pub fn build_config(ctx: &ClusterContext) -> Result<ServerConfig, Error> {
    let spec = &ctx.spec;
    let persistence = &spec.persistence;

    let mut datastores = BTreeMap::new();
    for (role, store) in persistence.stores() {
        datastores.insert(store.name.clone(), datastore_config(ctx, role, store)?);
    }

    let mut services = BTreeMap::new();
    for name in spec.enabled_services() {
        let svc = spec.service(name);
        let http_port = match name {
            ServiceName::Frontend | ServiceName::InternalFrontend if http_api_enabled(ctx) => {
                svc.http_port
            }
            _ => None,
        };
        services.insert(
            name.as_str().to_string(),
            ServiceConfig {
                rpc: RpcConfig {
                    grpc_port: svc.port,
                    membership_port: svc.membership_port,
                    bind_on_ip: "0.0.0.0".to_string(),
                    http_port,
                },
            },
        );
    }

    let frontend_address = frontend_address(ctx);
    let cluster_metadata = ClusterMetadata {
        enable_global_namespace: false,
        failover_version_increment: 10,
        master_cluster_name: ctx.name.clone(),
        current_cluster_name: ctx.name.clone(),
        cluster_information: BTreeMap::from([(
            ctx.name.clone(),
            ClusterInformation {
                enabled: true,
                initial_failover_version: 1,
                rpc_name: ServiceName::Frontend.as_str().to_string(),
                rpc_address: frontend_address.clone(),
            },
        )]),
    };

    let (archival, namespace_defaults) = match spec.archival.as_ref().filter(|a| a.enabled) {
        Some(a) => (Some(archival_config(a)), Some(namespace_defaults(a))),
        None => (None, None),
    };

    let poll_interval = spec
        .dynamic_config
        .as_ref()
        .map(|d| d.poll_interval().to_string())
        .unwrap_or_else(|| temporal_common::crd::DEFAULT_POLL_INTERVAL.to_string());

    Ok(ServerConfig {
        log: LogConfig {
            stdout: true,
            level: "info".to_string(),
        },
        persistence: PersistenceConfig {
            default_store: persistence.default_store.name.clone(),
            visibility_store: persistence.visibility_store.as_ref().map(|s| s.name.clone()),
            secondary_visibility_store: persistence
                .secondary_visibility_store
                .as_ref()
                .map(|s| s.name.clone()),
            advanced_visibility_store: persistence
                .advanced_visibility_store
                .as_ref()
                .map(|s| s.name.clone()),
            num_history_shards: spec.num_history_shards,
            datastores,
        },
        global: GlobalConfig {
            membership: MembershipConfig {
                max_join_duration: "30s".to_string(),
                broadcast_address: "{{ default .Env.POD_IP \"0.0.0.0\" }}".to_string(),
            },
            tls: tls_config(ctx),
            metrics: spec.metrics_port().map(|port| MetricsConfig {
                prometheus: PrometheusConfig {
                    timer_type: "histogram".to_string(),
                    listen_address: format!("0.0.0.0:{port}"),
                },
            }),
        },
        services,
        cluster_metadata,
        dc_redirection_policy: DcRedirectionPolicy {
            policy: "noop".to_string(),
        },
        archival,
        namespace_defaults,
        dynamic_config_client: DynamicConfigClient {
            filepath: format!("{DYNAMIC_CONFIG_MOUNT_PATH}/{DYNAMIC_CONFIG_KEY}"),
            poll_interval,
        },
        // With an internal frontend the worker service finds it through
        // membership instead.
        public_client: (!spec.internal_frontend_enabled()).then(|| PublicClient {
            host_port: frontend_address,
        }),
    })
}

/// Render `config_template.yaml`
pub fn render_config(ctx: &ClusterContext) -> Result<String, Error> {
    let config = build_config(ctx)?;
    serde_yaml::to_string(&config)
        .map_err(|e| Error::serialization_for_kind("ServerConfig", e.to_string()))
}

/// `<frontend service dns>:<port>`
pub fn frontend_address(ctx: &ClusterContext) -> String {
    let svc = naming::frontend_service(&ctx.name, ServiceName::Frontend);
    format!(
        "{}:{}",
        naming::service_dns(&svc, &ctx.namespace),
        ctx.spec.service(ServiceName::Frontend).port
    )
}

fn datastore_config(
    ctx: &ClusterContext,
    role: DatastoreRole,
    store: &DatastoreSpec,
) -> Result<DatastoreConfig, Error> {
    let field = |suffix: &str| format!("{}.{suffix}", role.field());
    let password = store
        .password_secret_ref
        .as_ref()
        .map(|_| password_placeholder(store));
    let tls = datastore_tls(store);

    let mut config = DatastoreConfig::default();
    match store.datastore_type() {
        DatastoreType::Sql => {
            let Some(sql) = store.sql.as_ref() else {
                return Err(Error::internal("sql datastore without sql settings"));
            };
            if sql.host_port().is_none() {
                return Err(Error::config_for_field(
                    &ctx.name,
                    field("sql.connectAddr"),
                    format!(
                        "connectAddr '{}' of datastore {} must be host:port",
                        sql.connect_addr, store.name
                    ),
                ));
            }
            config.sql = Some(SqlConfig {
                plugin_name: sql.plugin_name.clone(),
                database_name: sql.database_name.clone(),
                connect_addr: sql.connect_addr.clone(),
                connect_protocol: sql
                    .connect_protocol
                    .clone()
                    .unwrap_or_else(|| DEFAULT_CONNECT_PROTOCOL.to_string()),
                user: sql.user.clone(),
                password: password.unwrap_or_default(),
                max_conns: sql.max_conns,
                max_idle_conns: sql.max_idle_conns,
                max_conn_lifetime: sql.max_conn_lifetime.clone(),
                connect_attributes: sql.connect_attributes.clone(),
                tls,
            });
        }
        DatastoreType::Cassandra => {
            let Some(cassandra) = store.cassandra.as_ref() else {
                return Err(Error::internal("cassandra datastore without cassandra settings"));
            };
            if cassandra.hosts.is_empty() {
                return Err(Error::config_for_field(
                    &ctx.name,
                    field("cassandra.hosts"),
                    format!("datastore {} has no cassandra hosts", store.name),
                ));
            }
            config.cassandra = Some(CassandraConfig {
                hosts: cassandra.hosts.join(","),
                port: cassandra
                    .port
                    .unwrap_or(temporal_common::defaults::DEFAULT_CASSANDRA_PORT),
                keyspace: cassandra.keyspace.clone(),
                user: cassandra.user.clone(),
                password: password.unwrap_or_default(),
                datacenter: cassandra.datacenter.clone(),
                replication_factor: cassandra.replication_factor.unwrap_or(1),
                consistency: cassandra.consistency.as_ref().map(|c| CassandraConsistencyConfig {
                    default: CassandraConsistencySettings {
                        consistency: c.consistency.clone(),
                        serial_consistency: c.serial_consistency.clone(),
                    },
                }),
                tls,
            });
        }
        DatastoreType::Elasticsearch => {
            let Some(es) = store.elasticsearch.as_ref() else {
                return Err(Error::internal("elasticsearch datastore without settings"));
            };
            let Some((scheme, host)) = es.url.split_once("://") else {
                return Err(Error::config_for_field(
                    &ctx.name,
                    field("elasticsearch.url"),
                    format!("url '{}' of datastore {} has no scheme", es.url, store.name),
                ));
            };
            let mut indices = BTreeMap::from([(
                "visibility".to_string(),
                es.indices.visibility.clone(),
            )]);
            if let Some(secondary) = &es.indices.secondary_visibility {
                indices.insert("secondary_visibility".to_string(), secondary.clone());
            }
            config.elasticsearch = Some(ElasticsearchConfig {
                version: es.version.clone(),
                url: ElasticsearchUrl {
                    scheme: scheme.to_string(),
                    host: host.trim_end_matches('/').to_string(),
                },
                username: es.username.clone(),
                password,
                indices,
                tls,
            });
        }
        DatastoreType::Unknown => {
            return Err(Error::config_for_field(
                &ctx.name,
                role.field(),
                format!(
                    "datastore {} must set exactly one of sql, cassandra or elasticsearch",
                    store.name
                ),
            ));
        }
    }
    Ok(config)
}

fn datastore_tls(store: &DatastoreSpec) -> Option<DatastoreTlsConfig> {
    let tls = store.tls.as_ref().filter(|t| t.enabled)?;
    let dir = store.tls_mount_path();
    let path = |file: &str| format!("{dir}/{file}");
    Some(DatastoreTlsConfig {
        enabled: true,
        ca_file: tls.ca_file_ref.as_ref().map(|_| path("ca.pem")),
        cert_file: tls.cert_file_ref.as_ref().map(|_| path("client.pem")),
        key_file: tls.key_file_ref.as_ref().map(|_| path("client.key")),
        enable_host_verification: tls.enable_host_verification,
        server_name: tls.server_name.clone(),
    })
}

fn tls_config(ctx: &ClusterContext) -> Option<RootTlsConfig> {
    let mtls = ctx.spec.mtls.as_ref().filter(|m| m.uses_cert_manager())?;

    let group = |domain: TrafficDomain| {
        let dir = mtls::certs_mount_path(domain);
        GroupTlsConfig {
            server: ServerTlsConfig {
                cert_file: format!("{dir}/{TLS_CERT_FILE}"),
                key_file: format!("{dir}/{TLS_KEY_FILE}"),
                require_client_auth: true,
                client_ca_files: vec![format!("{dir}/{CA_CERT_FILE}")],
            },
            client: ClientTlsConfig {
                server_name: naming::server_name(&ctx.name, domain),
                root_ca_files: vec![format!("{dir}/{CA_CERT_FILE}")],
            },
        }
    };

    let frontend = mtls.frontend_enabled();
    Some(RootTlsConfig {
        refresh_interval: mtls.refresh_interval().to_string(),
        internode: mtls.internode_enabled().then(|| group(TrafficDomain::Internode)),
        frontend: frontend.then(|| group(TrafficDomain::Frontend)),
        system_worker: frontend.then(|| {
            let dir = mtls::WORKER_CERTS_MOUNT_PATH;
            WorkerTlsConfig {
                cert_file: format!("{dir}/{TLS_CERT_FILE}"),
                key_file: format!("{dir}/{TLS_KEY_FILE}"),
                client: ClientTlsConfig {
                    server_name: naming::server_name(&ctx.name, TrafficDomain::Frontend),
                    root_ca_files: vec![format!("{dir}/{CA_CERT_FILE}")],
                },
            }
        }),
    })
}

fn archival_config(spec: &ArchivalSpec) -> ArchivalConfig {
    let provider = &spec.provider;
    let provider_config = ArchiverProviderConfig {
        filestore: provider.filestore.as_ref().map(|f| FilestoreConfig {
            file_mode: f.file_permissions.clone(),
            dir_mode: f.dir_permissions.clone(),
        }),
        s3store: provider.s3.as_ref().map(|s| S3Config {
            region: s.region.clone(),
            endpoint: s.endpoint.clone(),
        }),
        gstorage: provider.gcs.as_ref().map(|g| GcsConfig {
            credentials_path: g.credentials_file_path.clone(),
        }),
    };
    let section = |target: Option<&ArchivalTarget>| match target.filter(|t| t.enabled) {
        Some(t) => ArchivalSection {
            state: "enabled".to_string(),
            enable_read: t.enable_read,
            provider: Some(provider_config.clone()),
        },
        None => ArchivalSection {
            state: "disabled".to_string(),
            enable_read: false,
            provider: None,
        },
    };
    ArchivalConfig {
        history: section(spec.history.as_ref()),
        visibility: section(spec.visibility.as_ref()),
    }
}

fn namespace_defaults(spec: &ArchivalSpec) -> NamespaceDefaults {
    let scheme = spec.provider.scheme().unwrap_or("file");
    let section = |target: Option<&ArchivalTarget>| match target {
        Some(t) if t.enabled && t.namespace_default => NamespaceArchivalSection {
            state: "enabled".to_string(),
            uri: Some(format!("{scheme}://{}", t.path)),
        },
        Some(t) => NamespaceArchivalSection {
            state: "disabled".to_string(),
            uri: Some(format!("{scheme}://{}", t.path)),
        },
        None => NamespaceArchivalSection {
            state: "disabled".to_string(),
            uri: None,
        },
    };
    NamespaceDefaults {
        archival: NamespaceArchival {
            history: section(spec.history.as_ref()),
            visibility: section(spec.visibility.as_ref()),
        },
    }
}

// =============================================================================
// ConfigMap builder
// =============================================================================

/// `<cluster>-config` holding the rendered server config
pub struct ServerConfigBuilder {
    ctx: std::sync::Arc<ClusterContext>,
}

impl ServerConfigBuilder {
    /// Builder for the cluster in `ctx`
    pub fn new(ctx: std::sync::Arc<ClusterContext>) -> Self {
        Self { ctx }
    }

    fn name(&self) -> String {
        naming::config_map(&self.ctx.name)
    }
}

impl ResourceBuilder for ServerConfigBuilder {
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
            metadata: self.ctx.object_meta(&self.name(), "config"),
            data: Some(BTreeMap::from([(
                CONFIG_KEY.to_string(),
                render_config(&self.ctx)?,
            )])),
            ..Default::default()
        };
        merge_typed(object, &desired)?;
        Ok(UpdateOutcome::Applied)
    }
}
