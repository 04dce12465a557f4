//! Serde model of the Temporal server configuration file
//!
//! Only the sections the operator writes are modelled. Field names follow
//! the server's YAML keys.

use std::collections::BTreeMap;

use serde::Serialize;

/// Root of `config_template.yaml`
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    pub log: LogConfig,
    pub persistence: PersistenceConfig,
    pub global: GlobalConfig,
    pub services: BTreeMap<String, ServiceConfig>,
    pub cluster_metadata: ClusterMetadata,
    pub dc_redirection_policy: DcRedirectionPolicy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archival: Option<ArchivalConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace_defaults: Option<NamespaceDefaults>,
    pub dynamic_config_client: DynamicConfigClient,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_client: Option<PublicClient>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct LogConfig {
    pub stdout: bool,
    pub level: String,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersistenceConfig {
    pub default_store: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility_store: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_visibility_store: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advanced_visibility_store: Option<String>,
    pub num_history_shards: i32,
    pub datastores: BTreeMap<String, DatastoreConfig>,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct DatastoreConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<SqlConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cassandra: Option<CassandraConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elasticsearch: Option<ElasticsearchConfig>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SqlConfig {
    pub plugin_name: String,
    pub database_name: String,
    pub connect_addr: String,
    pub connect_protocol: String,
    pub user: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_conns: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_idle_conns: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_conn_lifetime: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub connect_attributes: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<DatastoreTlsConfig>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CassandraConfig {
    pub hosts: String,
    pub port: i32,
    pub keyspace: String,
    pub user: String,
    pub password: String,
    pub datacenter: String,
    pub replication_factor: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consistency: Option<CassandraConsistencyConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<DatastoreTlsConfig>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct CassandraConsistencyConfig {
    pub default: CassandraConsistencySettings,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CassandraConsistencySettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consistency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_consistency: Option<String>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ElasticsearchConfig {
    pub version: String,
    pub url: ElasticsearchUrl,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub indices: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<DatastoreTlsConfig>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ElasticsearchUrl {
    pub scheme: String,
    pub host: String,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DatastoreTlsConfig {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_file: Option<String>,
    pub enable_host_verification: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct GlobalConfig {
    pub membership: MembershipConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<RootTlsConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsConfig>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MembershipConfig {
    pub max_join_duration: String,
    pub broadcast_address: String,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RootTlsConfig {
    pub refresh_interval: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub internode: Option<GroupTlsConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frontend: Option<GroupTlsConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_worker: Option<WorkerTlsConfig>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct GroupTlsConfig {
    pub server: ServerTlsConfig,
    pub client: ClientTlsConfig,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerTlsConfig {
    pub cert_file: String,
    pub key_file: String,
    pub require_client_auth: bool,
    pub client_ca_files: Vec<String>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientTlsConfig {
    pub server_name: String,
    pub root_ca_files: Vec<String>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkerTlsConfig {
    pub cert_file: String,
    pub key_file: String,
    pub client: ClientTlsConfig,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct MetricsConfig {
    pub prometheus: PrometheusConfig,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PrometheusConfig {
    pub timer_type: String,
    pub listen_address: String,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ServiceConfig {
    pub rpc: RpcConfig,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RpcConfig {
    pub grpc_port: i32,
    pub membership_port: i32,
    #[serde(rename = "bindOnIP")]
    pub bind_on_ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_port: Option<i32>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterMetadata {
    pub enable_global_namespace: bool,
    pub failover_version_increment: i64,
    pub master_cluster_name: String,
    pub current_cluster_name: String,
    pub cluster_information: BTreeMap<String, ClusterInformation>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInformation {
    pub enabled: bool,
    pub initial_failover_version: i64,
    pub rpc_name: String,
    pub rpc_address: String,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct DcRedirectionPolicy {
    pub policy: String,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ArchivalConfig {
    pub history: ArchivalSection,
    pub visibility: ArchivalSection,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ArchivalSection {
    pub state: String,
    pub enable_read: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ArchiverProviderConfig>,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct ArchiverProviderConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filestore: Option<FilestoreConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s3store: Option<S3Config>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gstorage: Option<GcsConfig>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FilestoreConfig {
    pub file_mode: String,
    pub dir_mode: String,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct S3Config {
    pub region: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GcsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials_path: Option<String>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct NamespaceDefaults {
    pub archival: NamespaceArchival,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct NamespaceArchival {
    pub history: NamespaceArchivalSection,
    pub visibility: NamespaceArchivalSection,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct NamespaceArchivalSection {
    pub state: String,
    #[serde(rename = "URI", skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DynamicConfigClient {
    pub filepath: String,
    pub poll_interval: String,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublicClient {
    pub host_port: String,
}
