//! Persistence topology: up to four named datastores per cluster

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Datastore bindings for a cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersistenceSpec {
    /// Store holding workflow execution state
    pub default_store: DatastoreSpec,

    /// Standard visibility store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility_store: Option<DatastoreSpec>,

    /// Secondary visibility store used during visibility migrations (>= 1.21.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_visibility_store: Option<DatastoreSpec>,

    /// Elasticsearch-backed advanced visibility store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advanced_visibility_store: Option<DatastoreSpec>,
}

impl PersistenceSpec {
    /// All configured stores with their role, in a stable order
    pub fn stores(&self) -> Vec<(DatastoreRole, &DatastoreSpec)> {
        let mut stores = vec![(DatastoreRole::Default, &self.default_store)];
        if let Some(s) = &self.visibility_store {
            stores.push((DatastoreRole::Visibility, s));
        }
        if let Some(s) = &self.secondary_visibility_store {
            stores.push((DatastoreRole::SecondaryVisibility, s));
        }
        if let Some(s) = &self.advanced_visibility_store {
            stores.push((DatastoreRole::AdvancedVisibility, s));
        }
        stores
    }

    /// Mutable access to all configured stores
    pub fn stores_mut(&mut self) -> Vec<&mut DatastoreSpec> {
        let mut stores = vec![&mut self.default_store];
        stores.extend(self.visibility_store.as_mut());
        stores.extend(self.secondary_visibility_store.as_mut());
        stores.extend(self.advanced_visibility_store.as_mut());
        stores
    }
}

/// The role a datastore plays in the server's persistence config
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DatastoreRole {
    /// Execution state
    Default,
    /// Standard visibility
    Visibility,
    /// Secondary (dual-write) visibility
    SecondaryVisibility,
    /// Elasticsearch advanced visibility
    AdvancedVisibility,
}

impl DatastoreRole {
    /// Field path of this store under `spec.persistence`
    pub fn field(&self) -> &'static str {
        match self {
            Self::Default => "spec.persistence.defaultStore",
            Self::Visibility => "spec.persistence.visibilityStore",
            Self::SecondaryVisibility => "spec.persistence.secondaryVisibilityStore",
            Self::AdvancedVisibility => "spec.persistence.advancedVisibilityStore",
        }
    }

    /// Whether the store holds visibility records rather than executions
    pub fn is_visibility(&self) -> bool {
        !matches!(self, Self::Default)
    }
}

/// One persistence backend binding
///
/// Exactly one of `sql`, `cassandra` or `elasticsearch` must be set.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DatastoreSpec {
    /// Store name, unique within the cluster. Keys env vars and TLS mounts.
    pub name: String,

    /// SQL (PostgreSQL, MySQL) backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<SqlSpec>,

    /// Cassandra backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cassandra: Option<CassandraSpec>,

    /// Elasticsearch backend (advanced visibility only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elasticsearch: Option<ElasticsearchSpec>,

    /// Secret key holding the datastore password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_secret_ref: Option<SecretKeyReference>,

    /// TLS settings for connecting to the datastore
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<DatastoreTlsSpec>,

    /// The database/keyspace already exists: skip the create job
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub skip_create: bool,
}

/// Which backend a datastore uses
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum DatastoreType {
    /// PostgreSQL or MySQL
    #[serde(rename = "sql")]
    Sql,
    /// Cassandra
    #[serde(rename = "cassandra")]
    Cassandra,
    /// Elasticsearch
    #[serde(rename = "elasticsearch")]
    Elasticsearch,
    /// No backend or more than one backend configured
    #[default]
    #[serde(rename = "unknown")]
    Unknown,
}

impl std::fmt::Display for DatastoreType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sql => write!(f, "sql"),
            Self::Cassandra => write!(f, "cassandra"),
            Self::Elasticsearch => write!(f, "elasticsearch"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl DatastoreSpec {
    /// Backend discriminated by which sub-config is populated
    pub fn datastore_type(&self) -> DatastoreType {
        match (
            self.sql.is_some(),
            self.cassandra.is_some(),
            self.elasticsearch.is_some(),
        ) {
            (true, false, false) => DatastoreType::Sql,
            (false, true, false) => DatastoreType::Cassandra,
            (false, false, true) => DatastoreType::Elasticsearch,
            _ => DatastoreType::Unknown,
        }
    }

    /// Env var carrying this store's password into server pods
    pub fn password_env_var(&self) -> String {
        password_env_var(&self.name)
    }

    /// Mount directory for this store's TLS material
    pub fn tls_mount_path(&self) -> String {
        format!("/etc/tls/datastores/{}", self.name)
    }

    /// Whether TLS is enabled for this store
    pub fn tls_enabled(&self) -> bool {
        self.tls.as_ref().is_some_and(|t| t.enabled)
    }
}

/// `TEMPORAL_<UPPER(SLUG(name))>_DATASTORE_PASSWORD`
///
/// Every run of characters outside `[A-Za-z0-9]` collapses to a single `_`.
pub fn password_env_var(store_name: &str) -> String {
    let mut slug = String::with_capacity(store_name.len());
    let mut pending_sep = false;
    for c in store_name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.push(c.to_ascii_uppercase());
        } else {
            pending_sep = true;
        }
    }
    format!("TEMPORAL_{slug}_DATASTORE_PASSWORD")
}

/// SQL backend connection
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SqlSpec {
    /// Driver plugin: `postgres12`, `postgres12_pgx` or `mysql8`
    pub plugin_name: String,

    /// `host:port` of the database server
    pub connect_addr: String,

    /// Connection protocol, `tcp` unless set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_protocol: Option<String>,

    /// Database name
    pub database_name: String,

    /// Database user
    pub user: String,

    /// Maximum open connections
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_conns: Option<i32>,

    /// Maximum idle connections
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_idle_conns: Option<i32>,

    /// Maximum connection lifetime (Go duration)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_conn_lifetime: Option<String>,

    /// Driver-specific connection attributes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub connect_attributes: BTreeMap<String, String>,
}

impl SqlSpec {
    /// Split `connectAddr` into host and port
    ///
    /// Returns `None` when the port is missing or not a number.
    pub fn host_port(&self) -> Option<(&str, u16)> {
        let (host, port) = self.connect_addr.rsplit_once(':')?;
        if host.is_empty() {
            return None;
        }
        let port = port.parse::<u16>().ok()?;
        Some((host, port))
    }

    /// Whether the plugin targets PostgreSQL
    pub fn is_postgres(&self) -> bool {
        self.plugin_name.starts_with("postgres")
    }
}

/// Cassandra backend connection
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CassandraSpec {
    /// Contact points
    pub hosts: Vec<String>,

    /// CQL port, 9042 unless set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,

    /// Keyspace
    pub keyspace: String,

    /// User
    pub user: String,

    /// Local datacenter
    pub datacenter: String,

    /// Replication factor used when the keyspace is created, 1 unless set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_factor: Option<i32>,

    /// Read/write consistency
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consistency: Option<CassandraConsistency>,
}

/// Cassandra consistency levels
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CassandraConsistency {
    /// Default consistency (e.g. `LOCAL_QUORUM`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consistency: Option<String>,
    /// Serial consistency (e.g. `LOCAL_SERIAL`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_consistency: Option<String>,
}

/// Elasticsearch backend connection
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ElasticsearchSpec {
    /// Elasticsearch major version, `v7` or `v8`
    pub version: String,

    /// Base URL (`http://elasticsearch:9200`)
    pub url: String,

    /// User
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Index names
    pub indices: ElasticsearchIndices,
}

/// Elasticsearch index names
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ElasticsearchIndices {
    /// Visibility index
    pub visibility: String,
    /// Secondary visibility index
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_visibility: Option<String>,
}

/// Reference to one key of a Secret in the cluster's namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyReference {
    /// Secret name
    pub name: String,
    /// Key within the secret
    pub key: String,
}

/// TLS settings for a datastore connection
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DatastoreTlsSpec {
    /// Enable TLS
    #[serde(default)]
    pub enabled: bool,

    /// CA bundle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_file_ref: Option<SecretKeyReference>,

    /// Client certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_file_ref: Option<SecretKeyReference>,

    /// Client key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_file_ref: Option<SecretKeyReference>,

    /// Verify the server hostname
    #[serde(default)]
    pub enable_host_verification: bool,

    /// Expected server name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
}

impl DatastoreTlsSpec {
    /// Referenced secret keys paired with the file name they mount as
    pub fn file_refs(&self) -> Vec<(&'static str, &SecretKeyReference)> {
        let mut refs = Vec::new();
        if let Some(r) = &self.ca_file_ref {
            refs.push(("ca.pem", r));
        }
        if let Some(r) = &self.cert_file_ref {
            refs.push(("client.pem", r));
        }
        if let Some(r) = &self.key_file_ref {
            refs.push(("client.key", r));
        }
        refs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn sql(addr: &str) -> SqlSpec {
        SqlSpec {
            plugin_name: "postgres12".to_string(),
            connect_addr: addr.to_string(),
            database_name: "temporal".to_string(),
            user: "temporal".to_string(),
            ..Default::default()
        }
    }

    #[rstest]
    #[case("default", "TEMPORAL_DEFAULT_DATASTORE_PASSWORD")]
    #[case("visibility", "TEMPORAL_VISIBILITY_DATASTORE_PASSWORD")]
    #[case("es-visibility", "TEMPORAL_ES_VISIBILITY_DATASTORE_PASSWORD")]
    #[case("my.store--2", "TEMPORAL_MY_STORE_2_DATASTORE_PASSWORD")]
    fn password_env_var_slugs_name(#[case] name: &str, #[case] expected: &str) {
        assert_eq!(password_env_var(name), expected);
    }

    #[test]
    fn type_is_discriminated_by_populated_backend() {
        let mut store = DatastoreSpec {
            name: "default".to_string(),
            ..Default::default()
        };
        assert_eq!(store.datastore_type(), DatastoreType::Unknown);

        store.sql = Some(sql("postgres:5432"));
        assert_eq!(store.datastore_type(), DatastoreType::Sql);

        store.cassandra = Some(CassandraSpec::default());
        assert_eq!(store.datastore_type(), DatastoreType::Unknown);

        store.sql = None;
        assert_eq!(store.datastore_type(), DatastoreType::Cassandra);
    }

    #[test]
    fn sql_address_requires_port() {
        assert_eq!(sql("postgres:5432").host_port(), Some(("postgres", 5432)));
        assert_eq!(sql("postgres").host_port(), None);
        assert_eq!(sql("postgres:abc").host_port(), None);
        assert_eq!(sql(":5432").host_port(), None);
    }

    #[test]
    fn stores_are_listed_with_roles() {
        let persistence = PersistenceSpec {
            default_store: DatastoreSpec {
                name: "default".to_string(),
                ..Default::default()
            },
            visibility_store: Some(DatastoreSpec {
                name: "visibility".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };
        let roles: Vec<_> = persistence.stores().into_iter().map(|(r, _)| r).collect();
        assert_eq!(roles, vec![DatastoreRole::Default, DatastoreRole::Visibility]);
        assert!(DatastoreRole::Visibility.is_visibility());
        assert!(!DatastoreRole::Default.is_visibility());
    }
}
