//! Custom Resource Definitions for the Temporal operator

mod archival;
mod client;
mod cluster;
mod conditions;
mod dynamic_config;
mod mtls;
mod persistence;

pub use archival::{
    ArchivalProvider, ArchivalSpec, ArchivalTarget, FilestoreArchiver, GcsArchiver, S3Archiver,
};
pub use client::{
    ClusterReference, SecretReference, TemporalClusterClient, TemporalClusterClientSpec,
    TemporalClusterClientStatus,
};
pub use cluster::{
    AdminToolsSpec, DatastoreStatus, IngressSpec, MetricsSpec, ServiceName, ServiceSpec,
    ServiceStatus, ServicesSpec, TemporalCluster, TemporalClusterSpec, TemporalClusterStatus,
    UiSpec,
};
pub use conditions::{
    Condition, ConditionSet, ConditionStatus, CONDITION_READY, CONDITION_RECONCILE_ERROR,
    CONDITION_RECONCILE_SUCCESS,
};
pub use dynamic_config::{
    ConstrainedValue, Constraints, DynamicConfigSpec, DEFAULT_POLL_INTERVAL, TASK_TYPES,
};
pub use mtls::{
    CertificatesDuration, DomainSpec, MtlsProvider, MtlsSpec, TrafficDomain,
    DEFAULT_INTERMEDIATE_CA_DURATION, DEFAULT_LEAF_DURATION, DEFAULT_REFRESH_INTERVAL,
    DEFAULT_ROOT_CA_DURATION, MIN_RENEW_BEFORE,
};
pub use persistence::{
    password_env_var, CassandraConsistency, CassandraSpec, DatastoreRole, DatastoreSpec,
    DatastoreTlsSpec, DatastoreType, ElasticsearchIndices, ElasticsearchSpec, PersistenceSpec,
    SecretKeyReference, SqlSpec,
};

use schemars::gen::SchemaGenerator;
use schemars::schema::{Schema, SchemaObject};

/// Schema for free-form JSON fields
///
/// Structural CRD schemas reject an empty schema; this marks the field so
/// the API server keeps whatever the user wrote.
pub(crate) fn preserve_unknown_fields(_: &mut SchemaGenerator) -> Schema {
    let mut schema = SchemaObject::default();
    schema.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        serde_json::Value::Bool(true),
    );
    Schema::Object(schema)
}
