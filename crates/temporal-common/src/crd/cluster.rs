//! TemporalCluster Custom Resource Definition
//!
//! A TemporalCluster declares one Temporal server deployment: its version,
//! the services to run, the datastores to use and the optional UI, admin
//! tools and mTLS material around it. The operator owns every child object
//! it creates for the cluster through a controller owner reference, so
//! deleting the TemporalCluster cascades.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{LocalObjectReference, ResourceRequirements};
use k8s_openapi::api::networking::v1::IngressTLS;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::archival::ArchivalSpec;
use super::conditions::{Condition, ConditionSet};
use super::dynamic_config::DynamicConfigSpec;
use super::mtls::MtlsSpec;
use super::persistence::{DatastoreType, PersistenceSpec};
use crate::version::{Version, VersionError};

/// Specification for a TemporalCluster
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "temporal.io",
    version = "v1beta1",
    kind = "TemporalCluster",
    plural = "temporalclusters",
    shortname = "tc",
    status = "TemporalClusterStatus",
    namespaced,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".status.version"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TemporalClusterSpec {
    /// Temporal server version (e.g. "1.18.4")
    pub version: String,

    /// Server image repository, `temporalio/server` unless set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Pull secrets for every workload of the cluster
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<LocalObjectReference>,

    /// Number of history shards. Immutable once the cluster exists.
    pub num_history_shards: i32,

    /// Seconds finished schema jobs are kept before garbage collection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_ttl_seconds_after_finished: Option<i32>,

    /// Resources for schema jobs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_resources: Option<ResourceRequirements>,

    /// Per-service overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<ServicesSpec>,

    /// Datastores
    pub persistence: PersistenceSpec,

    /// Web UI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui: Option<UiSpec>,

    /// Admin tools pod (tctl, temporal CLI)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admintools: Option<AdminToolsSpec>,

    /// Mutual TLS
    #[serde(rename = "mTLS", default, skip_serializing_if = "Option::is_none")]
    pub mtls: Option<MtlsSpec>,

    /// Dynamic configuration overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic_config: Option<DynamicConfigSpec>,

    /// Archival
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archival: Option<ArchivalSpec>,

    /// Prometheus metrics endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsSpec>,
}

/// A Temporal server service
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ServiceName {
    /// Client-facing gRPC gateway
    Frontend,
    /// Frontend for internal callers (worker service), >= 1.20.0
    InternalFrontend,
    /// Workflow state machine
    History,
    /// Task queue dispatch
    Matching,
    /// System workflows
    Worker,
}

impl ServiceName {
    /// All services in rollout order
    pub const ALL: [ServiceName; 5] = [
        ServiceName::Frontend,
        ServiceName::InternalFrontend,
        ServiceName::History,
        ServiceName::Matching,
        ServiceName::Worker,
    ];

    /// Name as used by the server and in resource names
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Frontend => "frontend",
            Self::InternalFrontend => "internal-frontend",
            Self::History => "history",
            Self::Matching => "matching",
            Self::Worker => "worker",
        }
    }

    /// Field path of the service's overrides
    pub fn field(&self) -> &'static str {
        match self {
            Self::Frontend => "spec.services.frontend",
            Self::InternalFrontend => "spec.services.internalFrontend",
            Self::History => "spec.services.history",
            Self::Matching => "spec.services.matching",
            Self::Worker => "spec.services.worker",
        }
    }
}

impl std::fmt::Display for ServiceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-service overrides
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServicesSpec {
    /// Frontend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frontend: Option<ServiceSpec>,
    /// Internal frontend (disabled unless `enabled: true`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_frontend: Option<ServiceSpec>,
    /// History
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<ServiceSpec>,
    /// Matching
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matching: Option<ServiceSpec>,
    /// Worker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<ServiceSpec>,
}

impl ServicesSpec {
    /// Overrides for one service
    pub fn get(&self, name: ServiceName) -> Option<&ServiceSpec> {
        match name {
            ServiceName::Frontend => self.frontend.as_ref(),
            ServiceName::InternalFrontend => self.internal_frontend.as_ref(),
            ServiceName::History => self.history.as_ref(),
            ServiceName::Matching => self.matching.as_ref(),
            ServiceName::Worker => self.worker.as_ref(),
        }
    }

    /// Mutable slot for one service
    pub fn slot_mut(&mut self, name: ServiceName) -> &mut Option<ServiceSpec> {
        match name {
            ServiceName::Frontend => &mut self.frontend,
            ServiceName::InternalFrontend => &mut self.internal_frontend,
            ServiceName::History => &mut self.history,
            ServiceName::Matching => &mut self.matching,
            ServiceName::Worker => &mut self.worker,
        }
    }
}

/// Overrides for one service
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    /// Run this service (only consulted for the internal frontend)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Pod replicas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    /// gRPC port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    /// Ringpop membership port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub membership_port: Option<i32>,
    /// HTTP API port (frontends only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_port: Option<i32>,
    /// Container resources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
}

/// Web UI add-on
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UiSpec {
    /// Deploy the UI
    #[serde(default)]
    pub enabled: bool,
    /// UI image tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// UI image repository
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Pod replicas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    /// Container resources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    /// Expose the UI through an Ingress
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress: Option<IngressSpec>,
}

/// Ingress for the UI
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IngressSpec {
    /// Host names routed to the UI
    pub hosts: Vec<String>,
    /// Ingress class
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_class_name: Option<String>,
    /// Extra annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// TLS termination
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tls: Vec<IngressTLS>,
}

/// Admin tools add-on
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AdminToolsSpec {
    /// Deploy an admin tools pod
    #[serde(default)]
    pub enabled: bool,
    /// Image repository
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Image tag, the cluster version unless set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Container resources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
}

/// Prometheus metrics
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSpec {
    /// Expose metrics
    #[serde(default)]
    pub enabled: bool,
    /// Listen port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
}

/// Status for a TemporalCluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TemporalClusterStatus {
    /// Version every service was last observed ready at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Per-service readiness
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<ServiceStatus>,

    /// Per-datastore provisioning state
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub persistence: Vec<DatastoreStatus>,

    /// Conditions, at most one per type
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Generation last reconciled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl TemporalClusterStatus {
    /// Conditions keyed by type
    pub fn condition_set(&self) -> ConditionSet {
        ConditionSet::from_list(&self.conditions)
    }

    /// Provisioning state of one datastore
    pub fn datastore(&self, name: &str) -> Option<&DatastoreStatus> {
        self.persistence.iter().find(|d| d.name == name)
    }

    /// Readiness of one service
    pub fn service(&self, name: &str) -> Option<&ServiceStatus> {
        self.services.iter().find(|s| s.name == name)
    }
}

/// Readiness of one service
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    /// Service name (frontend, history, ...)
    pub name: String,
    /// Version observed on the running pods
    pub version: String,
    /// All replicas are updated and ready
    pub ready: bool,
}

/// Provisioning state of one datastore
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DatastoreStatus {
    /// Store name
    pub name: String,
    /// Backend type
    #[serde(rename = "type")]
    pub type_: DatastoreType,
    /// Database or keyspace exists
    #[serde(default)]
    pub created: bool,
    /// Base schema installed
    #[serde(default)]
    pub setup: bool,
    /// Schema version the store was last updated to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,
}

impl TemporalCluster {
    /// Desired server version
    pub fn version(&self) -> Result<Version, VersionError> {
        Version::parse(&self.spec.version)
    }

    /// Version currently running everywhere, if known
    pub fn applied_version(&self) -> Option<Version> {
        self.status
            .as_ref()
            .and_then(|s| s.version.as_deref())
            .and_then(|v| Version::parse(v).ok())
    }

    /// Whether the UI add-on is requested
    pub fn ui_enabled(&self) -> bool {
        self.spec.ui.as_ref().is_some_and(|ui| ui.enabled)
    }

    /// Whether the admin tools add-on is requested
    pub fn admintools_enabled(&self) -> bool {
        self.spec.admintools.as_ref().is_some_and(|a| a.enabled)
    }

    /// Whether the cert-manager CA hierarchy is requested
    pub fn cert_manager_mtls(&self) -> bool {
        self.spec
            .mtls
            .as_ref()
            .is_some_and(MtlsSpec::uses_cert_manager)
    }
}
