//! Kubernetes Event recording for the Temporal operator.
//!
//! Controllers emit Events on the TemporalCluster so `kubectl describe`
//! shows upgrades, schema jobs and failures next to the object.
//!
//! Publishing is fire-and-forget: failures are logged and never returned.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Publishes Kubernetes Events
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an Event on `resource_ref`
    ///
    /// * `reason` - machine-readable reason from [`reasons`]
    /// * `action` - what the controller did, from [`actions`]
    /// * `note` - optional human-readable message
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Publisher backed by `kube::runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a publisher reporting as `controller_name`
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = kube::runtime::events::Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "failed to publish event");
        }
    }
}

/// Publisher that drops every event
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Event reasons shown in the REASON column
pub mod reasons {
    /// A reconcile pass converged
    pub const RECONCILE_SUCCEEDED: &str = "ReconcileSucceeded";
    /// A reconcile pass failed
    pub const RECONCILE_FAILED: &str = "ReconcileFailed";
    /// Every service reports ready
    pub const CLUSTER_READY: &str = "ClusterReady";
    /// The desired version differs from the running one
    pub const UPGRADE_STARTED: &str = "UpgradeStarted";
    /// Every service runs the desired version
    pub const UPGRADE_COMPLETED: &str = "UpgradeCompleted";
    /// A datastore schema job finished
    pub const SCHEMA_JOB_COMPLETED: &str = "SchemaJobCompleted";
    /// A step waits on another resource
    pub const WAITING_FOR_DEPENDENCY: &str = "WaitingForDependency";
    /// The spec was rejected at reconcile time
    pub const VALIDATION_FAILED: &str = "ValidationFailed";
    /// A client certificate was issued
    pub const CLIENT_CERTIFICATE_ISSUED: &str = "ClientCertificateIssued";
}

/// Event actions shown in the ACTION column
pub mod actions {
    /// Standard reconcile loop
    pub const RECONCILE: &str = "Reconcile";
    /// Rolling a new server version
    pub const UPGRADE: &str = "Upgrade";
    /// Creating or migrating a datastore schema
    pub const PROVISION_SCHEMA: &str = "ProvisionSchema";
    /// Issuing certificates
    pub const ISSUE: &str = "Issue";
}
