//! Error types for the Temporal operator
//!
//! Errors are structured with fields to aid debugging in production.
//! Each variant carries the cluster, resource or field it concerns so
//! a failed reconcile can be traced back from a single log line or
//! status condition.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for operator operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Malformed or incomplete desired state discovered while building resources
    #[error("configuration error for {cluster}: {message}")]
    Config {
        /// Name of the TemporalCluster with the invalid configuration
        cluster: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.persistence.defaultStore.sql.connectAddr")
        field: Option<String>,
    },

    /// A runtime admission invariant failed during reconciliation
    #[error("validation error for {cluster}: {message}")]
    Validation {
        /// Name of the TemporalCluster
        cluster: String,
        /// All violations, joined
        message: String,
        /// First offending field path
        field: Option<String>,
    },

    /// Optimistic concurrency conflict writing a child resource
    #[error("conflict writing {kind}/{name}: resource was modified concurrently")]
    Conflict {
        /// Kind of the child resource
        kind: String,
        /// Name of the child resource
        name: String,
    },

    /// A child resource reached a terminal failure (e.g. a schema job failed)
    #[error("dependency {resource} failed: {message}")]
    Dependency {
        /// The child resource, as `Kind/name`
        resource: String,
        /// Description of the failure
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "webhook")
        context: String,
    },
}

impl Error {
    /// Create a configuration error with cluster context
    pub fn config_for(cluster: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Config {
            cluster: cluster.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a configuration error with cluster context and field path
    pub fn config_for_field(
        cluster: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Config {
            cluster: cluster.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            cluster: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with cluster context and field path
    pub fn validation_for_field(
        cluster: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            cluster: cluster.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a conflict error for a child resource
    pub fn conflict(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Conflict {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a dependency failure error
    pub fn dependency(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Dependency {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Configuration, validation and serialization errors need a spec edit.
    /// Conflicts, dependency failures and transport errors are retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => match source {
                kube::Error::Api(ae) => {
                    ae.code == 409 || ae.code == 429 || !(400..500).contains(&ae.code)
                }
                _ => true,
            },
            Error::Config { .. } => false,
            Error::Validation { .. } => false,
            Error::Conflict { .. } => true,
            Error::Dependency { .. } => true,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Get the cluster name if this error is associated with a specific cluster
    pub fn cluster(&self) -> Option<&str> {
        match self {
            Error::Config { cluster, .. } => Some(cluster),
            Error::Validation { cluster, .. } => Some(cluster),
            _ => None,
        }
    }

    /// Get the field path if this error points at one
    pub fn field(&self) -> Option<&str> {
        match self {
            Error::Config { field, .. } | Error::Validation { field, .. } => field.as_deref(),
            _ => None,
        }
    }

    /// Short machine-readable reason, used for status conditions and events
    pub fn reason(&self) -> &'static str {
        match self {
            Error::Kube { .. } => "KubernetesApiError",
            Error::Config { .. } => "InvalidConfiguration",
            Error::Validation { .. } => "ValidationFailed",
            Error::Conflict { .. } => "Conflict",
            Error::Dependency { .. } => "DependencyFailed",
            Error::Serialization { .. } => "SerializationError",
            Error::Internal { .. } => "InternalError",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: "Test".to_string(),
            code,
        })
    }

    /// Story: a malformed datastore address is reported with its field path
    ///
    /// The user gets the exact path to fix in the ReconcileError condition,
    /// and the controller stops retrying until the spec changes.
    #[test]
    fn story_config_error_points_at_field() {
        let err = Error::config_for_field(
            "prod",
            "spec.persistence.defaultStore.sql.connectAddr",
            "address 'postgres' is missing a port",
        );
        assert!(err.to_string().contains("configuration error for prod"));
        assert_eq!(err.cluster(), Some("prod"));
        assert_eq!(
            err.field(),
            Some("spec.persistence.defaultStore.sql.connectAddr")
        );
        assert!(!err.is_retryable());
        assert_eq!(err.reason(), "InvalidConfiguration");
    }

    /// Story: a stale write loses the optimistic-concurrency race
    #[test]
    fn story_conflict_is_retried_from_fresh_read() {
        let err = Error::conflict("Deployment", "prod-frontend");
        assert!(err.to_string().contains("Deployment/prod-frontend"));
        assert!(err.is_retryable());

        let err: Error = api_error(409).into();
        assert!(err.is_retryable());
    }

    #[test]
    fn kube_client_errors_are_not_retried() {
        let err: Error = api_error(422).into();
        assert!(!err.is_retryable());
        let err: Error = api_error(403).into();
        assert!(!err.is_retryable());
    }

    #[test]
    fn kube_throttling_and_server_errors_are_retried() {
        let err: Error = api_error(429).into();
        assert!(err.is_retryable());
        let err: Error = api_error(503).into();
        assert!(err.is_retryable());
    }

    #[test]
    fn failed_schema_job_is_retryable_dependency() {
        let err = Error::dependency("Job/prod-default-setup-schema", "job failed");
        assert!(err.is_retryable());
        assert_eq!(err.reason(), "DependencyFailed");
        assert_eq!(err.cluster(), None);
    }

    #[test]
    fn serialization_errors_are_terminal() {
        let err = Error::serialization_for_kind("Certificate", "missing field 'spec'");
        match &err {
            Error::Serialization { kind, .. } => assert_eq!(kind.as_deref(), Some("Certificate")),
            _ => panic!("Expected Serialization variant"),
        }
        assert!(!err.is_retryable());

        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization { .. }));
    }

    #[test]
    fn internal_error_defaults_to_unknown_context() {
        let err = Error::internal("unexpected state");
        assert!(err.to_string().contains("[unknown]"));
        let err = Error::internal_with_context("reconciler", "unexpected state");
        assert!(err.to_string().contains("[reconciler]"));
        assert!(err.is_retryable());
    }

    #[test]
    fn validation_uses_unknown_cluster_without_context() {
        match Error::validation("bad") {
            Error::Validation { cluster, .. } => assert_eq!(cluster, UNKNOWN_CONTEXT),
            _ => panic!("Expected Validation variant"),
        }
    }
}
