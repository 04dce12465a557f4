//! TemporalClusterClient Custom Resource Definition
//!
//! Requests an mTLS client certificate for an application that talks to a
//! TemporalCluster's frontend. The certificate is issued by the cluster's
//! frontend intermediate CA and lands in a Secret the application mounts.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::conditions::{Condition, ConditionSet};

/// Specification for a TemporalClusterClient
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "temporal.io",
    version = "v1beta1",
    kind = "TemporalClusterClient",
    plural = "temporalclusterclients",
    shortname = "tcc",
    status = "TemporalClusterClientStatus",
    namespaced,
    printcolumn = r#"{"name":"Cluster","type":"string","jsonPath":".spec.clusterRef.name"}"#,
    printcolumn = r#"{"name":"Secret","type":"string","jsonPath":".status.secretRef.name"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TemporalClusterClientSpec {
    /// The cluster this client connects to (same namespace)
    pub cluster_ref: ClusterReference,
}

/// Reference to a TemporalCluster in the same namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterReference {
    /// TemporalCluster name
    pub name: String,
}

/// Status for a TemporalClusterClient
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TemporalClusterClientStatus {
    /// Secret holding `tls.crt`, `tls.key` and `ca.crt`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<SecretReference>,

    /// Server name to verify when dialing the frontend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,

    /// Conditions, at most one per type
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl TemporalClusterClientStatus {
    /// Conditions keyed by type
    pub fn condition_set(&self) -> ConditionSet {
        ConditionSet::from_list(&self.conditions)
    }
}

/// Reference to a Secret in the same namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    /// Secret name
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn crd_has_expected_identity() {
        let crd = TemporalClusterClient::crd();
        assert_eq!(
            crd.metadata.name.as_deref(),
            Some("temporalclusterclients.temporal.io")
        );
        assert_eq!(crd.spec.names.short_names, Some(vec!["tcc".to_string()]));
    }
}
