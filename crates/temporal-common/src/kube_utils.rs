//! Shared Kubernetes utilities using kube-rs
//!
//! Helpers for building `ApiResource`s, owner references, reading
//! conditions off dynamic objects and patching status subresources.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, DynamicObject, Patch, PatchParams};
use kube::discovery::ApiResource;
use kube::{Client, Resource, ResourceExt};
use sha2::{Digest, Sha256};
use tracing::debug;

// =============================================================================
// ApiResource building
// =============================================================================

/// Trait for types that have a known API group, version, and kind.
///
/// Implement this for third-party CRD types (cert-manager) so their
/// `ApiResource` is derived from the same constants used for serialization.
///
/// # Example
/// ```ignore
/// impl HasApiResource for Certificate {
///     const API_VERSION: &'static str = "cert-manager.io/v1";
///     const KIND: &'static str = "Certificate";
/// }
///
/// let ar = Certificate::api_resource();
/// ```
pub trait HasApiResource {
    /// Full API version (e.g., "cert-manager.io/v1", "v1")
    const API_VERSION: &'static str;
    /// Resource kind (e.g., "Certificate")
    const KIND: &'static str;

    /// Build an ApiResource from the type's constants.
    fn api_resource() -> ApiResource {
        build_api_resource(Self::API_VERSION, Self::KIND)
    }
}

/// Build an ApiResource from an apiVersion and kind
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Parse apiVersion into (group, version)
///
/// # Examples
/// ```
/// use temporal_common::kube_utils::parse_api_version;
///
/// assert_eq!(parse_api_version("apps/v1"), ("apps".to_string(), "v1".to_string()));
/// assert_eq!(parse_api_version("v1"), (String::new(), "v1".to_string()));
/// ```
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Pluralize a Kubernetes resource kind
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();
    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

/// Find a resource by group and kind in a completed API discovery
///
/// Picks the most stable served version.
pub fn find_discovered_resource(
    discovery: &kube::discovery::Discovery,
    group: &str,
    kind: &str,
) -> Option<ApiResource> {
    for api_group in discovery.groups() {
        if api_group.name() != group {
            continue;
        }
        for (ar, _caps) in api_group.resources_by_stability() {
            if ar.kind == kind {
                debug!(group, kind, api_version = %ar.api_version, "discovered resource");
                return Some(ar);
            }
        }
    }
    None
}

// =============================================================================
// Ownership
// =============================================================================

/// Controller owner reference pointing at `owner`
///
/// Returns `None` when the owner has not been persisted yet (no uid).
pub fn controller_owner_ref<K>(owner: &K) -> Option<OwnerReference>
where
    K: Resource<DynamicType = ()>,
{
    let meta = owner.meta();
    Some(OwnerReference {
        api_version: K::api_version(&()).to_string(),
        kind: K::kind(&()).to_string(),
        name: meta.name.clone()?,
        uid: meta.uid.clone()?,
        controller: Some(true),
        block_owner_deletion: Some(true),
    })
}

/// Whether `object` carries a controller reference to the owner with `uid`
pub fn is_controlled_by(object: &DynamicObject, uid: &str) -> bool {
    object
        .owner_references()
        .iter()
        .any(|r| r.uid == uid && r.controller == Some(true))
}

/// Replace any controller reference on `object` with `owner_ref`
///
/// Non-controller references set by others are kept.
pub fn set_controller_ref(object: &mut DynamicObject, owner_ref: OwnerReference) {
    let refs = object.metadata.owner_references.get_or_insert_with(Vec::new);
    refs.retain(|r| r.controller != Some(true));
    refs.push(owner_ref);
}

// =============================================================================
// Conditions on dynamic objects
// =============================================================================

/// The "True" status value for conditions
pub const STATUS_TRUE: &str = "True";

/// The "Ready" condition type used by cert-manager
pub const CONDITION_READY: &str = "Ready";

/// Check if a condition of the given type has status "True" on a dynamic object
///
/// Reads `status.conditions[]`, the layout shared by cert-manager,
/// batch Jobs and apps Deployments.
pub fn has_condition(object: &DynamicObject, condition_type: &str) -> bool {
    object
        .data
        .get("status")
        .and_then(|s| s.get("conditions"))
        .and_then(|c| c.as_array())
        .map(|conditions| {
            conditions.iter().any(|c| {
                c.get("type").and_then(|t| t.as_str()) == Some(condition_type)
                    && c.get("status").and_then(|s| s.as_str()) == Some(STATUS_TRUE)
            })
        })
        .unwrap_or(false)
}

/// Read a string at a JSON pointer inside a dynamic object's data
pub fn data_str<'a>(object: &'a DynamicObject, pointer: &str) -> Option<&'a str> {
    object.data.pointer(pointer).and_then(|v| v.as_str())
}

/// Read an integer at a JSON pointer inside a dynamic object's data
pub fn data_i64(object: &DynamicObject, pointer: &str) -> Option<i64> {
    object.data.pointer(pointer).and_then(|v| v.as_i64())
}

// =============================================================================
// Hashing
// =============================================================================

/// Compute a deterministic hash of the input string, returning a 16-char hex digest.
///
/// Used for pod template annotations that must change exactly when the
/// rendered config changes.
pub fn deterministic_hash(input: &str) -> String {
    let hash = Sha256::digest(input.as_bytes());
    hash[..8]
        .iter()
        .fold(String::with_capacity(16), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
            s
        })
}

// =============================================================================
// Status patching
// =============================================================================

/// Patch the status sub-resource of a namespaced Kubernetes resource.
///
/// Uses a JSON merge patch, the pattern shared by every controller here.
pub async fn patch_resource_status<T>(
    client: &Client,
    name: &str,
    namespace: &str,
    status: &impl serde::Serialize,
    field_manager: &str,
) -> std::result::Result<(), kube::Error>
where
    T: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
        + Clone
        + serde::de::DeserializeOwned
        + std::fmt::Debug,
    <T as kube::Resource>::DynamicType: Default,
{
    let api: Api<T> = Api::namespaced(client.clone(), namespace);
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::apply(field_manager), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::TemporalCluster;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn dynamic(data: serde_json::Value) -> DynamicObject {
        let ar = build_api_resource("cert-manager.io/v1", "Certificate");
        let mut obj = DynamicObject::new("test", &ar);
        obj.data = data;
        obj
    }

    #[test]
    fn api_resource_from_constants() {
        let ar = build_api_resource("cert-manager.io/v1", "Issuer");
        assert_eq!(ar.group, "cert-manager.io");
        assert_eq!(ar.version, "v1");
        assert_eq!(ar.plural, "issuers");

        let ar = build_api_resource("v1", "ConfigMap");
        assert_eq!(ar.group, "");
        assert_eq!(ar.plural, "configmaps");
    }

    #[test]
    fn pluralization_rules() {
        assert_eq!(pluralize_kind("Ingress"), "ingresses");
        assert_eq!(pluralize_kind("Policy"), "policies");
        assert_eq!(pluralize_kind("Gateway"), "gateways");
        assert_eq!(pluralize_kind("Deployment"), "deployments");
    }

    #[test]
    fn owner_ref_requires_uid() {
        let mut cluster = TemporalCluster::new("prod", Default::default());
        assert!(controller_owner_ref(&cluster).is_none());

        cluster.metadata = ObjectMeta {
            name: Some("prod".to_string()),
            uid: Some("uid-1".to_string()),
            ..Default::default()
        };
        let owner = controller_owner_ref(&cluster).unwrap();
        assert_eq!(owner.kind, "TemporalCluster");
        assert_eq!(owner.api_version, "temporal.io/v1beta1");
        assert_eq!(owner.controller, Some(true));
        assert_eq!(owner.block_owner_deletion, Some(true));
    }

    #[test]
    fn controller_ref_is_replaced_not_duplicated() {
        let mut obj = dynamic(serde_json::json!({}));
        let owner = |uid: &str| OwnerReference {
            api_version: "temporal.io/v1beta1".to_string(),
            kind: "TemporalCluster".to_string(),
            name: "prod".to_string(),
            uid: uid.to_string(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        };
        set_controller_ref(&mut obj, owner("a"));
        set_controller_ref(&mut obj, owner("a"));
        assert_eq!(obj.owner_references().len(), 1);
        assert!(is_controlled_by(&obj, "a"));
        assert!(!is_controlled_by(&obj, "b"));
    }

    #[test]
    fn reads_conditions_from_status() {
        let ready = dynamic(serde_json::json!({
            "status": {"conditions": [{"type": "Ready", "status": "True"}]}
        }));
        assert!(has_condition(&ready, "Ready"));

        let not_ready = dynamic(serde_json::json!({
            "status": {"conditions": [{"type": "Ready", "status": "False"}]}
        }));
        assert!(!has_condition(&not_ready, "Ready"));
        assert!(!has_condition(&dynamic(serde_json::json!({})), "Ready"));
    }

    #[test]
    fn pointer_helpers() {
        let obj = dynamic(serde_json::json!({"spec": {"secretName": "s", "replicas": 3}}));
        assert_eq!(data_str(&obj, "/spec/secretName"), Some("s"));
        assert_eq!(data_i64(&obj, "/spec/replicas"), Some(3));
        assert_eq!(data_str(&obj, "/spec/missing"), None);
    }

    #[test]
    fn hash_is_stable_and_short() {
        let a = deterministic_hash("persistence: {}");
        assert_eq!(a.len(), 16);
        assert_eq!(a, deterministic_hash("persistence: {}"));
        assert_ne!(a, deterministic_hash("persistence: {x: 1}"));
    }
}
