//! Readiness of cert-manager objects and per-domain issuance state

use kube::api::DynamicObject;

use temporal_common::crd::{TrafficDomain, CONDITION_READY};
use temporal_common::kube_utils::{data_str, has_condition};
use temporal_common::naming;

use crate::builder::{ObservedState, ResourceKey};

/// Whether an Issuer reports `Ready=True`
pub fn issuer_ready(issuer: &DynamicObject) -> bool {
    has_condition(issuer, CONDITION_READY)
}

/// Whether a Certificate is `Ready=True` and its secret was written
///
/// cert-manager sets `status.notAfter` once the key pair lands in the
/// secret.
pub fn certificate_issued(certificate: &DynamicObject) -> bool {
    has_condition(certificate, CONDITION_READY)
        && data_str(certificate, "/spec/secretName").is_some_and(|s| !s.is_empty())
        && data_str(certificate, "/status/notAfter").is_some()
}

/// Key of a cert-manager Issuer
pub fn issuer_key(name: impl Into<String>) -> ResourceKey {
    ResourceKey::new("Issuer", name)
}

/// Key of a cert-manager Certificate
pub fn certificate_key(name: impl Into<String>) -> ResourceKey {
    ResourceKey::new("Certificate", name)
}

/// Issuance progress of one traffic domain
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum DomainState {
    /// The intermediate CA is not issued yet
    Unissued,
    /// The intermediate CA is issued; the server leaf is not
    IntermediateIssued,
    /// The server leaf is issued; other leaves of the domain are pending
    LeafIssued,
    /// Every leaf of the domain is issued
    Ready,
}

impl std::fmt::Display for DomainState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unissued => "Unissued",
            Self::IntermediateIssued => "IntermediateIssued",
            Self::LeafIssued => "LeafIssued",
            Self::Ready => "Ready",
        };
        f.write_str(s)
    }
}

/// Derive a domain's state from the objects applied this pass
///
/// `extra_leaves` are the domain's other certificates (worker and add-on
/// client certificates for the frontend domain).
pub fn domain_state(
    cluster: &str,
    domain: TrafficDomain,
    extra_leaves: &[String],
    observed: &ObservedState,
) -> DomainState {
    let issued = |name: String| {
        observed
            .get(&certificate_key(name))
            .is_some_and(certificate_issued)
    };

    if !issued(naming::intermediate_ca_certificate(cluster, domain)) {
        return DomainState::Unissued;
    }
    if !issued(naming::domain_certificate(cluster, domain)) {
        return DomainState::IntermediateIssued;
    }
    if extra_leaves.iter().all(|leaf| issued(leaf.clone())) {
        DomainState::Ready
    } else {
        DomainState::LeafIssued
    }
}
