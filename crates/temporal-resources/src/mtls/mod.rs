//! mTLS key material
//!
//! With the cert-manager provider every cluster gets its own CA hierarchy:
//!
//! ```text
//! bootstrap-issuer (self-signed)
//!   └── root-ca-certificate ── root-ca-issuer
//!         ├── internode-intermediate-ca-certificate ── internode-intermediate-ca-issuer
//!         │     └── internode-certificate
//!         └── frontend-intermediate-ca-certificate ── frontend-intermediate-ca-issuer
//!               ├── frontend-certificate
//!               ├── worker-certificate
//!               └── <client>-mtls-certificate (ui, admintools, TemporalClusterClients)
//! ```
//!
//! Each CA issuer waits for its certificate to be issued and each
//! certificate waits for its CA issuer to be ready, so the builders defer
//! down the chain until cert-manager catches up.

pub mod cert_manager;
mod hierarchy;
pub mod state;

pub use hierarchy::{
    bootstrap_issuer, client_certificate, domain_certificate, domain_states, hierarchy,
    intermediate_ca_certificate, intermediate_ca_issuer, root_ca_certificate, root_ca_issuer,
    worker_certificate, CertificateBuilder, IssuerBuilder,
};
pub use state::{certificate_issued, domain_state, issuer_ready, DomainState};

use std::collections::BTreeMap;

use temporal_common::crd::{MtlsProvider, MtlsSpec, TrafficDomain};

/// Certificate file in a cert-manager secret
pub const TLS_CERT_FILE: &str = "tls.crt";
/// Private key file in a cert-manager secret
pub const TLS_KEY_FILE: &str = "tls.key";
/// Issuing CA file in a cert-manager secret
pub const CA_CERT_FILE: &str = "ca.crt";

/// Where the worker service's client certificate is mounted
pub const WORKER_CERTS_MOUNT_PATH: &str = "/etc/temporal/config/certs/client/worker";

/// Where a domain's server certificate is mounted
pub fn certs_mount_path(domain: TrafficDomain) -> String {
    format!("/etc/temporal/config/certs/cluster/{}", domain.as_str())
}

/// Where an add-on's client certificate is mounted
pub fn client_certs_mount_path(client: &str) -> String {
    format!("/etc/temporal/config/certs/client/{client}")
}

/// Sidecar injection annotations for mesh-provided mTLS
///
/// Empty for cert-manager and when no domain is enabled.
pub fn mesh_annotations(mtls: Option<&MtlsSpec>) -> BTreeMap<String, String> {
    let Some(mtls) = mtls.filter(|m| m.internode_enabled() || m.frontend_enabled()) else {
        return BTreeMap::new();
    };
    let (key, value) = match mtls.provider {
        MtlsProvider::CertManager => return BTreeMap::new(),
        MtlsProvider::Linkerd => ("linkerd.io/inject", "enabled"),
        MtlsProvider::Istio => ("sidecar.istio.io/inject", "true"),
    };
    BTreeMap::from([(key.to_string(), value.to_string())])
}
