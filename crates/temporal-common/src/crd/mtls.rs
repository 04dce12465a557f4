//! Mutual TLS configuration

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::features::PlatformFeature;

/// Default root CA certificate lifetime (10 years)
pub const DEFAULT_ROOT_CA_DURATION: &str = "87600h";

/// Default intermediate CA certificate lifetime (5 years)
pub const DEFAULT_INTERMEDIATE_CA_DURATION: &str = "43800h";

/// Default leaf certificate lifetime (1 year)
pub const DEFAULT_LEAF_DURATION: &str = "8760h";

/// Default interval at which servers re-read rotated certificates
pub const DEFAULT_REFRESH_INTERVAL: &str = "1h";

/// Smallest accepted `renewBefore`
pub const MIN_RENEW_BEFORE: &str = "5m";

/// mTLS settings for internode and frontend traffic
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MtlsSpec {
    /// Who issues and rotates the certificates
    #[serde(default)]
    pub provider: MtlsProvider,

    /// Encrypt traffic between server services
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internode: Option<DomainSpec>,

    /// Encrypt traffic from clients to the frontend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frontend: Option<DomainSpec>,

    /// Certificate lifetimes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificates_duration: Option<CertificatesDuration>,

    /// How often servers re-read rotated certificate files (Go duration)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_interval: Option<String>,

    /// How long before expiry cert-manager renews a certificate (Go duration)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renew_before: Option<String>,
}

impl MtlsSpec {
    /// Whether internode mTLS is on
    pub fn internode_enabled(&self) -> bool {
        self.internode.as_ref().is_some_and(|d| d.enabled)
    }

    /// Whether frontend mTLS is on
    pub fn frontend_enabled(&self) -> bool {
        self.frontend.as_ref().is_some_and(|d| d.enabled)
    }

    /// Whether cert-manager must issue a CA hierarchy for this cluster
    pub fn uses_cert_manager(&self) -> bool {
        self.provider == MtlsProvider::CertManager
            && (self.internode_enabled() || self.frontend_enabled())
    }

    /// Whether the domain is enabled
    pub fn domain_enabled(&self, domain: TrafficDomain) -> bool {
        match domain {
            TrafficDomain::Internode => self.internode_enabled(),
            TrafficDomain::Frontend => self.frontend_enabled(),
        }
    }

    /// Resolved certificate lifetimes
    pub fn durations(&self) -> CertificatesDuration {
        let d = self.certificates_duration.clone().unwrap_or_default();
        CertificatesDuration {
            root_ca_certificate: d
                .root_ca_certificate
                .or_else(|| Some(DEFAULT_ROOT_CA_DURATION.to_string())),
            intermediate_cas_certificates: d
                .intermediate_cas_certificates
                .or_else(|| Some(DEFAULT_INTERMEDIATE_CA_DURATION.to_string())),
            client_certificates: d
                .client_certificates
                .or_else(|| Some(DEFAULT_LEAF_DURATION.to_string())),
            frontend_certificate: d
                .frontend_certificate
                .or_else(|| Some(DEFAULT_LEAF_DURATION.to_string())),
            internode_certificate: d
                .internode_certificate
                .or_else(|| Some(DEFAULT_LEAF_DURATION.to_string())),
        }
    }

    /// Resolved refresh interval
    pub fn refresh_interval(&self) -> &str {
        self.refresh_interval
            .as_deref()
            .unwrap_or(DEFAULT_REFRESH_INTERVAL)
    }
}

/// Certificate issuer for mTLS
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum MtlsProvider {
    /// cert-manager issues a dedicated CA hierarchy
    #[default]
    #[serde(rename = "cert-manager")]
    CertManager,
    /// Linkerd's mesh identity handles mTLS
    #[serde(rename = "linkerd")]
    Linkerd,
    /// Istio's mesh identity handles mTLS
    #[serde(rename = "istio")]
    Istio,
}

impl std::fmt::Display for MtlsProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CertManager => write!(f, "cert-manager"),
            Self::Linkerd => write!(f, "linkerd"),
            Self::Istio => write!(f, "istio"),
        }
    }
}

impl MtlsProvider {
    /// Third-party API the provider needs in the cluster
    pub fn required_feature(&self) -> PlatformFeature {
        match self {
            Self::CertManager => PlatformFeature::CertManager,
            Self::Linkerd => PlatformFeature::Linkerd,
            Self::Istio => PlatformFeature::Istio,
        }
    }
}

/// Per-domain switch
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DomainSpec {
    /// Enable mTLS for this traffic domain
    #[serde(default)]
    pub enabled: bool,
}

/// Certificate lifetimes (Go durations)
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CertificatesDuration {
    /// Root CA lifetime
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_ca_certificate: Option<String>,
    /// Intermediate CA lifetime
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intermediate_cas_certificates: Option<String>,
    /// Client (worker, UI, admin tools) certificate lifetime
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_certificates: Option<String>,
    /// Frontend server certificate lifetime
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frontend_certificate: Option<String>,
    /// Internode certificate lifetime
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internode_certificate: Option<String>,
}

/// A traffic domain with its own intermediate CA
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TrafficDomain {
    /// Server-to-server traffic
    Internode,
    /// Client-to-frontend traffic
    Frontend,
}

impl TrafficDomain {
    /// Both domains, in issuance order
    pub const ALL: [TrafficDomain; 2] = [TrafficDomain::Internode, TrafficDomain::Frontend];

    /// Lowercase name used in resource names and mount paths
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Internode => "internode",
            Self::Frontend => "frontend",
        }
    }
}

impl std::fmt::Display for TrafficDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_default_to_ten_five_one_years() {
        let d = MtlsSpec::default().durations();
        assert_eq!(d.root_ca_certificate.as_deref(), Some("87600h"));
        assert_eq!(d.intermediate_cas_certificates.as_deref(), Some("43800h"));
        assert_eq!(d.client_certificates.as_deref(), Some("8760h"));
        assert_eq!(d.frontend_certificate.as_deref(), Some("8760h"));
        assert_eq!(d.internode_certificate.as_deref(), Some("8760h"));
    }

    #[test]
    fn explicit_durations_win() {
        let spec = MtlsSpec {
            certificates_duration: Some(CertificatesDuration {
                root_ca_certificate: Some("1000h".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(
            spec.durations().root_ca_certificate.as_deref(),
            Some("1000h")
        );
    }

    #[test]
    fn cert_manager_needs_an_enabled_domain() {
        let mut spec = MtlsSpec::default();
        assert!(!spec.uses_cert_manager());
        spec.frontend = Some(DomainSpec { enabled: true });
        assert!(spec.uses_cert_manager());
        spec.provider = MtlsProvider::Linkerd;
        assert!(!spec.uses_cert_manager());
    }

    #[test]
    fn provider_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_value(MtlsProvider::CertManager).unwrap(),
            "cert-manager"
        );
        let p: MtlsProvider = serde_json::from_str("\"istio\"").unwrap();
        assert_eq!(p, MtlsProvider::Istio);
    }

    #[test]
    fn refresh_interval_defaults_to_one_hour() {
        assert_eq!(MtlsSpec::default().refresh_interval(), "1h");
    }
}
