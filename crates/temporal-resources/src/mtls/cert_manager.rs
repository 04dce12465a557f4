//! cert-manager resource types (cert-manager.io/v1)
//!
//! Only the fields the CA hierarchy sets are modelled.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

use temporal_common::kube_utils::HasApiResource;

/// cert-manager API group
pub const CERT_MANAGER_GROUP: &str = "cert-manager.io";

/// Generate default_api_version() and default_kind() from HasApiResource
macro_rules! impl_api_defaults {
    ($type:ty) => {
        impl $type {
            fn default_api_version() -> String {
                <Self as HasApiResource>::API_VERSION.to_string()
            }
            fn default_kind() -> String {
                <Self as HasApiResource>::KIND.to_string()
            }
        }
    };
}

// =============================================================================
// Issuer
// =============================================================================

/// cert-manager Issuer
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Issuer {
    /// API version (cert-manager.io/v1)
    #[serde(default = "Issuer::default_api_version")]
    pub api_version: String,
    /// Resource kind (Issuer)
    #[serde(default = "Issuer::default_kind")]
    pub kind: String,
    /// Resource metadata
    pub metadata: ObjectMeta,
    /// Issuer specification
    pub spec: IssuerSpec,
}

impl HasApiResource for Issuer {
    const API_VERSION: &'static str = "cert-manager.io/v1";
    const KIND: &'static str = "Issuer";
}

impl_api_defaults!(Issuer);

impl Issuer {
    /// Create a new Issuer
    pub fn new(metadata: ObjectMeta, spec: IssuerSpec) -> Self {
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata,
            spec,
        }
    }
}

/// Issuer spec; exactly one source is set
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IssuerSpec {
    /// Self-signed issuer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_signed: Option<SelfSignedIssuer>,
    /// CA issuer backed by a key pair secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<CaIssuer>,
}

/// Self-signed issuer (no fields)
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SelfSignedIssuer {}

/// CA issuer
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CaIssuer {
    /// Secret holding the CA key pair
    pub secret_name: String,
}

// =============================================================================
// Certificate
// =============================================================================

/// cert-manager Certificate
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    /// API version (cert-manager.io/v1)
    #[serde(default = "Certificate::default_api_version")]
    pub api_version: String,
    /// Resource kind (Certificate)
    #[serde(default = "Certificate::default_kind")]
    pub kind: String,
    /// Resource metadata
    pub metadata: ObjectMeta,
    /// Certificate specification
    pub spec: CertificateSpec,
}

impl HasApiResource for Certificate {
    const API_VERSION: &'static str = "cert-manager.io/v1";
    const KIND: &'static str = "Certificate";
}

impl_api_defaults!(Certificate);

impl Certificate {
    /// Create a new Certificate
    pub fn new(metadata: ObjectMeta, spec: CertificateSpec) -> Self {
        Self {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata,
            spec,
        }
    }
}

/// Certificate spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSpec {
    /// Secret the key pair is written to
    pub secret_name: String,
    /// Subject common name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common_name: Option<String>,
    /// SAN DNS names
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns_names: Vec<String>,
    /// Requested lifetime (Go duration)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    /// Renew this long before expiry (Go duration)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renew_before: Option<String>,
    /// Mark the certificate as a CA
    #[serde(rename = "isCA", default, skip_serializing_if = "std::ops::Not::not")]
    pub is_ca: bool,
    /// Key usages
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub usages: Vec<String>,
    /// Private key settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<CertificatePrivateKey>,
    /// Reference to the issuer
    pub issuer_ref: IssuerRef,
}

/// Private key settings
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CertificatePrivateKey {
    /// Key algorithm (RSA, ECDSA, Ed25519)
    pub algorithm: String,
    /// Key size in bits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<i32>,
    /// `Always` regenerates the key on every renewal
    pub rotation_policy: String,
}

impl CertificatePrivateKey {
    /// ECDSA P-256 key regenerated on every renewal
    pub fn rotating_ecdsa() -> Self {
        Self {
            algorithm: "ECDSA".to_string(),
            size: Some(256),
            rotation_policy: ROTATION_POLICY_ALWAYS.to_string(),
        }
    }
}

/// Rotation policy regenerating the private key on renewal
pub const ROTATION_POLICY_ALWAYS: &str = "Always";

/// Usage: TLS server
pub const USAGE_SERVER_AUTH: &str = "server auth";
/// Usage: TLS client
pub const USAGE_CLIENT_AUTH: &str = "client auth";
/// Usage: signing
pub const USAGE_DIGITAL_SIGNATURE: &str = "digital signature";
/// Usage: key encipherment
pub const USAGE_KEY_ENCIPHERMENT: &str = "key encipherment";

/// Issuer reference for Certificate
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IssuerRef {
    /// Issuer name
    pub name: String,
    /// Issuer kind (Issuer or ClusterIssuer)
    pub kind: String,
    /// API group (cert-manager.io)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl IssuerRef {
    /// Reference to a namespaced Issuer
    pub fn issuer(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: Issuer::KIND.to_string(),
            group: Some(CERT_MANAGER_GROUP.to_string()),
        }
    }
}
