//! Platform feature detection
//!
//! Some TemporalCluster options need third-party APIs in the cluster:
//! cert-manager for the CA hierarchy, a service mesh for mesh-provided
//! mTLS, the Prometheus operator for ServiceMonitors. Discovery runs once at
//! startup and again lazily on a miss, so installing cert-manager after the
//! operator starts does not require a restart.

use std::sync::Arc;

use dashmap::DashMap;
use kube::discovery::{ApiResource, Discovery};
use kube::Client;
use tracing::{info, warn};

use crate::kube_utils::find_discovered_resource;

/// A third-party API the operator can use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlatformFeature {
    /// cert-manager Certificates and Issuers
    CertManager,
    /// Istio sidecar injection
    Istio,
    /// Linkerd proxy injection
    Linkerd,
    /// Prometheus operator ServiceMonitors
    PrometheusOperator,
}

impl PlatformFeature {
    /// Every known feature
    pub const ALL: [PlatformFeature; 4] = [
        PlatformFeature::CertManager,
        PlatformFeature::Istio,
        PlatformFeature::Linkerd,
        PlatformFeature::PrometheusOperator,
    ];

    /// API group whose presence signals the feature
    pub fn group(&self) -> &'static str {
        match self {
            Self::CertManager => "cert-manager.io",
            Self::Istio => "networking.istio.io",
            Self::Linkerd => "policy.linkerd.io",
            Self::PrometheusOperator => "monitoring.coreos.com",
        }
    }

    /// Kind looked up in that group
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CertManager => "Certificate",
            Self::Istio => "DestinationRule",
            Self::Linkerd => "Server",
            Self::PrometheusOperator => "ServiceMonitor",
        }
    }

    /// Human-readable name for error messages
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::CertManager => "cert-manager",
            Self::Istio => "istio",
            Self::Linkerd => "linkerd",
            Self::PrometheusOperator => "prometheus-operator",
        }
    }
}

impl std::fmt::Display for PlatformFeature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Cache of detected platform features
///
/// Shared by the controller and the webhook through an `Arc`.
pub struct PlatformFeatures {
    client: Option<Client>,
    entries: DashMap<PlatformFeature, ApiResource>,
}

impl PlatformFeatures {
    /// Run API discovery and record every feature found
    pub async fn discover(client: Client) -> Arc<Self> {
        let features = Self {
            client: Some(client),
            entries: DashMap::new(),
        };
        features.rediscover().await;
        info!(
            detected = ?features.detected(),
            "platform features detected"
        );
        Arc::new(features)
    }

    /// Fixed feature set without discovery
    pub fn with(features: &[PlatformFeature]) -> Arc<Self> {
        let entries = DashMap::new();
        for feature in features {
            entries.insert(
                *feature,
                crate::kube_utils::build_api_resource(
                    &format!("{}/v1", feature.group()),
                    feature.kind(),
                ),
            );
        }
        Arc::new(Self {
            client: None,
            entries,
        })
    }

    /// Whether the feature was detected, without touching the API server
    pub fn is_available(&self, feature: PlatformFeature) -> bool {
        self.entries.contains_key(&feature)
    }

    /// Whether the feature is available, rediscovering once on a miss
    pub async fn resolve(&self, feature: PlatformFeature) -> bool {
        if self.is_available(feature) {
            return true;
        }
        if self.client.is_some() {
            info!(feature = %feature, "feature missing, running discovery again");
            self.rediscover().await;
        }
        self.is_available(feature)
    }

    /// Detected features in declaration order
    pub fn detected(&self) -> Vec<PlatformFeature> {
        PlatformFeature::ALL
            .into_iter()
            .filter(|f| self.is_available(*f))
            .collect()
    }

    async fn rediscover(&self) {
        let Some(client) = &self.client else {
            return;
        };
        let discovery = match Discovery::new(client.clone()).run().await {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "API discovery failed");
                return;
            }
        };
        for feature in PlatformFeature::ALL {
            if self.entries.contains_key(&feature) {
                continue;
            }
            if let Some(ar) = find_discovered_resource(&discovery, feature.group(), feature.kind())
            {
                self.entries.insert(feature, ar);
            }
        }
    }
}
