//! Deterministic child resource names
//!
//! Every child is named `<cluster>-<suffix>`. Two TemporalClusters in the
//! same namespace therefore never claim the same child.

use crate::crd::{ServiceName, TrafficDomain};
use crate::version::Version;

/// `<cluster>-<suffix>`
pub fn child_name(cluster: &str, suffix: &str) -> String {
    format!("{cluster}-{suffix}")
}

/// Server config ConfigMap
pub fn config_map(cluster: &str) -> String {
    child_name(cluster, "config")
}

/// Dynamic config ConfigMap
pub fn dynamic_config_map(cluster: &str) -> String {
    child_name(cluster, "dynamic-config")
}

/// Schema scripts ConfigMap
pub fn schema_scripts(cluster: &str) -> String {
    child_name(cluster, "schema-scripts")
}

/// ServiceAccount shared by server pods
pub fn service_account(cluster: &str) -> String {
    cluster.to_string()
}

/// Deployment of one server service
pub fn service_deployment(cluster: &str, service: ServiceName) -> String {
    child_name(cluster, service.as_str())
}

/// Headless Service used for ringpop membership
pub fn headless_service(cluster: &str, service: ServiceName) -> String {
    child_name(cluster, &format!("{}-headless", service.as_str()))
}

/// ClusterIP Service clients dial (frontend, internal frontend)
pub fn frontend_service(cluster: &str, service: ServiceName) -> String {
    child_name(cluster, service.as_str())
}

/// Create-database job
pub fn create_database_job(cluster: &str, store: &str) -> String {
    child_name(cluster, &format!("{store}-create-database"))
}

/// Setup-schema job
pub fn setup_schema_job(cluster: &str, store: &str) -> String {
    child_name(cluster, &format!("{store}-setup-schema"))
}

/// Update-schema job for a target version
pub fn update_schema_job(cluster: &str, store: &str, version: &Version) -> String {
    child_name(
        cluster,
        &format!("{store}-update-schema-{}", version.dashed()),
    )
}

/// Self-signed bootstrap issuer
pub fn bootstrap_issuer(cluster: &str) -> String {
    child_name(cluster, "bootstrap-issuer")
}

/// Root CA certificate (and its secret)
pub fn root_ca_certificate(cluster: &str) -> String {
    child_name(cluster, "root-ca-certificate")
}

/// Root CA issuer
pub fn root_ca_issuer(cluster: &str) -> String {
    child_name(cluster, "root-ca-issuer")
}

/// Intermediate CA certificate of a domain (and its secret)
pub fn intermediate_ca_certificate(cluster: &str, domain: TrafficDomain) -> String {
    child_name(
        cluster,
        &format!("{}-intermediate-ca-certificate", domain.as_str()),
    )
}

/// Intermediate CA issuer of a domain
pub fn intermediate_ca_issuer(cluster: &str, domain: TrafficDomain) -> String {
    child_name(
        cluster,
        &format!("{}-intermediate-ca-issuer", domain.as_str()),
    )
}

/// Server leaf certificate of a domain (and its secret)
pub fn domain_certificate(cluster: &str, domain: TrafficDomain) -> String {
    child_name(cluster, &format!("{}-certificate", domain.as_str()))
}

/// Worker service client certificate (and its secret)
pub fn worker_certificate(cluster: &str) -> String {
    child_name(cluster, "worker-certificate")
}

/// Client certificate for an add-on (`ui`, `admintools`) or a TemporalClusterClient
pub fn client_certificate(cluster: &str, client: &str) -> String {
    child_name(cluster, &format!("{client}-mtls-certificate"))
}

/// Server name presented by a domain's certificates
pub fn server_name(cluster: &str, domain: TrafficDomain) -> String {
    format!("{}.{cluster}", domain.as_str())
}

/// UI Deployment and Service
pub fn ui(cluster: &str) -> String {
    child_name(cluster, "ui")
}

/// Admin tools Deployment
pub fn admintools(cluster: &str) -> String {
    child_name(cluster, "admintools")
}

/// In-cluster DNS name of a Service
pub fn service_dns(service: &str, namespace: &str) -> String {
    format!("{service}.{namespace}.svc.cluster.local")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_prefixed_with_cluster() {
        assert_eq!(config_map("prod"), "prod-config");
        assert_eq!(
            service_deployment("prod", ServiceName::InternalFrontend),
            "prod-internal-frontend"
        );
        assert_eq!(
            headless_service("prod", ServiceName::History),
            "prod-history-headless"
        );
        assert_eq!(
            intermediate_ca_issuer("prod", TrafficDomain::Frontend),
            "prod-frontend-intermediate-ca-issuer"
        );
        assert_eq!(client_certificate("prod", "ui"), "prod-ui-mtls-certificate");
    }

    #[test]
    fn update_job_name_embeds_version() {
        let v = Version::new(1, 18, 4);
        assert_eq!(
            update_schema_job("prod", "visibility", &v),
            "prod-visibility-update-schema-1-18-4"
        );
    }

    #[test]
    fn server_names_are_per_domain() {
        assert_eq!(server_name("prod", TrafficDomain::Internode), "internode.prod");
        assert_eq!(server_name("prod", TrafficDomain::Frontend), "frontend.prod");
    }
}
