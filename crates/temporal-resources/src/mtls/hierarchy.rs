//! Builders for the cert-manager CA hierarchy

use std::sync::Arc;

use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use tracing::debug;

use temporal_common::crd::{MtlsSpec, TrafficDomain};
use temporal_common::kube_utils::HasApiResource;
use temporal_common::{naming, Error};

use super::cert_manager::{
    CaIssuer, Certificate, CertificatePrivateKey, CertificateSpec, IssuerRef, IssuerSpec,
    SelfSignedIssuer, USAGE_CLIENT_AUTH, USAGE_DIGITAL_SIGNATURE, USAGE_KEY_ENCIPHERMENT,
    USAGE_SERVER_AUTH,
};
use super::state::{
    certificate_issued, certificate_key, domain_state, issuer_key, issuer_ready, DomainState,
};
use crate::builder::{
    merge_typed, stub, ObservedState, ResourceBuilder, ResourceKey, UpdateOutcome,
};
use crate::meta::ClusterContext;

const COMPONENT: &str = "mtls";

#[derive(Clone, Debug, PartialEq, Eq)]
enum IssuerSource {
    SelfSigned,
    /// CA issuer signing with the key pair of `certificate`
    Ca { certificate: String },
}

/// A cert-manager Issuer of the hierarchy
pub struct IssuerBuilder {
    ctx: Arc<ClusterContext>,
    name: String,
    source: IssuerSource,
    enabled: bool,
}

impl ResourceBuilder for IssuerBuilder {
    fn key(&self) -> ResourceKey {
        issuer_key(&self.name)
    }

    fn api_resource(&self) -> ApiResource {
        super::cert_manager::Issuer::api_resource()
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn build(&self) -> DynamicObject {
        stub(&self.api_resource(), &self.name, &self.ctx.namespace)
    }

    fn update(
        &self,
        object: &mut DynamicObject,
        observed: &ObservedState,
    ) -> Result<UpdateOutcome, Error> {
        let spec = match &self.source {
            IssuerSource::SelfSigned => IssuerSpec {
                self_signed: Some(SelfSignedIssuer {}),
                ca: None,
            },
            IssuerSource::Ca { certificate } => {
                let issued = observed
                    .get(&certificate_key(certificate))
                    .is_some_and(certificate_issued);
                if !issued {
                    return Ok(UpdateOutcome::deferred(format!(
                        "waiting for certificate {certificate} to be issued"
                    )));
                }
                IssuerSpec {
                    self_signed: None,
                    ca: Some(CaIssuer {
                        secret_name: certificate.clone(),
                    }),
                }
            }
        };
        let desired = super::cert_manager::Issuer::new(
            self.ctx.object_meta(&self.name, COMPONENT),
            spec,
        );
        merge_typed(object, &desired)?;
        Ok(UpdateOutcome::Applied)
    }

    fn depends_on(&self) -> Vec<ResourceKey> {
        match &self.source {
            IssuerSource::SelfSigned => Vec::new(),
            IssuerSource::Ca { certificate } => vec![certificate_key(certificate)],
        }
    }
}

/// A cert-manager Certificate of the hierarchy
pub struct CertificateBuilder {
    ctx: Arc<ClusterContext>,
    name: String,
    issuer: String,
    /// Defer until the issuer is Ready (CA issuers only)
    wait_for_issuer: bool,
    common_name: String,
    dns_names: Vec<String>,
    is_ca: bool,
    usages: Vec<String>,
    duration: Option<String>,
    enabled: bool,
}

impl CertificateBuilder {
    /// Name of the certificate and of its secret
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Issuer signing this certificate
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    fn desired(&self) -> Certificate {
        let renew_before = self
            .ctx
            .spec
            .mtls
            .as_ref()
            .and_then(|m| m.renew_before.clone());
        Certificate::new(
            self.ctx.object_meta(&self.name, COMPONENT),
            CertificateSpec {
                secret_name: self.name.clone(),
                common_name: Some(self.common_name.clone()),
                dns_names: self.dns_names.clone(),
                duration: self.duration.clone(),
                renew_before,
                is_ca: self.is_ca,
                usages: self.usages.clone(),
                private_key: Some(CertificatePrivateKey::rotating_ecdsa()),
                issuer_ref: IssuerRef::issuer(&self.issuer),
            },
        )
    }
}

impl ResourceBuilder for CertificateBuilder {
    fn key(&self) -> ResourceKey {
        certificate_key(&self.name)
    }

    fn api_resource(&self) -> ApiResource {
        Certificate::api_resource()
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn build(&self) -> DynamicObject {
        stub(&self.api_resource(), &self.name, &self.ctx.namespace)
    }

    fn update(
        &self,
        object: &mut DynamicObject,
        observed: &ObservedState,
    ) -> Result<UpdateOutcome, Error> {
        if self.wait_for_issuer {
            let ready = observed
                .get(&issuer_key(&self.issuer))
                .is_some_and(issuer_ready);
            if !ready {
                debug!(
                    certificate = %self.name,
                    issuer = %self.issuer,
                    "certificate waiting for issuer"
                );
                return Ok(UpdateOutcome::deferred(format!(
                    "waiting for issuer {} to be ready",
                    self.issuer
                )));
            }
        }
        merge_typed(object, &self.desired())?;
        Ok(UpdateOutcome::Applied)
    }

    fn depends_on(&self) -> Vec<ResourceKey> {
        vec![issuer_key(&self.issuer)]
    }
}

// =============================================================================
// Constructors
// =============================================================================

fn mtls(ctx: &ClusterContext) -> Option<&MtlsSpec> {
    ctx.spec.mtls.as_ref().filter(|m| m.uses_cert_manager())
}

fn domain_enabled(ctx: &ClusterContext, domain: TrafficDomain) -> bool {
    mtls(ctx).is_some_and(|m| m.domain_enabled(domain))
}

/// Self-signed issuer that signs the root CA
pub fn bootstrap_issuer(ctx: &Arc<ClusterContext>) -> IssuerBuilder {
    IssuerBuilder {
        ctx: ctx.clone(),
        name: naming::bootstrap_issuer(&ctx.name),
        source: IssuerSource::SelfSigned,
        enabled: mtls(ctx).is_some(),
    }
}

/// Root CA certificate
pub fn root_ca_certificate(ctx: &Arc<ClusterContext>) -> CertificateBuilder {
    let durations = mtls(ctx).map(MtlsSpec::durations).unwrap_or_default();
    CertificateBuilder {
        ctx: ctx.clone(),
        name: naming::root_ca_certificate(&ctx.name),
        issuer: naming::bootstrap_issuer(&ctx.name),
        wait_for_issuer: false,
        common_name: format!("{} root CA", ctx.name),
        dns_names: Vec::new(),
        is_ca: true,
        usages: Vec::new(),
        duration: durations.root_ca_certificate,
        enabled: mtls(ctx).is_some(),
    }
}

/// CA issuer on the root certificate
pub fn root_ca_issuer(ctx: &Arc<ClusterContext>) -> IssuerBuilder {
    IssuerBuilder {
        ctx: ctx.clone(),
        name: naming::root_ca_issuer(&ctx.name),
        source: IssuerSource::Ca {
            certificate: naming::root_ca_certificate(&ctx.name),
        },
        enabled: mtls(ctx).is_some(),
    }
}

/// Intermediate CA certificate of a domain
pub fn intermediate_ca_certificate(
    ctx: &Arc<ClusterContext>,
    domain: TrafficDomain,
) -> CertificateBuilder {
    let durations = mtls(ctx).map(MtlsSpec::durations).unwrap_or_default();
    CertificateBuilder {
        ctx: ctx.clone(),
        name: naming::intermediate_ca_certificate(&ctx.name, domain),
        issuer: naming::root_ca_issuer(&ctx.name),
        wait_for_issuer: true,
        common_name: format!("{} {} intermediate CA", ctx.name, domain.as_str()),
        dns_names: Vec::new(),
        is_ca: true,
        usages: Vec::new(),
        duration: durations.intermediate_cas_certificates,
        enabled: domain_enabled(ctx, domain),
    }
}

/// CA issuer on a domain's intermediate certificate
pub fn intermediate_ca_issuer(ctx: &Arc<ClusterContext>, domain: TrafficDomain) -> IssuerBuilder {
    IssuerBuilder {
        ctx: ctx.clone(),
        name: naming::intermediate_ca_issuer(&ctx.name, domain),
        source: IssuerSource::Ca {
            certificate: naming::intermediate_ca_certificate(&ctx.name, domain),
        },
        enabled: domain_enabled(ctx, domain),
    }
}

/// Server leaf of a domain
///
/// Internode certificates are presented by both ends of a connection and
/// carry client and server usages.
pub fn domain_certificate(ctx: &Arc<ClusterContext>, domain: TrafficDomain) -> CertificateBuilder {
    let durations = mtls(ctx).map(MtlsSpec::durations).unwrap_or_default();
    let (usages, duration) = match domain {
        TrafficDomain::Internode => (
            vec![USAGE_SERVER_AUTH, USAGE_CLIENT_AUTH],
            durations.internode_certificate,
        ),
        TrafficDomain::Frontend => (vec![USAGE_SERVER_AUTH], durations.frontend_certificate),
    };
    let server_name = naming::server_name(&ctx.name, domain);
    CertificateBuilder {
        ctx: ctx.clone(),
        name: naming::domain_certificate(&ctx.name, domain),
        issuer: naming::intermediate_ca_issuer(&ctx.name, domain),
        wait_for_issuer: true,
        common_name: server_name.clone(),
        dns_names: vec![server_name],
        is_ca: false,
        usages: leaf_usages(&usages),
        duration,
        enabled: domain_enabled(ctx, domain),
    }
}

/// Client certificate the worker service uses to reach the frontend
pub fn worker_certificate(ctx: &Arc<ClusterContext>) -> CertificateBuilder {
    let mut builder = client_certificate(ctx, "worker", true);
    builder.name = naming::worker_certificate(&ctx.name);
    builder
}

/// Client certificate issued by the frontend intermediate
///
/// Used for the UI, admin tools and TemporalClusterClients.
pub fn client_certificate(
    ctx: &Arc<ClusterContext>,
    client: &str,
    requested: bool,
) -> CertificateBuilder {
    let durations = mtls(ctx).map(MtlsSpec::durations).unwrap_or_default();
    let common_name = format!("{client}.{}", ctx.name);
    CertificateBuilder {
        ctx: ctx.clone(),
        name: naming::client_certificate(&ctx.name, client),
        issuer: naming::intermediate_ca_issuer(&ctx.name, TrafficDomain::Frontend),
        wait_for_issuer: true,
        dns_names: vec![common_name.clone()],
        common_name,
        is_ca: false,
        usages: leaf_usages(&[USAGE_CLIENT_AUTH]),
        duration: durations.client_certificates,
        enabled: requested && domain_enabled(ctx, TrafficDomain::Frontend),
    }
}

fn leaf_usages(extended: &[&str]) -> Vec<String> {
    [USAGE_DIGITAL_SIGNATURE, USAGE_KEY_ENCIPHERMENT]
        .iter()
        .chain(extended)
        .map(|u| u.to_string())
        .collect()
}

/// The whole hierarchy in issuance order
///
/// Every builder is returned; those not needed by the spec are disabled so
/// leftovers from an earlier spec get deleted.
pub fn hierarchy(ctx: &Arc<ClusterContext>) -> Vec<Box<dyn ResourceBuilder>> {
    let mut builders: Vec<Box<dyn ResourceBuilder>> = vec![
        Box::new(bootstrap_issuer(ctx)),
        Box::new(root_ca_certificate(ctx)),
        Box::new(root_ca_issuer(ctx)),
    ];
    for domain in TrafficDomain::ALL {
        builders.push(Box::new(intermediate_ca_certificate(ctx, domain)));
        builders.push(Box::new(intermediate_ca_issuer(ctx, domain)));
    }
    for domain in TrafficDomain::ALL {
        builders.push(Box::new(domain_certificate(ctx, domain)));
    }
    builders.push(Box::new(worker_certificate(ctx)));
    builders.push(Box::new(client_certificate(ctx, "ui", ui_enabled(ctx))));
    builders.push(Box::new(client_certificate(
        ctx,
        "admintools",
        admintools_enabled(ctx),
    )));
    builders
}

/// Issuance state of every domain the cert-manager provider serves
///
/// The frontend domain is only Ready once the enabled client certificates
/// are issued as well.
pub fn domain_states(
    ctx: &Arc<ClusterContext>,
    observed: &ObservedState,
) -> Vec<(TrafficDomain, DomainState)> {
    TrafficDomain::ALL
        .into_iter()
        .filter(|domain| domain_enabled(ctx, *domain))
        .map(|domain| {
            let extra_leaves: Vec<String> = match domain {
                TrafficDomain::Frontend => [
                    worker_certificate(ctx),
                    client_certificate(ctx, "ui", ui_enabled(ctx)),
                    client_certificate(ctx, "admintools", admintools_enabled(ctx)),
                ]
                .into_iter()
                .filter(|b| b.enabled)
                .map(|b| b.name)
                .collect(),
                TrafficDomain::Internode => Vec::new(),
            };
            let state = domain_state(&ctx.name, domain, &extra_leaves, observed);
            (domain, state)
        })
        .collect()
}

fn ui_enabled(ctx: &ClusterContext) -> bool {
    ctx.spec.ui.as_ref().is_some_and(|u| u.enabled)
}

fn admintools_enabled(ctx: &ClusterContext) -> bool {
    ctx.spec.admintools.as_ref().is_some_and(|a| a.enabled)
}
