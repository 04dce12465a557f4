//! Spec normalization
//!
//! The raw spec is full of optional fields. [`normalize`] resolves every
//! default once, up front; builders then read through the accessor methods
//! below, which apply the same defaults so an un-normalized spec still
//! produces the same objects. The admission webhook's `Default` entry point
//! persists the normalized form.

use k8s_openapi::api::core::v1::ResourceRequirements;

use crate::crd::{
    AdminToolsSpec, ServiceName, ServiceSpec, ServicesSpec, TemporalCluster, TemporalClusterSpec,
    UiSpec,
};

/// Server image repository
pub const DEFAULT_SERVER_IMAGE: &str = "temporalio/server";

/// UI image repository
pub const DEFAULT_UI_IMAGE: &str = "temporalio/ui";

/// UI image tag
pub const DEFAULT_UI_VERSION: &str = "2.21.3";

/// UI HTTP port
pub const UI_PORT: i32 = 8080;

/// Admin tools image repository
pub const DEFAULT_ADMINTOOLS_IMAGE: &str = "temporalio/admin-tools";

/// Seconds finished jobs are kept
pub const DEFAULT_JOB_TTL_SECONDS: i32 = 300;

/// Prometheus listen port
pub const DEFAULT_METRICS_PORT: i32 = 9090;

/// Cassandra CQL port
pub const DEFAULT_CASSANDRA_PORT: i32 = 9042;

/// SQL connect protocol
pub const DEFAULT_CONNECT_PROTOCOL: &str = "tcp";

/// Replicas per service
pub const DEFAULT_REPLICAS: i32 = 1;

/// Default ports of one service
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServicePorts {
    /// gRPC port
    pub grpc: i32,
    /// Ringpop membership port
    pub membership: i32,
    /// HTTP API port (frontends only)
    pub http: Option<i32>,
}

/// Ports the Temporal helm chart uses for each service
pub fn default_ports(service: ServiceName) -> ServicePorts {
    match service {
        ServiceName::Frontend => ServicePorts {
            grpc: 7233,
            membership: 6933,
            http: Some(7243),
        },
        ServiceName::InternalFrontend => ServicePorts {
            grpc: 7236,
            membership: 6936,
            http: Some(7246),
        },
        ServiceName::History => ServicePorts {
            grpc: 7234,
            membership: 6934,
            http: None,
        },
        ServiceName::Matching => ServicePorts {
            grpc: 7235,
            membership: 6935,
            http: None,
        },
        ServiceName::Worker => ServicePorts {
            grpc: 7239,
            membership: 6939,
            http: None,
        },
    }
}

/// A service with every default applied
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedService {
    /// Which service
    pub name: ServiceName,
    /// Whether it runs
    pub enabled: bool,
    /// Pod replicas
    pub replicas: i32,
    /// gRPC port
    pub port: i32,
    /// Membership port
    pub membership_port: i32,
    /// HTTP port
    pub http_port: Option<i32>,
    /// Container resources
    pub resources: Option<ResourceRequirements>,
}

impl TemporalClusterSpec {
    /// One service with defaults applied
    pub fn service(&self, name: ServiceName) -> ResolvedService {
        let overrides = self.services.as_ref().and_then(|s| s.get(name));
        let ports = default_ports(name);
        let enabled = match name {
            ServiceName::InternalFrontend => overrides.and_then(|o| o.enabled).unwrap_or(false),
            _ => overrides.and_then(|o| o.enabled).unwrap_or(true),
        };
        ResolvedService {
            name,
            enabled,
            replicas: overrides
                .and_then(|o| o.replicas)
                .unwrap_or(DEFAULT_REPLICAS),
            port: overrides.and_then(|o| o.port).unwrap_or(ports.grpc),
            membership_port: overrides
                .and_then(|o| o.membership_port)
                .unwrap_or(ports.membership),
            http_port: overrides.and_then(|o| o.http_port).or(ports.http),
            resources: overrides.and_then(|o| o.resources.clone()),
        }
    }

    /// Services that run, in rollout order
    pub fn enabled_services(&self) -> Vec<ServiceName> {
        ServiceName::ALL
            .into_iter()
            .filter(|name| self.service(*name).enabled)
            .collect()
    }

    /// Whether the internal frontend runs
    pub fn internal_frontend_enabled(&self) -> bool {
        self.service(ServiceName::InternalFrontend).enabled
    }

    /// `<repository>:<version>` of the server image
    pub fn server_image(&self) -> String {
        format!(
            "{}:{}",
            self.image.as_deref().unwrap_or(DEFAULT_SERVER_IMAGE),
            self.version
        )
    }

    /// `<repository>:<tag>` of the admin tools image
    pub fn admintools_image(&self) -> String {
        let admintools = self.admintools.as_ref();
        format!(
            "{}:{}",
            admintools
                .and_then(|a| a.image.as_deref())
                .unwrap_or(DEFAULT_ADMINTOOLS_IMAGE),
            admintools
                .and_then(|a| a.version.as_deref())
                .unwrap_or(&self.version)
        )
    }

    /// `<repository>:<tag>` of the UI image
    pub fn ui_image(&self) -> String {
        let ui = self.ui.as_ref();
        format!(
            "{}:{}",
            ui.and_then(|u| u.image.as_deref())
                .unwrap_or(DEFAULT_UI_IMAGE),
            ui.and_then(|u| u.version.as_deref())
                .unwrap_or(DEFAULT_UI_VERSION)
        )
    }

    /// Seconds finished jobs are kept
    pub fn job_ttl_seconds(&self) -> i32 {
        self.job_ttl_seconds_after_finished
            .unwrap_or(DEFAULT_JOB_TTL_SECONDS)
    }

    /// Prometheus port when metrics are enabled
    pub fn metrics_port(&self) -> Option<i32> {
        self.metrics
            .as_ref()
            .filter(|m| m.enabled)
            .map(|m| m.port.unwrap_or(DEFAULT_METRICS_PORT))
    }
}

/// Operator-wide image repositories used when a cluster does not name one
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ImageDefaults {
    /// Server image repository
    pub server: Option<String>,
    /// UI image repository
    pub ui: Option<String>,
    /// Admin tools image repository
    pub admintools: Option<String>,
}

impl ImageDefaults {
    /// Copy of `cluster` with unset image repositories filled in
    pub fn apply(&self, cluster: &TemporalCluster) -> TemporalCluster {
        let mut cluster = cluster.clone();
        let spec = &mut cluster.spec;
        if spec.image.is_none() {
            spec.image = self.server.clone();
        }
        if let Some(ui) = spec.ui.as_mut().filter(|ui| ui.image.is_none()) {
            ui.image = self.ui.clone();
        }
        if let Some(admintools) = spec
            .admintools
            .as_mut()
            .filter(|a| a.image.is_none())
        {
            admintools.image = self.admintools.clone();
        }
        cluster
    }
}

/// Resolve every default of a spec
///
/// Idempotent: `normalize(&normalize(s)) == normalize(s)`. Values that must
/// track the cluster version (the admin tools tag) are left unset so an
/// upgrade moves them along.
pub fn normalize(spec: &TemporalClusterSpec) -> TemporalClusterSpec {
    let mut out = spec.clone();

    out.image.get_or_insert_with(|| DEFAULT_SERVER_IMAGE.to_string());
    out.job_ttl_seconds_after_finished
        .get_or_insert(DEFAULT_JOB_TTL_SECONDS);

    let services = out.services.get_or_insert_with(ServicesSpec::default);
    for name in ServiceName::ALL {
        let slot = services.slot_mut(name);
        if name == ServiceName::InternalFrontend && slot.is_none() {
            continue;
        }
        let ports = default_ports(name);
        let svc = slot.get_or_insert_with(ServiceSpec::default);
        if name != ServiceName::InternalFrontend {
            svc.enabled.get_or_insert(true);
        } else {
            svc.enabled.get_or_insert(false);
        }
        svc.replicas.get_or_insert(DEFAULT_REPLICAS);
        svc.port.get_or_insert(ports.grpc);
        svc.membership_port.get_or_insert(ports.membership);
        if svc.http_port.is_none() {
            svc.http_port = ports.http;
        }
    }

    for store in out.persistence.stores_mut() {
        if let Some(sql) = store.sql.as_mut() {
            sql.connect_protocol
                .get_or_insert_with(|| DEFAULT_CONNECT_PROTOCOL.to_string());
        }
        if let Some(cassandra) = store.cassandra.as_mut() {
            cassandra.port.get_or_insert(DEFAULT_CASSANDRA_PORT);
            cassandra.replication_factor.get_or_insert(1);
        }
    }

    if let Some(ui) = out.ui.as_mut() {
        normalize_ui(ui);
    }
    if let Some(admintools) = out.admintools.as_mut() {
        normalize_admintools(admintools);
    }

    if let Some(mtls) = out.mtls.as_mut() {
        mtls.certificates_duration = Some(mtls.durations());
        mtls.refresh_interval = Some(mtls.refresh_interval().to_string());
    }

    if let Some(dynamic) = out.dynamic_config.as_mut() {
        dynamic.poll_interval = Some(dynamic.poll_interval().to_string());
    }

    if let Some(metrics) = out.metrics.as_mut() {
        metrics.port.get_or_insert(DEFAULT_METRICS_PORT);
    }

    out
}

fn normalize_ui(ui: &mut UiSpec) {
    ui.image.get_or_insert_with(|| DEFAULT_UI_IMAGE.to_string());
    ui.version
        .get_or_insert_with(|| DEFAULT_UI_VERSION.to_string());
    ui.replicas.get_or_insert(DEFAULT_REPLICAS);
}

fn normalize_admintools(admintools: &mut AdminToolsSpec) {
    admintools
        .image
        .get_or_insert_with(|| DEFAULT_ADMINTOOLS_IMAGE.to_string());
}
