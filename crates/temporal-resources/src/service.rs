//! Network identity of the server services
//!
//! Every service gets a headless Service exposing its membership port; the
//! ringpop ring is bootstrapped from its endpoints, so not-ready addresses
//! are published. The frontends additionally get a ClusterIP Service that
//! clients dial.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::DynamicObject;
use kube::discovery::ApiResource;

use temporal_common::crd::ServiceName;
use temporal_common::kube_utils::build_api_resource;
use temporal_common::{naming, Error};

use crate::builder::{merge_typed, stub, ObservedState, ResourceBuilder, ResourceKey, UpdateOutcome};
use crate::meta::ClusterContext;

/// Port name of the gRPC endpoint
pub const GRPC_PORT_NAME: &str = "grpc-rpc";
/// Port name of the membership endpoint
pub const MEMBERSHIP_PORT_NAME: &str = "tcp-membership";
/// Port name of the HTTP API
pub const HTTP_PORT_NAME: &str = "http";
/// Port name of the metrics endpoint
pub const METRICS_PORT_NAME: &str = "metrics";

fn port(name: &str, port: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port,
        target_port: Some(IntOrString::String(name.to_string())),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }
}

/// Which flavour of Service to build
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Flavour {
    Headless,
    Frontend,
}

/// A Service of one server service
pub struct ServiceBuilder {
    ctx: Arc<ClusterContext>,
    service: ServiceName,
    flavour: Flavour,
}

impl ServiceBuilder {
    /// Headless membership Service
    pub fn headless(ctx: Arc<ClusterContext>, service: ServiceName) -> Self {
        Self {
            ctx,
            service,
            flavour: Flavour::Headless,
        }
    }

    /// ClusterIP Service of a frontend
    pub fn frontend(ctx: Arc<ClusterContext>, service: ServiceName) -> Self {
        Self {
            ctx,
            service,
            flavour: Flavour::Frontend,
        }
    }

    fn name(&self) -> String {
        match self.flavour {
            Flavour::Headless => naming::headless_service(&self.ctx.name, self.service),
            Flavour::Frontend => naming::frontend_service(&self.ctx.name, self.service),
        }
    }

    fn ports(&self) -> Vec<ServicePort> {
        let resolved = self.ctx.spec.service(self.service);
        let mut ports = match self.flavour {
            Flavour::Headless => vec![port(MEMBERSHIP_PORT_NAME, resolved.membership_port)],
            Flavour::Frontend => vec![port(GRPC_PORT_NAME, resolved.port)],
        };
        if self.flavour == Flavour::Frontend && crate::config::http_api_enabled(&self.ctx) {
            if let Some(http) = resolved.http_port {
                ports.push(port(HTTP_PORT_NAME, http));
            }
        }
        if self.flavour == Flavour::Headless {
            if let Some(metrics) = self.ctx.spec.metrics_port() {
                ports.push(port(METRICS_PORT_NAME, metrics));
            }
        }
        ports
    }
}

impl ResourceBuilder for ServiceBuilder {
    fn key(&self) -> ResourceKey {
        ResourceKey::new("Service", self.name())
    }

    fn api_resource(&self) -> ApiResource {
        build_api_resource("v1", "Service")
    }

    fn enabled(&self) -> bool {
        let running = self.ctx.spec.service(self.service).enabled;
        match self.flavour {
            Flavour::Headless => running,
            Flavour::Frontend => {
                running
                    && matches!(
                        self.service,
                        ServiceName::Frontend | ServiceName::InternalFrontend
                    )
            }
        }
    }

    fn build(&self) -> DynamicObject {
        stub(&self.api_resource(), &self.name(), &self.ctx.namespace)
    }

    fn update(
        &self,
        object: &mut DynamicObject,
        _observed: &ObservedState,
    ) -> Result<UpdateOutcome, Error> {
        let component = self.service.as_str();
        let selector: BTreeMap<String, String> = self.ctx.selector_labels(component);
        let spec = match self.flavour {
            Flavour::Headless => ServiceSpec {
                cluster_ip: Some("None".to_string()),
                publish_not_ready_addresses: Some(true),
                selector: Some(selector),
                ports: Some(self.ports()),
                ..Default::default()
            },
            Flavour::Frontend => ServiceSpec {
                type_: Some("ClusterIP".to_string()),
                selector: Some(selector),
                ports: Some(self.ports()),
                ..Default::default()
            },
        };
        let desired = Service {
            metadata: self.ctx.object_meta(&self.name(), component),
            spec: Some(spec),
            ..Default::default()
        };
        merge_typed(object, &desired)?;
        Ok(UpdateOutcome::Applied)
    }
}

/// Every Service of the cluster in apply order
pub fn services(ctx: &Arc<ClusterContext>) -> Vec<Box<dyn ResourceBuilder>> {
    let mut builders: Vec<Box<dyn ResourceBuilder>> = Vec::new();
    for service in ServiceName::ALL {
        builders.push(Box::new(ServiceBuilder::headless(ctx.clone(), service)));
    }
    for service in [ServiceName::Frontend, ServiceName::InternalFrontend] {
        builders.push(Box::new(ServiceBuilder::frontend(ctx.clone(), service)));
    }
    builders
}
