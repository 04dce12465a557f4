//! The fixed, ordered set of builders for one cluster

use std::sync::Arc;

use crate::admintools::AdminToolsBuilder;
use crate::builder::ResourceBuilder;
use crate::config::ServerConfigBuilder;
use crate::deployment::deployments;
use crate::dynamic_config::DynamicConfigBuilder;
use crate::ingress::UiIngressBuilder;
use crate::meta::ClusterContext;
use crate::mtls::hierarchy;
use crate::persistence::{schema_jobs, SchemaScriptsBuilder};
use crate::service::services;
use crate::service_account::ServiceAccountBuilder;
use crate::ui::{UiDeploymentBuilder, UiServiceBuilder};

/// Every builder of the cluster in apply order
///
/// Config and network identity come first, then schema jobs, the CA
/// hierarchy, the server Deployments, add-ons and finally the Ingress.
/// Disabled builders stay in the plan so their leftovers get deleted.
pub fn build_plan(ctx: &Arc<ClusterContext>) -> Vec<Box<dyn ResourceBuilder>> {
    let mut plan: Vec<Box<dyn ResourceBuilder>> = vec![
        Box::new(ServiceAccountBuilder::new(ctx.clone())),
        Box::new(ServerConfigBuilder::new(ctx.clone())),
        Box::new(DynamicConfigBuilder::new(ctx.clone())),
        Box::new(SchemaScriptsBuilder::new(ctx.clone())),
    ];
    plan.extend(services(ctx));
    plan.extend(schema_jobs(ctx));
    plan.extend(hierarchy(ctx));
    plan.extend(deployments(ctx));
    plan.push(Box::new(UiDeploymentBuilder::new(ctx.clone())));
    plan.push(Box::new(UiServiceBuilder::new(ctx.clone())));
    plan.push(Box::new(AdminToolsBuilder::new(ctx.clone())));
    plan.push(Box::new(UiIngressBuilder::new(ctx.clone())));
    plan
}
