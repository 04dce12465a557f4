//! Controller runner - builds controller futures for each CRD
//!
//! Each `build_*` function returns a Vec of boxed futures that the caller
//! joins with the webhook server.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, Resource, ResourceExt};

use temporal_cluster::client_controller;
use temporal_cluster::controller::{error_policy, reconcile, Context};
use temporal_common::crd::{TemporalCluster, TemporalClusterClient};

/// Boxed controller future
pub type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Watcher timeout (seconds), kept below the client read timeout
const WATCH_TIMEOUT_SECS: u32 = 25;

fn watcher_config() -> WatcherConfig {
    WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS)
}

/// Api scoped to the watched namespace, or cluster-wide
fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>,
    K: Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Build the TemporalCluster controller
///
/// Changes to owned Deployments, Services, ConfigMaps and Jobs requeue the
/// owning cluster so readiness and schema progress are picked up promptly.
pub fn build_cluster_controllers(
    client: Client,
    ctx: Arc<Context>,
    namespace: Option<&str>,
) -> Vec<ControllerFuture> {
    let clusters: Api<TemporalCluster> = scoped_api(&client, namespace);

    tracing::info!("- TemporalCluster controller");

    vec![Box::pin(
        Controller::new(clusters, watcher_config())
            .owns(scoped_api::<Deployment>(&client, namespace), watcher_config())
            .owns(scoped_api::<Service>(&client, namespace), watcher_config())
            .owns(scoped_api::<ConfigMap>(&client, namespace), watcher_config())
            .owns(scoped_api::<Job>(&client, namespace), watcher_config())
            .shutdown_on_signal()
            .run(reconcile, error_policy, ctx)
            .for_each(log_reconcile_result("TemporalCluster")),
    )]
}

/// Build the TemporalClusterClient controller
///
/// Clients are re-reconciled whenever the cluster they reference changes.
pub fn build_client_controllers(
    client: Client,
    ctx: Arc<Context>,
    namespace: Option<&str>,
) -> Vec<ControllerFuture> {
    let clients: Api<TemporalClusterClient> = scoped_api(&client, namespace);
    let clusters: Api<TemporalCluster> = scoped_api(&client, namespace);

    let controller = Controller::new(clients, watcher_config());
    let store = controller.store();

    tracing::info!("- TemporalClusterClient controller");

    vec![Box::pin(
        controller
            .watches(clusters, watcher_config(), move |cluster| {
                let name = cluster.name_any();
                let namespace = cluster.namespace();
                store
                    .state()
                    .into_iter()
                    .filter(|c| c.spec.cluster_ref.name == name && c.namespace() == namespace)
                    .map(|c| ObjectRef::from_obj(c.as_ref()))
                    .collect::<Vec<_>>()
            })
            .shutdown_on_signal()
            .run(
                client_controller::reconcile,
                client_controller::error_policy,
                ctx,
            )
            .for_each(log_reconcile_result("TemporalClusterClient")),
    )]
}

/// Create a closure that logs reconciliation results
fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_timeout_stays_below_client_read_timeout() {
        assert!(WATCH_TIMEOUT_SECS < 30);
    }

    #[test]
    fn log_closure_accepts_both_outcomes() {
        let log = log_reconcile_result::<u8, String>("Test");
        futures::executor::block_on(log(Ok(1)));
        futures::executor::block_on(log(Err("boom".to_string())));
    }
}
