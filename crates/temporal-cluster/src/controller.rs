//! TemporalCluster controller
//!
//! `reconcile` runs one engine pass, persists the status when it changed,
//! publishes Events for notable transitions and picks the requeue delay.
//! Failures are written to the `ReconcileError` condition before the error
//! is handed to [`error_policy`].

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use tracing::{error, info, instrument, warn};

use temporal_common::crd::{TemporalCluster, TemporalClusterStatus, CONDITION_READY};
pub use temporal_common::defaults::ImageDefaults;
use temporal_common::events::{actions, reasons, EventPublisher};
use temporal_common::{Error, KubeEventPublisher, PlatformFeatures};

#[cfg(test)]
use temporal_common::{NoopEventPublisher, PlatformFeature};

use crate::client::{ClusterKubeClient, ClusterKubeClientImpl};
use crate::engine::{PassReport, ReconcileEngine};
use crate::status::StatusAggregator;

/// Controller name reported on Events
pub const CONTROLLER_NAME: &str = "temporal-cluster-controller";

/// Requeue delay after a retryable failure
pub const ERROR_REQUEUE: Duration = Duration::from_secs(30);

/// Requeue delay while services are rolling out
pub const NOT_READY_REQUEUE: Duration = Duration::from_secs(10);

/// Periodic resync of a converged cluster
pub const RESYNC_INTERVAL: Duration = Duration::from_secs(300);

/// Shared state for the cluster and client controllers
pub struct Context {
    /// Kubernetes access
    pub kube: Arc<dyn ClusterKubeClient>,
    /// Detected third-party APIs
    pub features: Arc<PlatformFeatures>,
    /// Event sink
    pub events: Arc<dyn EventPublisher>,
    /// Default image repositories
    pub images: ImageDefaults,
}

impl Context {
    /// Create a context from explicit dependencies
    pub fn new(
        kube: Arc<dyn ClusterKubeClient>,
        features: Arc<PlatformFeatures>,
        events: Arc<dyn EventPublisher>,
        images: ImageDefaults,
    ) -> Self {
        Self {
            kube,
            features,
            events,
            images,
        }
    }

    /// Create a context backed by a real client
    pub fn from_client(
        client: Client,
        features: Arc<PlatformFeatures>,
        images: ImageDefaults,
    ) -> Self {
        Self {
            events: Arc::new(KubeEventPublisher::new(client.clone(), CONTROLLER_NAME)),
            kube: Arc::new(ClusterKubeClientImpl::new(client)),
            features,
            images,
        }
    }

    /// Create a context for testing with every platform feature present
    #[cfg(test)]
    pub fn for_testing(kube: Arc<dyn ClusterKubeClient>) -> Self {
        Self {
            kube,
            features: PlatformFeatures::with(&PlatformFeature::ALL),
            events: Arc::new(NoopEventPublisher),
            images: ImageDefaults::default(),
        }
    }
}

/// Reconcile a TemporalCluster
#[instrument(skip(cluster, ctx), fields(cluster = %cluster.name_any()))]
pub async fn reconcile(cluster: Arc<TemporalCluster>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = cluster.name_any();
    let namespace = cluster
        .namespace()
        .ok_or_else(|| Error::config_for(&name, "TemporalCluster has no namespace"))?;
    info!("reconciling cluster");

    let previous = cluster.status.clone().unwrap_or_default();
    let desired = ctx.images.apply(&cluster);
    let engine = ReconcileEngine::new(ctx.kube.as_ref(), &ctx.features);

    match engine.reconcile(&desired).await {
        Ok(report) => {
            if report.status != previous {
                ctx.kube
                    .patch_cluster_status(&name, &namespace, &report.status)
                    .await?;
            }
            publish_transitions(&cluster, &previous, &report.status, &ctx).await;
            Ok(next_action(&report))
        }
        Err(err) => {
            let mut aggregator = StatusAggregator::new(&previous, cluster.metadata.generation);
            aggregator.mark_failed(&err);
            let status = aggregator.finish(&cluster.spec.version);
            if status != previous {
                if let Err(e) = ctx.kube.patch_cluster_status(&name, &namespace, &status).await {
                    warn!(error = %e, "failed to record reconcile error in status");
                }
                let reason = match err {
                    Error::Validation { .. } | Error::Config { .. } => reasons::VALIDATION_FAILED,
                    _ => reasons::RECONCILE_FAILED,
                };
                publish(
                    &cluster,
                    &ctx,
                    EventType::Warning,
                    reason,
                    actions::RECONCILE,
                    err.to_string(),
                )
                .await;
            }
            Err(err)
        }
    }
}

/// Error policy for the cluster controller
///
/// Retryable errors are requeued after [`ERROR_REQUEUE`]; the rest wait
/// for the spec to change.
pub fn error_policy(cluster: Arc<TemporalCluster>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        cluster = %cluster.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );
    if error.is_retryable() {
        Action::requeue(ERROR_REQUEUE)
    } else {
        Action::await_change()
    }
}

fn next_action(report: &PassReport) -> Action {
    if let Some(delay) = report.requeue_after {
        return Action::requeue(delay);
    }
    if !report.status.condition_set().is_true(CONDITION_READY) {
        return Action::requeue(NOT_READY_REQUEUE);
    }
    Action::requeue(RESYNC_INTERVAL)
}

async fn publish(
    cluster: &TemporalCluster,
    ctx: &Context,
    type_: EventType,
    reason: &str,
    action: &str,
    note: String,
) {
    ctx.events
        .publish(&cluster.object_ref(&()), type_, reason, action, Some(note))
        .await;
}

/// Events for what changed between the persisted and the new status
async fn publish_transitions(
    cluster: &TemporalCluster,
    previous: &TemporalClusterStatus,
    current: &TemporalClusterStatus,
    ctx: &Context,
) {
    let desired = &cluster.spec.version;
    if let Some(applied) = previous.version.as_ref() {
        let new_generation = previous.observed_generation != cluster.metadata.generation;
        if applied != desired && new_generation {
            publish(
                cluster,
                ctx,
                EventType::Normal,
                reasons::UPGRADE_STARTED,
                actions::UPGRADE,
                format!("upgrading from {applied} to {desired}"),
            )
            .await;
        }
        if current.version.as_ref() == Some(desired) && applied != desired {
            publish(
                cluster,
                ctx,
                EventType::Normal,
                reasons::UPGRADE_COMPLETED,
                actions::UPGRADE,
                format!("every service runs {desired}"),
            )
            .await;
        }
    }

    for store in &current.persistence {
        let before = previous.datastore(&store.name);
        let setup_now = store.setup && !before.is_some_and(|b| b.setup);
        let migrated_now = store.schema_version.is_some()
            && before.and_then(|b| b.schema_version.as_ref()) != store.schema_version.as_ref();
        if setup_now || migrated_now {
            let note = match &store.schema_version {
                Some(v) if migrated_now => format!("datastore {} schema at {v}", store.name),
                _ => format!("datastore {} schema set up", store.name),
            };
            publish(
                cluster,
                ctx,
                EventType::Normal,
                reasons::SCHEMA_JOB_COMPLETED,
                actions::PROVISION_SCHEMA,
                note,
            )
            .await;
        }
    }

    let was_ready = previous.condition_set().is_true(CONDITION_READY);
    let is_ready = current.condition_set().is_true(CONDITION_READY);
    if is_ready && !was_ready {
        publish(
            cluster,
            ctx,
            EventType::Normal,
            reasons::CLUSTER_READY,
            actions::RECONCILE,
            "all services are ready".to_string(),
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockClusterKubeClient;
    use crate::testing::{cluster, cluster_spec, FakeKube};
    use async_trait::async_trait;
    use k8s_openapi::api::core::v1::ObjectReference;
    use rstest::rstest;
    use std::sync::Mutex;
    use temporal_common::crd::{
        AdminToolsSpec, Condition, ConditionStatus, UiSpec, CONDITION_RECONCILE_ERROR,
    };

    #[derive(Default)]
    struct RecordingPublisher {
        reasons: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EventPublisher for RecordingPublisher {
        async fn publish(
            &self,
            _resource_ref: &ObjectReference,
            _type_: EventType,
            reason: &str,
            _action: &str,
            _note: Option<String>,
        ) {
            self.reasons.lock().unwrap().push(reason.to_string());
        }
    }

    /// Story: a cluster reconciles to Ready through the controller entry point
    ///
    /// Status is patched while things move, Events mark schema progress and
    /// readiness, and the converged cluster resyncs at the slow interval
    /// without patching again.
    #[tokio::test]
    async fn story_controller_drives_cluster_to_ready() {
        let fake = Arc::new(FakeKube::new());
        let events = Arc::new(RecordingPublisher::default());
        let ctx = Arc::new(Context::new(
            fake.clone(),
            PlatformFeatures::with(&[]),
            events.clone(),
            ImageDefaults::default(),
        ));
        let mut tc = cluster(cluster_spec());

        for _ in 0..6 {
            reconcile(Arc::new(tc.clone()), ctx.clone()).await.unwrap();
            tc.status = fake.cluster_statuses().last().cloned();
            fake.complete_jobs();
            fake.roll_out_deployments();
        }

        let patches = fake.cluster_statuses().len();
        let action = reconcile(Arc::new(tc.clone()), ctx.clone()).await.unwrap();
        assert_eq!(action, Action::requeue(RESYNC_INTERVAL));
        assert_eq!(fake.cluster_statuses().len(), patches);

        let published = events.reasons.lock().unwrap().clone();
        assert!(published.contains(&reasons::CLUSTER_READY.to_string()));
        assert_eq!(
            published
                .iter()
                .filter(|r| *r == reasons::SCHEMA_JOB_COMPLETED)
                .count(),
            4
        );
    }

    #[tokio::test]
    async fn waiting_children_requeue_at_their_delay() {
        let fake = Arc::new(FakeKube::new());
        let ctx = Arc::new(Context::for_testing(fake.clone()));
        let action = reconcile(Arc::new(cluster(cluster_spec())), ctx)
            .await
            .unwrap();
        assert_eq!(
            action,
            Action::requeue(temporal_resources::builder::DEFAULT_RETRY_AFTER)
        );
    }

    /// Story: a broken release is requested and the controller stops retrying
    #[tokio::test]
    async fn story_invalid_spec_records_reconcile_error() {
        let fake = Arc::new(FakeKube::new());
        let ctx = Arc::new(Context::for_testing(fake.clone()));
        let mut spec = cluster_spec();
        spec.version = "1.20.0".to_string();
        let tc = Arc::new(cluster(spec));

        let err = reconcile(tc.clone(), ctx.clone()).await.unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(error_policy(tc, &err, ctx), Action::await_change());

        let status = fake.cluster_statuses().last().cloned().unwrap();
        let condition = status
            .condition_set()
            .get(CONDITION_RECONCILE_ERROR)
            .cloned()
            .unwrap();
        assert!(condition.is_true());
        assert!(condition.message.contains("1.20.1"));
    }

    #[tokio::test]
    async fn status_patch_failure_on_error_path_keeps_original_error() {
        let mut mock = MockClusterKubeClient::new();
        mock.expect_patch_cluster_status()
            .returning(|_, _, _| Err(Error::internal("api server down")));
        let ctx = Arc::new(Context::for_testing(Arc::new(mock)));
        let mut spec = cluster_spec();
        spec.version = "latest".to_string();

        let err = reconcile(Arc::new(cluster(spec)), ctx).await.unwrap_err();
        assert_eq!(err.field(), Some("spec.version"));
    }

    #[rstest]
    #[case::waiting(Some(Duration::from_secs(5)), false, Duration::from_secs(5))]
    #[case::waiting_wins_over_ready(Some(Duration::from_secs(5)), true, Duration::from_secs(5))]
    #[case::rolling_out(None, false, NOT_READY_REQUEUE)]
    #[case::converged(None, true, RESYNC_INTERVAL)]
    fn next_action_follows_the_pass(
        #[case] requeue_after: Option<Duration>,
        #[case] ready: bool,
        #[case] expected: Duration,
    ) {
        let status = TemporalClusterStatus {
            conditions: vec![Condition::new(
                CONDITION_READY,
                if ready { ConditionStatus::True } else { ConditionStatus::False },
                "Test",
                "",
            )],
            ..Default::default()
        };
        let report = PassReport {
            status,
            requeue_after,
            ..Default::default()
        };
        assert_eq!(next_action(&report), Action::requeue(expected));
    }

    #[test]
    fn retryable_errors_requeue_after_backoff_floor() {
        let ctx = Arc::new(Context::for_testing(Arc::new(MockClusterKubeClient::new())));
        let tc = Arc::new(cluster(cluster_spec()));
        let action = error_policy(tc, &Error::conflict("Deployment", "prod-frontend"), ctx);
        assert_eq!(action, Action::requeue(ERROR_REQUEUE));
    }

    #[test]
    fn image_defaults_fill_only_unset_repositories() {
        let images = ImageDefaults {
            server: Some("registry.local/temporal/server".to_string()),
            ui: Some("registry.local/temporal/ui".to_string()),
            admintools: Some("registry.local/temporal/admin-tools".to_string()),
        };
        let mut spec = cluster_spec();
        spec.ui = Some(UiSpec {
            enabled: true,
            image: Some("custom/ui".to_string()),
            ..Default::default()
        });
        spec.admintools = Some(AdminToolsSpec {
            enabled: true,
            ..Default::default()
        });

        let applied = images.apply(&cluster(spec));
        assert_eq!(
            applied.spec.image.as_deref(),
            Some("registry.local/temporal/server")
        );
        assert_eq!(
            applied.spec.ui.unwrap().image.as_deref(),
            Some("custom/ui")
        );
        assert_eq!(
            applied.spec.admintools.unwrap().image.as_deref(),
            Some("registry.local/temporal/admin-tools")
        );
    }
}
