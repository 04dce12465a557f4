//! One reconcile pass of a TemporalCluster
//!
//! The pass walks the builder plan in order and upserts each child:
//!
//! 1. get the current object by identity, or start from `build()`
//! 2. set the controller owner reference
//! 3. let the builder bring it to the desired state
//! 4. create it if absent, else replace it only when the JSON changed
//!
//! A deferred builder blocks its key; builders depending on a blocked key
//! are skipped and blocked in turn while independent ones keep going. The
//! pass then asks to be requeued after the shortest suggested delay.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::DynamicObject;
use tracing::{debug, info};

use temporal_common::crd::{
    DatastoreStatus, TemporalCluster, TemporalClusterStatus, TrafficDomain,
};
use temporal_common::kube_utils::{controller_owner_ref, is_controlled_by, set_controller_ref};
use temporal_common::{Error, PlatformFeatures};
use temporal_resources::builder::DEFAULT_RETRY_AFTER;
use temporal_resources::mtls::{domain_states, DomainState};
use temporal_resources::{
    build_plan, ClusterContext, Observation, ObservedState, ResourceBuilder, ResourceKey,
    UpdateOutcome,
};
use temporal_webhook::validator::validate_spec;

use crate::client::ClusterKubeClient;
use crate::status::StatusAggregator;

/// What happened to one child
#[derive(Clone, Debug)]
pub enum ApplyResult {
    /// The object holds the desired state
    Applied {
        /// Object as stored by the API server
        object: DynamicObject,
        /// Whether a create or replace was issued
        written: bool,
    },
    /// The builder is waiting on another child
    Deferred {
        /// Wait reason
        reason: String,
        /// Suggested delay
        retry_after: Duration,
        /// The object as it currently exists, if it does
        current: Option<DynamicObject>,
    },
    /// The builder is disabled
    Disabled {
        /// Whether a leftover owned object was deleted
        deleted: bool,
    },
}

/// Upsert (or delete) the child owned by one builder
pub async fn apply_builder(
    kube: &dyn ClusterKubeClient,
    builder: &dyn ResourceBuilder,
    namespace: &str,
    owner: &OwnerReference,
    observed: &ObservedState,
) -> Result<ApplyResult, Error> {
    let key = builder.key();
    let api_resource = builder.api_resource();
    let current = kube.get(&api_resource, namespace, &key.name).await?;

    if !builder.enabled() {
        let owned = current
            .as_ref()
            .is_some_and(|obj| is_controlled_by(obj, &owner.uid));
        if owned {
            kube.delete(&api_resource, namespace, &key.name).await?;
            info!(resource = %key, "deleted disabled resource");
        }
        return Ok(ApplyResult::Disabled { deleted: owned });
    }

    let mut object = current.clone().unwrap_or_else(|| builder.build());
    set_controller_ref(&mut object, owner.clone());

    match builder.update(&mut object, observed)? {
        UpdateOutcome::Deferred {
            reason,
            retry_after,
        } => Ok(ApplyResult::Deferred {
            reason,
            retry_after,
            current,
        }),
        UpdateOutcome::Applied => match current {
            None => {
                let created = kube.create(&api_resource, namespace, &object).await?;
                info!(resource = %key, "created resource");
                Ok(ApplyResult::Applied {
                    object: created,
                    written: true,
                })
            }
            Some(current)
                if serde_json::to_value(&current)? == serde_json::to_value(&object)? =>
            {
                Ok(ApplyResult::Applied {
                    object: current,
                    written: false,
                })
            }
            Some(_) => {
                let replaced = kube.replace(&api_resource, namespace, &object).await?;
                info!(resource = %key, "updated resource");
                Ok(ApplyResult::Applied {
                    object: replaced,
                    written: true,
                })
            }
        },
    }
}

/// Outcome of a pass that did not fail
#[derive(Clone, Debug, Default)]
pub struct PassReport {
    /// Status to persist
    pub status: TemporalClusterStatus,
    /// Children that are waiting, as `Kind/name: reason`
    pub waiting: Vec<String>,
    /// Shortest delay suggested by a waiting child
    pub requeue_after: Option<Duration>,
    /// Creates and replaces issued
    pub written: usize,
    /// Deletes issued
    pub deleted: usize,
    /// Issuance state of each cert-manager traffic domain
    pub domains: Vec<(TrafficDomain, DomainState)>,
}

impl PassReport {
    fn wait(&mut self, key: &ResourceKey, reason: &str, retry_after: Duration) {
        self.waiting.push(format!("{key}: {reason}"));
        self.requeue_after = Some(
            self.requeue_after
                .map_or(retry_after, |current| current.min(retry_after)),
        );
    }

    /// Whether any child is waiting
    pub fn is_waiting(&self) -> bool {
        !self.waiting.is_empty()
    }
}

/// Drives one TemporalCluster to its desired state
pub struct ReconcileEngine<'a> {
    kube: &'a dyn ClusterKubeClient,
    features: &'a PlatformFeatures,
}

impl<'a> ReconcileEngine<'a> {
    /// Engine writing through `kube`
    pub fn new(kube: &'a dyn ClusterKubeClient, features: &'a PlatformFeatures) -> Self {
        Self { kube, features }
    }

    /// Run one pass
    ///
    /// Any error aborts the pass; children already written stay written and
    /// the next pass picks up from a fresh read.
    pub async fn reconcile(&self, cluster: &TemporalCluster) -> Result<PassReport, Error> {
        let ctx = Arc::new(ClusterContext::new(cluster)?);
        validate_spec(cluster).into_result(&ctx.name)?;
        self.check_platform(&ctx).await?;

        let owner = controller_owner_ref(cluster).ok_or_else(|| {
            Error::internal_with_context(
                "reconciler",
                format!("TemporalCluster {} has no uid", ctx.name),
            )
        })?;

        let mut aggregator = StatusAggregator::new(&ctx.status, cluster.metadata.generation);
        aggregator.expect_services(ctx.spec.enabled_services().iter().map(|s| s.as_str()));

        let mut report = PassReport::default();
        let mut observed = ObservedState::new();
        let mut blocked: BTreeSet<ResourceKey> = BTreeSet::new();

        for builder in build_plan(&ctx) {
            let key = builder.key();
            if builder.enabled() {
                let blocked_on = builder.depends_on().into_iter().find(|d| blocked.contains(d));
                if let Some(dep) = blocked_on {
                    debug!(
                        resource = %key,
                        blocked_on = %dep,
                        "skipping resource with blocked dependency"
                    );
                    report.wait(&key, &format!("waiting for {dep}"), DEFAULT_RETRY_AFTER);
                    blocked.insert(key);
                    continue;
                }
            }

            match apply_builder(self.kube, builder.as_ref(), &ctx.namespace, &owner, &observed)
                .await?
            {
                ApplyResult::Applied { object, written } => {
                    if written {
                        report.written += 1;
                    }
                    record(&mut aggregator, builder.observe(&object));
                    observed.insert(key, object);
                }
                ApplyResult::Deferred {
                    reason,
                    retry_after,
                    current,
                } => {
                    debug!(resource = %key, %reason, "resource deferred");
                    if let Some(current) = current {
                        record(&mut aggregator, builder.observe(&current));
                    }
                    report.wait(&key, &reason, retry_after);
                    blocked.insert(key);
                }
                ApplyResult::Disabled { deleted } => {
                    if deleted {
                        report.deleted += 1;
                    }
                }
            }
        }

        report.domains = domain_states(&ctx, &observed);
        for (domain, state) in &report.domains {
            debug!(cluster = %ctx.name, domain = domain.as_str(), %state, "mTLS domain state");
        }

        let message = match report.waiting.len() {
            0 => String::new(),
            n => format!("{n} resources waiting on dependencies"),
        };
        aggregator.mark_reconciled(message);
        report.status = aggregator.finish(&ctx.spec.version);

        info!(
            cluster = %ctx.name,
            written = report.written,
            deleted = report.deleted,
            waiting = report.waiting.len(),
            "reconcile pass finished"
        );
        Ok(report)
    }

    /// The mTLS provider's API must be installed
    async fn check_platform(&self, ctx: &ClusterContext) -> Result<(), Error> {
        let Some(mtls) = ctx.spec.mtls.as_ref() else {
            return Ok(());
        };
        if !mtls.internode_enabled() && !mtls.frontend_enabled() {
            return Ok(());
        }
        let feature = mtls.provider.required_feature();
        if self.features.resolve(feature).await {
            Ok(())
        } else {
            Err(Error::dependency(
                feature.display_name(),
                "required by spec.mTLS.provider but not installed in the cluster",
            ))
        }
    }
}

fn record(aggregator: &mut StatusAggregator, observation: Observation) {
    match observation {
        Observation::None => {}
        Observation::Service(status) => aggregator.add_service_status(status),
        Observation::Datastore(obs) => aggregator.add_datastore_status(DatastoreStatus {
            name: obs.name,
            type_: obs.type_,
            created: obs.created,
            setup: obs.setup,
            schema_version: obs.schema_version,
        }),
    }
}
