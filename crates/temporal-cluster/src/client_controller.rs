//! TemporalClusterClient controller
//!
//! Issues an mTLS client certificate from the referenced cluster's frontend
//! intermediate CA and reports the Secret holding it. The Certificate is
//! owned by the client object, so deleting the client revokes access.

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{error, info, instrument};

use temporal_common::crd::{
    Condition, ConditionSet, ConditionStatus, SecretReference, TemporalClusterClient,
    TemporalClusterClientStatus, TrafficDomain, CONDITION_READY,
};
use temporal_common::events::{actions, reasons};
use temporal_common::kube_utils::{controller_owner_ref, data_str, HasApiResource};
use temporal_common::{naming, Error};
use temporal_resources::mtls::cert_manager::Issuer;
use temporal_resources::mtls::state::issuer_key;
use temporal_resources::mtls::{certificate_issued, client_certificate};
use temporal_resources::{ClusterContext, ObservedState, ResourceBuilder};

use crate::controller::{Context, ERROR_REQUEUE, NOT_READY_REQUEUE, RESYNC_INTERVAL};
use crate::engine::{apply_builder, ApplyResult};

/// Referenced cluster does not exist
pub const REASON_CLUSTER_NOT_FOUND: &str = "ClusterNotFound";
/// Referenced cluster does not run cert-manager mTLS on the frontend
pub const REASON_MTLS_NOT_ENABLED: &str = "MTLSNotEnabled";
/// Frontend intermediate CA is not ready yet
pub const REASON_WAITING_FOR_ISSUER: &str = "WaitingForIssuer";
/// Certificate requested, cert-manager has not signed it yet
pub const REASON_CERTIFICATE_PENDING: &str = "CertificatePending";
/// Certificate issued and its Secret written
pub const REASON_CERTIFICATE_ISSUED: &str = "CertificateIssued";

/// Reconcile a TemporalClusterClient
#[instrument(skip(client, ctx), fields(client = %client.name_any()))]
pub async fn reconcile(
    client: Arc<TemporalClusterClient>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    let name = client.name_any();
    let namespace = client
        .namespace()
        .ok_or_else(|| Error::validation("TemporalClusterClient has no namespace"))?;
    let previous = client.status.clone().unwrap_or_default();
    let generation = client.metadata.generation;
    let cluster_name = &client.spec.cluster_ref.name;

    let Some(cluster) = ctx.kube.get_cluster(cluster_name, &namespace).await? else {
        info!(cluster = %cluster_name, "referenced cluster not found");
        let status = not_ready(
            &previous,
            generation,
            REASON_CLUSTER_NOT_FOUND,
            format!("TemporalCluster {cluster_name} not found"),
        );
        persist(&ctx, &name, &namespace, &previous, &status).await?;
        return Ok(Action::requeue(ERROR_REQUEUE));
    };

    let cluster_ctx = Arc::new(ClusterContext::new(&cluster)?);
    let builder = client_certificate(&cluster_ctx, &name, true);
    let owner = controller_owner_ref(client.as_ref()).ok_or_else(|| {
        Error::internal_with_context(
            "client-controller",
            format!("TemporalClusterClient {name} has no uid"),
        )
    })?;

    let mut observed = ObservedState::new();
    if builder.enabled() {
        if let Some(issuer) = ctx
            .kube
            .get(&Issuer::api_resource(), &namespace, builder.issuer())
            .await?
        {
            observed.insert(issuer_key(builder.issuer()), issuer);
        }
    }

    let result = apply_builder(ctx.kube.as_ref(), &builder, &namespace, &owner, &observed).await?;
    let (status, action) = match result {
        ApplyResult::Deferred {
            reason,
            retry_after,
            ..
        } => (
            not_ready(&previous, generation, REASON_WAITING_FOR_ISSUER, reason),
            Action::requeue(retry_after),
        ),
        ApplyResult::Applied { object, .. } => {
            let issued = certificate_issued(&object);
            let mut conditions = previous.condition_set();
            let condition = if issued {
                Condition::new(
                    CONDITION_READY,
                    ConditionStatus::True,
                    REASON_CERTIFICATE_ISSUED,
                    "client certificate issued",
                )
            } else {
                Condition::new(
                    CONDITION_READY,
                    ConditionStatus::False,
                    REASON_CERTIFICATE_PENDING,
                    "waiting for cert-manager to sign the client certificate",
                )
            };
            conditions.upsert(condition.with_generation(generation));
            let status = TemporalClusterClientStatus {
                secret_ref: data_str(&object, "/spec/secretName").map(|secret| SecretReference {
                    name: secret.to_string(),
                }),
                server_name: Some(naming::server_name(&cluster_ctx.name, TrafficDomain::Frontend)),
                conditions: conditions.to_list(),
            };
            let action = if issued {
                Action::requeue(RESYNC_INTERVAL)
            } else {
                Action::requeue(NOT_READY_REQUEUE)
            };
            (status, action)
        }
        ApplyResult::Disabled { deleted } => {
            if deleted {
                info!("deleted client certificate of a cluster without frontend mTLS");
            }
            let status = not_ready(
                &previous,
                generation,
                REASON_MTLS_NOT_ENABLED,
                format!(
                    "TemporalCluster {cluster_name} does not issue frontend client certificates"
                ),
            );
            persist(&ctx, &name, &namespace, &previous, &status).await?;
            return Ok(Action::await_change());
        }
    };

    let newly_issued = status.condition_set().is_true(CONDITION_READY)
        && !previous.condition_set().is_true(CONDITION_READY);
    persist(&ctx, &name, &namespace, &previous, &status).await?;
    if newly_issued {
        ctx.events
            .publish(
                &client.object_ref(&()),
                EventType::Normal,
                reasons::CLIENT_CERTIFICATE_ISSUED,
                actions::ISSUE,
                Some(format!(
                    "client certificate for {cluster_name} stored in secret {}",
                    builder.name()
                )),
            )
            .await;
    }
    Ok(action)
}

/// Error policy for the client controller
pub fn error_policy(
    client: Arc<TemporalClusterClient>,
    error: &Error,
    _ctx: Arc<Context>,
) -> Action {
    error!(?error, client = %client.name_any(), "client reconciliation failed");
    if error.is_retryable() {
        Action::requeue(ERROR_REQUEUE)
    } else {
        Action::await_change()
    }
}

fn not_ready(
    previous: &TemporalClusterClientStatus,
    generation: Option<i64>,
    reason: &str,
    message: impl Into<String>,
) -> TemporalClusterClientStatus {
    let mut conditions: ConditionSet = previous.condition_set();
    conditions.upsert(
        Condition::new(CONDITION_READY, ConditionStatus::False, reason, message)
            .with_generation(generation),
    );
    TemporalClusterClientStatus {
        conditions: conditions.to_list(),
        ..previous.clone()
    }
}

async fn persist(
    ctx: &Context,
    name: &str,
    namespace: &str,
    previous: &TemporalClusterClientStatus,
    status: &TemporalClusterClientStatus,
) -> Result<(), Error> {
    if status != previous {
        ctx.kube.patch_client_status(name, namespace, status).await?;
    }
    Ok(())
}
