//! AdmissionReview handlers for TemporalCluster

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use tracing::{debug, error, info};

use temporal_common::crd::TemporalCluster;

use crate::defaulter::default_patch;
use crate::error::WebhookError;
use crate::validator::{validate_create, validate_delete, validate_update, ValidationOutcome};
use crate::WebhookState;

/// Handle mutating admission review for TemporalClusters
pub async fn mutate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<TemporalCluster>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let request: AdmissionRequest<TemporalCluster> = match body.try_into() {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };
    Json(mutate(&state, &request).into_review())
}

fn mutate(state: &WebhookState, request: &AdmissionRequest<TemporalCluster>) -> AdmissionResponse {
    let response = AdmissionResponse::from(request);
    let Some(cluster) = &request.object else {
        debug!(uid = %request.uid, "no object in request, allowing unchanged");
        return response;
    };

    match default_patch(cluster, &state.images) {
        Ok(patch) if patch.0.is_empty() => response,
        Ok(patch) => {
            debug!(uid = %request.uid, ops = patch.0.len(), "defaulting TemporalCluster");
            response.with_patch(patch).unwrap_or_else(|e| {
                error!(uid = %request.uid, error = %e, "failed to serialize patch");
                AdmissionResponse::from(request).deny(format!("patch serialization error: {e}"))
            })
        }
        Err(e) => response.deny(e.to_string()),
    }
}

/// Handle validating admission review for TemporalClusters
pub async fn validate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<TemporalCluster>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let request: AdmissionRequest<TemporalCluster> = match body.try_into() {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };
    Json(validate(&state, &request).await.into_review())
}

async fn validate(
    state: &WebhookState,
    request: &AdmissionRequest<TemporalCluster>,
) -> AdmissionResponse {
    let outcome = match run_rules(state, request).await {
        Ok(outcome) => outcome,
        Err(e) => return AdmissionResponse::from(request).deny(e.to_string()),
    };

    let mut response = AdmissionResponse::from(request);
    if !outcome.warnings.is_empty() {
        response.warnings = Some(outcome.warnings.clone());
    }
    if outcome.is_allowed() {
        return response;
    }
    info!(
        uid = %request.uid,
        name = %request.name,
        violations = outcome.errors.len(),
        "denying TemporalCluster"
    );
    response.deny(outcome.errors.to_string())
}

async fn run_rules(
    state: &WebhookState,
    request: &AdmissionRequest<TemporalCluster>,
) -> Result<ValidationOutcome, WebhookError> {
    let missing = |which: &str| WebhookError::InvalidReview(format!("{which} is missing"));
    match request.operation {
        Operation::Create => {
            let cluster = request.object.as_ref().ok_or_else(|| missing("object"))?;
            Ok(validate_create(cluster, &state.features).await)
        }
        Operation::Update => {
            let cluster = request.object.as_ref().ok_or_else(|| missing("object"))?;
            let old = request
                .old_object
                .as_ref()
                .ok_or_else(|| missing("oldObject"))?;
            Ok(validate_update(old, cluster, &state.features).await)
        }
        Operation::Delete | Operation::Connect => Ok(validate_delete()),
    }
}
