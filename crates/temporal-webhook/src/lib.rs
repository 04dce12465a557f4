//! Admission webhook for TemporalCluster
//!
//! Two endpoints, registered by the operator's webhook configurations:
//!
//! - `POST /mutate-temporal-io-v1beta1-temporalcluster` persists defaults
//!   as a JSON patch
//! - `POST /validate-temporal-io-v1beta1-temporalcluster` runs the
//!   admission rules and denies with a field-keyed message list
//!
//! The rules live in [`validator`] so the reconcile engine can run the same
//! checks on objects admitted before the webhook was installed.

pub mod defaulter;
pub mod error;
pub mod handlers;
pub mod validator;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use temporal_common::defaults::ImageDefaults;
use temporal_common::PlatformFeatures;

pub use error::WebhookError;
pub use validator::{FieldError, FieldErrors, ValidationOutcome};

/// Path of the mutating endpoint
pub const MUTATE_PATH: &str = "/mutate-temporal-io-v1beta1-temporalcluster";

/// Path of the validating endpoint
pub const VALIDATE_PATH: &str = "/validate-temporal-io-v1beta1-temporalcluster";

/// Shared state for webhook handlers
pub struct WebhookState {
    /// Detected third-party APIs, shared with the controllers
    pub features: Arc<PlatformFeatures>,
    /// Operator-wide image repositories
    pub images: ImageDefaults,
}

impl WebhookState {
    /// Create webhook state
    pub fn new(features: Arc<PlatformFeatures>, images: ImageDefaults) -> Self {
        Self { features, images }
    }
}

/// Create the webhook router
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route(MUTATE_PATH, post(handlers::mutate_handler))
        .route(VALIDATE_PATH, post(handlers::validate_handler))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}
