//! Defaulting for TemporalCluster
//!
//! The mutating webhook persists the same defaults the builders resolve at
//! reconcile time, so `kubectl get -o yaml` shows the effective spec.

use json_patch::Patch;
use temporal_common::crd::TemporalCluster;
use temporal_common::defaults::{normalize, ImageDefaults};

use crate::error::WebhookError;

/// JSON patch that fills every unset default of `cluster`
///
/// Operator-wide image repositories win over the built-in ones. Empty when
/// the spec is already fully defaulted.
pub fn default_patch(
    cluster: &TemporalCluster,
    images: &ImageDefaults,
) -> Result<Patch, WebhookError> {
    let mut defaulted = images.apply(cluster);
    defaulted.spec = normalize(&defaulted.spec);
    let before = serde_json::to_value(cluster)?;
    let after = serde_json::to_value(&defaulted)?;
    Ok(json_patch::diff(&before, &after))
}
