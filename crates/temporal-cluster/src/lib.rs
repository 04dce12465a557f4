//! TemporalCluster reconciliation
//!
//! This crate provides the reconcile engine that drives a cluster's child
//! resources through the builder plan, the status aggregator, and the
//! controllers for TemporalCluster and TemporalClusterClient CRDs.
//!
//! Related crates:
//! - `temporal-resources`: the child resource builders
//! - `temporal-webhook`: admission validation shared with the engine

pub mod client;
pub mod client_controller;
pub mod controller;
pub mod engine;
pub mod status;

#[cfg(test)]
mod testing;

pub use client::{ClusterKubeClient, ClusterKubeClientImpl};
pub use controller::{error_policy, reconcile, Context, ImageDefaults};
pub use engine::{apply_builder, ApplyResult, PassReport, ReconcileEngine};
pub use status::StatusAggregator;

// Re-export common error types
pub use temporal_common::{Error, Result};
