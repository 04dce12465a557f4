//! Child resource builders for TemporalCluster
//!
//! Every object the operator owns for a cluster is produced by one
//! [`ResourceBuilder`]:
//!
//! - **Config**: server config, dynamic config and schema scripts ConfigMaps
//! - **Network**: ServiceAccount, headless and frontend Services, UI Ingress
//! - **Persistence**: create/setup/update schema Jobs per datastore
//! - **mTLS**: the cert-manager CA hierarchy
//! - **Workloads**: per-service Deployments, UI and admin tools
//!
//! [`plan::build_plan`] assembles them in apply order.

pub mod admintools;
pub mod builder;
pub mod config;
pub mod deployment;
pub mod dynamic_config;
pub mod ingress;
pub mod meta;
pub mod mtls;
pub mod persistence;
pub mod plan;
pub mod pod;
pub mod service;
pub mod service_account;
pub mod ui;

pub use builder::{
    DatastoreObservation, Observation, ObservedState, ResourceBuilder, ResourceKey, UpdateOutcome,
};
pub use meta::ClusterContext;
pub use plan::build_plan;
