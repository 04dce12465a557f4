//! Startup tasks run before the controllers start

pub mod crds;

pub use crds::{crd_manifests, ensure_crds};
