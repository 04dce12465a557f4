//! Common types for the Temporal operator: CRDs, errors, version gating and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod defaults;
pub mod duration;
pub mod error;
pub mod events;
pub mod features;
pub mod kube_utils;
pub mod naming;
pub mod telemetry;
pub mod version;

pub use error::Error;
pub use events::{EventPublisher, KubeEventPublisher, NoopEventPublisher};
pub use features::{PlatformFeature, PlatformFeatures};
pub use version::{Version, VersionError, VersionRange};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group for all operator CRDs
pub const API_GROUP: &str = "temporal.io";

/// API version for all operator CRDs
pub const API_VERSION: &str = "temporal.io/v1beta1";

/// Field manager used for server-side apply and status patches
pub const FIELD_MANAGER: &str = "temporal-operator";

/// Standard label: resource name
pub const LABEL_NAME: &str = "app.kubernetes.io/name";

/// Standard label: owning cluster instance
pub const LABEL_INSTANCE: &str = "app.kubernetes.io/instance";

/// Standard label: Temporal component (frontend, history, ui, ...)
pub const LABEL_COMPONENT: &str = "app.kubernetes.io/component";

/// Standard label: Temporal version running in the pod
pub const LABEL_VERSION: &str = "app.kubernetes.io/version";

/// Standard label: managed-by
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Value for the managed-by label
pub const LABEL_MANAGED_BY_OPERATOR: &str = "temporal-operator";

/// Pod template annotation holding the hash of the rendered server config
pub const ANNOTATION_CONFIG_HASH: &str = "temporal.io/config-hash";
