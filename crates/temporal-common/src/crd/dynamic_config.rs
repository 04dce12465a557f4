//! Dynamic configuration overrides
//!
//! Rendered into the server's `dynamic_config.yaml`, which the server polls
//! at `pollInterval`. Each key maps to a list of values, each optionally
//! scoped by constraints.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Poll interval used when none is set
pub const DEFAULT_POLL_INTERVAL: &str = "10s";

/// Legal values of the `taskType` constraint
pub const TASK_TYPES: &[&str] = &["Workflow", "Activity"];

/// Dynamic configuration overrides
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DynamicConfigSpec {
    /// How often the server re-reads the file (Go duration)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<String>,

    /// Overrides keyed by dynamic config key
    #[serde(default)]
    pub values: BTreeMap<String, Vec<ConstrainedValue>>,
}

impl DynamicConfigSpec {
    /// Resolved poll interval
    pub fn poll_interval(&self) -> &str {
        self.poll_interval.as_deref().unwrap_or(DEFAULT_POLL_INTERVAL)
    }
}

/// One value with optional scoping constraints
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConstrainedValue {
    /// The value, any JSON type
    #[schemars(schema_with = "super::preserve_unknown_fields")]
    pub value: serde_json::Value,

    /// Scope of the value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Constraints>,
}

/// Scope of a dynamic config value
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Constraints {
    /// Namespace name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Namespace ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_id: Option<String>,

    /// Task queue name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_queue_name: Option<String>,

    /// Task queue type: `Workflow` or `Activity`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,

    /// Shard ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard_id: Option<i32>,

    /// Workflow task type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_queue_type: Option<String>,
}
