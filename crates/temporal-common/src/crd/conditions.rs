//! Status conditions
//!
//! Conditions are owned by different stages of a reconcile pass: the engine
//! writes `ReconcileSuccess`/`ReconcileError`, the status aggregator writes
//! `Ready`. [`ConditionSet`] keys them by type so an upsert from one stage
//! can never duplicate or drop a condition owned by another. The list form
//! only exists on the wire.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type: every enabled service reports ready
pub const CONDITION_READY: &str = "Ready";

/// Condition type: the last reconcile pass completed
pub const CONDITION_RECONCILE_SUCCESS: &str = "ReconcileSuccess";

/// Condition type: the last reconcile pass failed
pub const CONDITION_RECONCILE_ERROR: &str = "ReconcileError";

/// Condition status following Kubernetes conventions
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (Ready, ReconcileSuccess, ReconcileError)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned from one status to another
    pub last_transition_time: DateTime<Utc>,

    /// Generation of the TemporalCluster this condition was computed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Create a new condition stamped with the current time
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
            observed_generation: None,
        }
    }

    /// Set the observed generation
    pub fn with_generation(mut self, generation: Option<i64>) -> Self {
        self.observed_generation = generation;
        self
    }

    /// Whether the condition status is `True`
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }

    /// Equality ignoring the transition timestamp
    pub fn same_state(&self, other: &Condition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
            && self.observed_generation == other.observed_generation
    }
}

/// Conditions keyed by type
///
/// At most one entry per type. Upserting a condition whose status did not
/// change keeps the previous `lastTransitionTime`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConditionSet {
    by_type: BTreeMap<String, Condition>,
}

impl ConditionSet {
    /// Build a set from a wire-format list; later duplicates win
    pub fn from_list(conditions: &[Condition]) -> Self {
        let mut set = Self::default();
        for condition in conditions {
            set.by_type
                .insert(condition.type_.clone(), condition.clone());
        }
        set
    }

    /// Insert or replace the condition of the same type
    ///
    /// Returns `true` when anything other than the timestamp changed.
    pub fn upsert(&mut self, mut condition: Condition) -> bool {
        match self.by_type.get(&condition.type_) {
            Some(existing) if existing.same_state(&condition) => false,
            Some(existing) => {
                if existing.status == condition.status {
                    condition.last_transition_time = existing.last_transition_time;
                }
                self.by_type.insert(condition.type_.clone(), condition);
                true
            }
            None => {
                self.by_type.insert(condition.type_.clone(), condition);
                true
            }
        }
    }

    /// Get a condition by type
    pub fn get(&self, type_: &str) -> Option<&Condition> {
        self.by_type.get(type_)
    }

    /// Whether the condition of this type has status `True`
    pub fn is_true(&self, type_: &str) -> bool {
        self.get(type_).is_some_and(Condition::is_true)
    }

    /// Number of distinct condition types
    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }

    /// Wire-format list, ordered by type
    pub fn to_list(&self) -> Vec<Condition> {
        self.by_type.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn ready(status: ConditionStatus, message: &str) -> Condition {
        Condition::new(CONDITION_READY, status, "Test", message)
    }

    #[test]
    fn upsert_replaces_in_place() {
        let mut set = ConditionSet::default();
        assert!(set.upsert(ready(ConditionStatus::False, "waiting")));
        assert!(set.upsert(ready(ConditionStatus::True, "ok")));
        assert_eq!(set.len(), 1);
        assert!(set.is_true(CONDITION_READY));
    }

    #[test]
    fn upsert_of_identical_state_is_a_no_op() {
        let mut set = ConditionSet::default();
        set.upsert(ready(ConditionStatus::True, "ok"));
        assert!(!set.upsert(ready(ConditionStatus::True, "ok")));
    }

    #[test]
    fn unchanged_status_keeps_transition_time() {
        let mut set = ConditionSet::default();
        let mut first = ready(ConditionStatus::False, "waiting for history");
        first.last_transition_time = Utc::now() - Duration::hours(1);
        let original = first.last_transition_time;
        set.upsert(first);

        set.upsert(ready(ConditionStatus::False, "waiting for matching"));
        let stored = set.get(CONDITION_READY).unwrap();
        assert_eq!(stored.message, "waiting for matching");
        assert_eq!(stored.last_transition_time, original);
    }

    #[test]
    fn status_change_moves_transition_time() {
        let mut set = ConditionSet::default();
        let mut first = ready(ConditionStatus::False, "waiting");
        first.last_transition_time = Utc::now() - Duration::hours(1);
        let original = first.last_transition_time;
        set.upsert(first);

        set.upsert(ready(ConditionStatus::True, "ok"));
        assert!(set.get(CONDITION_READY).unwrap().last_transition_time > original);
    }

    #[test]
    fn upsert_never_touches_other_types() {
        let mut set = ConditionSet::default();
        set.upsert(Condition::new(
            CONDITION_RECONCILE_ERROR,
            ConditionStatus::True,
            "Boom",
            "boom",
        ));
        set.upsert(ready(ConditionStatus::True, "ok"));
        assert_eq!(set.len(), 2);
        assert!(set.is_true(CONDITION_RECONCILE_ERROR));
    }

    #[test]
    fn list_round_trip_dedupes_and_orders_by_type() {
        let list = vec![
            ready(ConditionStatus::False, "a"),
            Condition::new(
                CONDITION_RECONCILE_SUCCESS,
                ConditionStatus::True,
                "Ok",
                "",
            ),
            ready(ConditionStatus::True, "b"),
        ];
        let set = ConditionSet::from_list(&list);
        let out = set.to_list();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].type_, CONDITION_READY);
        assert_eq!(out[0].message, "b");
        assert_eq!(out[1].type_, CONDITION_RECONCILE_SUCCESS);
    }

    #[test]
    fn serializes_with_kubernetes_field_names() {
        let c = ready(ConditionStatus::True, "ok").with_generation(Some(3));
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["type"], "Ready");
        assert_eq!(json["status"], "True");
        assert_eq!(json["observedGeneration"], 3);
        assert!(json.get("lastTransitionTime").is_some());
    }
}
