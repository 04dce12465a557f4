//! Folds child observations into a TemporalClusterStatus

use temporal_common::crd::{
    Condition, ConditionSet, ConditionStatus, DatastoreStatus, ServiceStatus,
    TemporalClusterStatus, CONDITION_READY, CONDITION_RECONCILE_ERROR,
    CONDITION_RECONCILE_SUCCESS,
};
use temporal_common::Error;

/// Ready reason when every service reports ready
pub const REASON_SERVICES_READY: &str = "ServicesReady";
/// Ready reason when at least one service is outstanding
pub const REASON_SERVICES_NOT_READY: &str = "ServicesNotReady";
/// Reason on the reconcile conditions after a clean pass
pub const REASON_RECONCILE_SUCCEEDED: &str = "ReconcileSucceeded";

/// Accumulates one pass worth of status
///
/// Starts from the last persisted status so entries a pass did not observe
/// (a Deployment blocked on a certificate, a deleted schema job) keep their
/// previous values.
#[derive(Clone, Debug)]
pub struct StatusAggregator {
    services: Vec<ServiceStatus>,
    persistence: Vec<DatastoreStatus>,
    conditions: ConditionSet,
    expected: Vec<String>,
    version: Option<String>,
    generation: Option<i64>,
}

impl StatusAggregator {
    /// Aggregator seeded with `previous`, stamping conditions with `generation`
    pub fn new(previous: &TemporalClusterStatus, generation: Option<i64>) -> Self {
        Self {
            services: previous.services.clone(),
            persistence: previous.persistence.clone(),
            conditions: previous.condition_set(),
            expected: Vec::new(),
            version: previous.version.clone(),
            generation,
        }
    }

    /// Declare the services that must report ready
    ///
    /// Entries for services outside this set are dropped on [`finish`](Self::finish).
    pub fn expect_services<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expected = names.into_iter().map(Into::into).collect();
    }

    /// Find-or-insert a service entry by name
    pub fn add_service_status(&mut self, status: ServiceStatus) {
        match self.services.iter_mut().find(|s| s.name == status.name) {
            Some(existing) => *existing = status,
            None => self.services.push(status),
        }
    }

    /// Find-or-insert a datastore entry by name
    ///
    /// `created` and `setup` only ever move to true; a schema version is
    /// kept until a newer one is reported.
    pub fn add_datastore_status(&mut self, status: DatastoreStatus) {
        match self.persistence.iter_mut().find(|s| s.name == status.name) {
            Some(existing) => {
                existing.type_ = status.type_;
                existing.created |= status.created;
                existing.setup |= status.setup;
                if status.schema_version.is_some() {
                    existing.schema_version = status.schema_version;
                }
            }
            None => self.persistence.push(status),
        }
    }

    /// Expected services that are not ready, in declaration order
    pub fn outstanding_services(&self) -> Vec<&str> {
        self.expected
            .iter()
            .filter(|name| {
                !self
                    .services
                    .iter()
                    .any(|s| &s.name == *name && s.ready)
            })
            .map(String::as_str)
            .collect()
    }

    /// `Ready=True` iff every expected service reports ready
    pub fn compute_ready_condition(&self) -> Condition {
        let outstanding = self.outstanding_services();
        let condition = if outstanding.is_empty() {
            Condition::new(
                CONDITION_READY,
                ConditionStatus::True,
                REASON_SERVICES_READY,
                "all services are ready",
            )
        } else {
            Condition::new(
                CONDITION_READY,
                ConditionStatus::False,
                REASON_SERVICES_NOT_READY,
                format!("services not ready: {}", outstanding.join(", ")),
            )
        };
        condition.with_generation(self.generation)
    }

    /// Upsert a condition by type, leaving other types alone
    ///
    /// Returns `true` when the condition changed.
    pub fn set_condition(&mut self, condition: Condition) -> bool {
        self.conditions.upsert(condition)
    }

    /// Record a successful pass: Ready plus the reconcile conditions
    pub fn mark_reconciled(&mut self, message: impl Into<String>) {
        let ready = self.compute_ready_condition();
        self.set_condition(ready);
        let message = message.into();
        self.set_condition(
            Condition::new(
                CONDITION_RECONCILE_SUCCESS,
                ConditionStatus::True,
                REASON_RECONCILE_SUCCEEDED,
                message.clone(),
            )
            .with_generation(self.generation),
        );
        self.set_condition(
            Condition::new(
                CONDITION_RECONCILE_ERROR,
                ConditionStatus::False,
                REASON_RECONCILE_SUCCEEDED,
                message,
            )
            .with_generation(self.generation),
        );
    }

    /// Record a failed pass; service and datastore entries stay as they were
    pub fn mark_failed(&mut self, error: &Error) {
        let message = error.to_string();
        self.set_condition(
            Condition::new(
                CONDITION_RECONCILE_ERROR,
                ConditionStatus::True,
                error.reason(),
                message.clone(),
            )
            .with_generation(self.generation),
        );
        self.set_condition(
            Condition::new(
                CONDITION_RECONCILE_SUCCESS,
                ConditionStatus::False,
                error.reason(),
                message,
            )
            .with_generation(self.generation),
        );
    }

    /// Final status
    ///
    /// `version` moves to `desired_version` only once every expected
    /// service is ready at that version.
    pub fn finish(mut self, desired_version: &str) -> TemporalClusterStatus {
        if !self.expected.is_empty() {
            let expected = &self.expected;
            self.services.retain(|s| expected.contains(&s.name));
        }
        let converged = !self.expected.is_empty()
            && self.expected.iter().all(|name| {
                self.services
                    .iter()
                    .any(|s| &s.name == name && s.ready && s.version == desired_version)
            });
        if converged {
            self.version = Some(desired_version.to_string());
        }
        TemporalClusterStatus {
            version: self.version,
            services: self.services,
            persistence: self.persistence,
            conditions: self.conditions.to_list(),
            observed_generation: self.generation,
        }
    }
}
