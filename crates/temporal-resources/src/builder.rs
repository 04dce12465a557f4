//! The builder protocol every child resource implements
//!
//! A builder owns exactly one child object. The engine fetches the current
//! object (or starts from [`ResourceBuilder::build`]), hands it to
//! [`ResourceBuilder::update`] to be brought to the desired state, and writes
//! the result back only when the JSON changed. `update` performs no I/O; the
//! state it may read about other children comes in through
//! [`ObservedState`].

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use serde::Serialize;
use serde_json::Value;

use temporal_common::crd::{DatastoreType, ServiceStatus};
use temporal_common::Error;

/// Identity of a child resource within one cluster
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    /// Kubernetes kind
    pub kind: String,
    /// Object name
    pub name: String,
}

impl ResourceKey {
    /// Key for `kind`/`name`
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Result of bringing one object to its desired state
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The object holds the desired state and may be written
    Applied,
    /// A dependency is not ready; do not write and try again later
    Deferred {
        /// Human-readable wait reason
        reason: String,
        /// Suggested delay before the next attempt
        retry_after: Duration,
    },
}

impl UpdateOutcome {
    /// Deferral with the default retry delay
    pub fn deferred(reason: impl Into<String>) -> Self {
        Self::Deferred {
            reason: reason.into(),
            retry_after: DEFAULT_RETRY_AFTER,
        }
    }

    /// Whether the outcome is a deferral
    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred { .. })
    }
}

/// Delay used by builders that wait on another child
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(10);

/// Provisioning progress of one datastore, as seen on its jobs
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DatastoreObservation {
    /// Store name
    pub name: String,
    /// Backend type
    pub type_: DatastoreType,
    /// The create-database job completed (or creation is skipped)
    pub created: bool,
    /// The setup-schema job completed
    pub setup: bool,
    /// Version the update-schema job completed for
    pub schema_version: Option<String>,
}

/// What a builder learned from the object it just applied
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Observation {
    /// Nothing to report
    #[default]
    None,
    /// Readiness of a server service
    Service(ServiceStatus),
    /// Progress of a datastore's schema jobs
    Datastore(DatastoreObservation),
}

/// Objects already applied in the current pass, keyed by identity
///
/// Later builders read their dependencies from here.
#[derive(Clone, Debug, Default)]
pub struct ObservedState {
    objects: BTreeMap<ResourceKey, DynamicObject>,
}

impl ObservedState {
    /// Empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the object a builder ended up with
    pub fn insert(&mut self, key: ResourceKey, object: DynamicObject) {
        self.objects.insert(key, object);
    }

    /// Object recorded under `key`
    pub fn get(&self, key: &ResourceKey) -> Option<&DynamicObject> {
        self.objects.get(key)
    }

    /// Whether `key` was recorded
    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.objects.contains_key(key)
    }

    /// Number of recorded objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// One child resource of a TemporalCluster
pub trait ResourceBuilder: Send + Sync {
    /// Kind and name of the child
    fn key(&self) -> ResourceKey;

    /// API coordinates of the child
    fn api_resource(&self) -> ApiResource;

    /// Whether the child should exist. A disabled child is deleted.
    fn enabled(&self) -> bool {
        true
    }

    /// Empty object carrying only identity, used when the child is absent
    fn build(&self) -> DynamicObject;

    /// Bring `object` to the desired state in place
    ///
    /// Must be deterministic: applying it twice yields identical JSON.
    fn update(
        &self,
        object: &mut DynamicObject,
        observed: &ObservedState,
    ) -> Result<UpdateOutcome, Error>;

    /// Report status carried by the applied object
    fn observe(&self, _object: &DynamicObject) -> Observation {
        Observation::None
    }

    /// Children that must be applied before this one
    fn depends_on(&self) -> Vec<ResourceKey> {
        Vec::new()
    }
}

/// Identity-only object for `name` in `namespace`
pub fn stub(api_resource: &ApiResource, name: &str, namespace: &str) -> DynamicObject {
    DynamicObject::new(name, api_resource).within(namespace)
}

/// Merge a typed desired object onto a dynamic one
///
/// `metadata` and `spec` merge key by key so fields the API server fills
/// in (resourceVersion, uid, clusterIP, defaulted spec fields) survive.
/// Every other top-level field of the desired object (`data`, `rules`, ...)
/// replaces the current one. Arrays always replace. `status` is never
/// touched.
pub fn merge_typed<T: Serialize>(object: &mut DynamicObject, desired: &T) -> Result<(), Error> {
    let desired = serde_json::to_value(desired)?;
    let Value::Object(desired) = desired else {
        return Err(Error::serialization("desired object is not a JSON object"));
    };

    for (field, value) in desired {
        match field.as_str() {
            "apiVersion" | "kind" | "status" => {}
            "metadata" => {
                let mut current = serde_json::to_value(&object.metadata)?;
                merge_values(&mut current, value);
                object.metadata = serde_json::from_value(current)?;
            }
            "spec" => {
                let slot = data_entry(object, &field);
                merge_values(slot, value);
            }
            _ => {
                *data_entry(object, &field) = value;
            }
        }
    }
    Ok(())
}

fn data_entry<'a>(object: &'a mut DynamicObject, field: &str) -> &'a mut Value {
    if !object.data.is_object() {
        object.data = Value::Object(serde_json::Map::new());
    }
    &mut object.data[field]
}

/// Recursive merge: objects merge per key, `null` removes, anything else replaces
fn merge_values(current: &mut Value, desired: Value) {
    match (current, desired) {
        (Value::Object(current), Value::Object(desired)) => {
            for (key, value) in desired {
                if value.is_null() {
                    current.remove(&key);
                    continue;
                }
                match current.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        current.insert(key, value);
                    }
                }
            }
        }
        (current, desired) => *current = desired,
    }
}

/// Read a typed view of a dynamic object
pub fn parse_typed<T: serde::de::DeserializeOwned>(object: &DynamicObject) -> Result<T, Error> {
    let mut value = object.data.clone();
    if let Value::Object(map) = &mut value {
        map.insert("metadata".to_string(), serde_json::to_value(&object.metadata)?);
        if let Some(types) = &object.types {
            map.insert("apiVersion".to_string(), Value::String(types.api_version.clone()));
            map.insert("kind".to_string(), Value::String(types.kind.clone()));
        }
    }
    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ConfigMap, Service, ServicePort, ServiceSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use temporal_common::kube_utils::build_api_resource;

    fn service(port: i32) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some("prod-frontend".to_string()),
                namespace: Some("temporal".to_string()),
                labels: Some([("a".to_string(), "b".to_string())].into()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                ports: Some(vec![ServicePort {
                    port,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn merge_keeps_server_populated_fields() {
        let ar = build_api_resource("v1", "Service");
        let mut obj = stub(&ar, "prod-frontend", "temporal");
        obj.metadata.resource_version = Some("42".to_string());
        obj.metadata.uid = Some("uid".to_string());
        obj.data = serde_json::json!({
            "spec": {"clusterIP": "10.0.0.1"},
            "status": {"loadBalancer": {}}
        });

        merge_typed(&mut obj, &service(7233)).unwrap();

        assert_eq!(obj.metadata.resource_version.as_deref(), Some("42"));
        assert_eq!(obj.metadata.uid.as_deref(), Some("uid"));
        assert_eq!(obj.data["spec"]["clusterIP"], "10.0.0.1");
        assert_eq!(obj.data["spec"]["ports"][0]["port"], 7233);
        assert!(obj.data.get("status").is_some());
    }

    #[test]
    fn merging_twice_is_byte_identical() {
        let ar = build_api_resource("v1", "Service");
        let mut obj = stub(&ar, "prod-frontend", "temporal");
        merge_typed(&mut obj, &service(7233)).unwrap();
        let first = serde_json::to_string(&obj).unwrap();
        merge_typed(&mut obj, &service(7233)).unwrap();
        assert_eq!(first, serde_json::to_string(&obj).unwrap());
    }

    #[test]
    fn non_spec_fields_replace_wholesale() {
        let ar = build_api_resource("v1", "ConfigMap");
        let mut obj = stub(&ar, "prod-config", "temporal");
        obj.data = serde_json::json!({"data": {"stale.sh": "x", "keep.sh": "old"}});

        let desired = ConfigMap {
            metadata: ObjectMeta {
                name: Some("prod-config".to_string()),
                ..Default::default()
            },
            data: Some([("keep.sh".to_string(), "new".to_string())].into()),
            ..Default::default()
        };
        merge_typed(&mut obj, &desired).unwrap();

        assert_eq!(obj.data["data"], serde_json::json!({"keep.sh": "new"}));
    }

    #[test]
    fn typed_view_includes_metadata() {
        let ar = build_api_resource("v1", "Service");
        let mut obj = stub(&ar, "prod-frontend", "temporal");
        merge_typed(&mut obj, &service(7233)).unwrap();
        let svc: Service = parse_typed(&obj).unwrap();
        assert_eq!(svc.metadata.name.as_deref(), Some("prod-frontend"));
        assert_eq!(svc.spec.unwrap().ports.unwrap()[0].port, 7233);
    }

    #[test]
    fn deferral_uses_default_delay() {
        let outcome = UpdateOutcome::deferred("waiting");
        assert!(outcome.is_deferred());
        assert_eq!(
            outcome,
            UpdateOutcome::Deferred {
                reason: "waiting".to_string(),
                retry_after: DEFAULT_RETRY_AFTER
            }
        );
    }
}
