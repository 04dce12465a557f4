//! Dynamic configuration ConfigMap
//!
//! The server reads `dynamic_config.yaml` on every poll, so changing a value
//! only rewrites this ConfigMap and never restarts pods.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use serde::Serialize;

use temporal_common::crd::{ConstrainedValue, Constraints};
use temporal_common::kube_utils::build_api_resource;
use temporal_common::{naming, Error};

use crate::builder::{merge_typed, stub, ObservedState, ResourceBuilder, ResourceKey, UpdateOutcome};
use crate::config::DYNAMIC_CONFIG_KEY;
use crate::meta::ClusterContext;

/// One entry of a key's value list as the server expects it
#[derive(Serialize)]
struct RenderedValue<'a> {
    value: &'a serde_json::Value,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    constraints: BTreeMap<&'static str, serde_json::Value>,
}

fn render_constraints(
    constraints: Option<&Constraints>,
) -> BTreeMap<&'static str, serde_json::Value> {
    let mut out = BTreeMap::new();
    let Some(c) = constraints else {
        return out;
    };
    let strings = [
        ("namespace", &c.namespace),
        ("namespaceID", &c.namespace_id),
        ("taskQueueName", &c.task_queue_name),
        ("taskType", &c.task_type),
        ("taskQueueType", &c.task_queue_type),
    ];
    for (key, value) in strings {
        if let Some(v) = value {
            out.insert(key, serde_json::Value::String(v.clone()));
        }
    }
    if let Some(shard) = c.shard_id {
        out.insert("shardID", serde_json::Value::from(shard));
    }
    out
}

/// Render `dynamic_config.yaml`
pub fn render_dynamic_config(ctx: &ClusterContext) -> Result<String, Error> {
    let values = ctx
        .spec
        .dynamic_config
        .as_ref()
        .map(|d| &d.values);
    let rendered: BTreeMap<&str, Vec<RenderedValue<'_>>> = values
        .into_iter()
        .flatten()
        .map(|(key, list)| {
            let list = list
                .iter()
                .map(|v: &ConstrainedValue| RenderedValue {
                    value: &v.value,
                    constraints: render_constraints(v.constraints.as_ref()),
                })
                .collect();
            (key.as_str(), list)
        })
        .collect();
    if rendered.is_empty() {
        return Ok(String::new());
    }
    serde_yaml::to_string(&rendered)
        .map_err(|e| Error::serialization_for_kind("DynamicConfig", e.to_string()))
}

/// `<cluster>-dynamic-config`
pub struct DynamicConfigBuilder {
    ctx: Arc<ClusterContext>,
}

impl DynamicConfigBuilder {
    /// Builder for the cluster in `ctx`
    pub fn new(ctx: Arc<ClusterContext>) -> Self {
        Self { ctx }
    }

    fn name(&self) -> String {
        naming::dynamic_config_map(&self.ctx.name)
    }
}

impl ResourceBuilder for DynamicConfigBuilder {
    fn key(&self) -> ResourceKey {
        ResourceKey::new("ConfigMap", self.name())
    }

    fn api_resource(&self) -> ApiResource {
        build_api_resource("v1", "ConfigMap")
    }

    fn build(&self) -> DynamicObject {
        stub(&self.api_resource(), &self.name(), &self.ctx.namespace)
    }

    fn update(
        &self,
        object: &mut DynamicObject,
        _observed: &ObservedState,
    ) -> Result<UpdateOutcome, Error> {
        let desired = ConfigMap {
            metadata: self.ctx.object_meta(&self.name(), "config"),
            data: Some(BTreeMap::from([(
                DYNAMIC_CONFIG_KEY.to_string(),
                render_dynamic_config(&self.ctx)?,
            )])),
            ..Default::default()
        };
        merge_typed(object, &desired)?;
        Ok(UpdateOutcome::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::test_support::*;
    use temporal_common::crd::DynamicConfigSpec;

    fn context_with_values() -> Arc<ClusterContext> {
        let mut spec = cluster_spec();
        spec.dynamic_config = Some(DynamicConfigSpec {
            poll_interval: None,
            values: BTreeMap::from([
                (
                    "matching.numTaskqueueReadPartitions".to_string(),
                    vec![ConstrainedValue {
                        value: serde_json::json!(5),
                        constraints: Some(Constraints {
                            namespace: Some("orders".to_string()),
                            task_type: Some("Workflow".to_string()),
                            ..Default::default()
                        }),
                    }],
                ),
                (
                    "frontend.enableClientVersionCheck".to_string(),
                    vec![ConstrainedValue {
                        value: serde_json::json!(true),
                        constraints: None,
                    }],
                ),
            ]),
        });
        Arc::new(context_for(spec))
    }

    #[test]
    fn values_render_with_server_constraint_keys() {
        let yaml = render_dynamic_config(&context_with_values()).unwrap();
        let parsed: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        let entry = &parsed["matching.numTaskqueueReadPartitions"][0];
        assert_eq!(entry["value"], serde_yaml::Value::from(5));
        assert_eq!(entry["constraints"]["namespace"], "orders");
        assert_eq!(entry["constraints"]["taskType"], "Workflow");
        assert!(parsed["frontend.enableClientVersionCheck"][0]
            .get("constraints")
            .is_none());
    }

    #[test]
    fn no_overrides_render_an_empty_file() {
        assert_eq!(render_dynamic_config(&context()).unwrap(), "");
    }

    #[test]
    fn update_is_idempotent() {
        let builder = DynamicConfigBuilder::new(context_with_values());
        let observed = ObservedState::new();
        let mut obj = builder.build();
        builder.update(&mut obj, &observed).unwrap();
        let first = serde_json::to_string(&obj).unwrap();
        builder.update(&mut obj, &observed).unwrap();
        assert_eq!(first, serde_json::to_string(&obj).unwrap());
        assert_eq!(builder.key().to_string(), "ConfigMap/prod-dynamic-config");
    }
}
