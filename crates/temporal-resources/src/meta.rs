//! Cluster context shared by every builder, plus label and metadata helpers

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use temporal_common::crd::{TemporalCluster, TemporalClusterSpec, TemporalClusterStatus};
use temporal_common::defaults::normalize;
use temporal_common::{
    Error, Version, LABEL_COMPONENT, LABEL_INSTANCE, LABEL_MANAGED_BY, LABEL_MANAGED_BY_OPERATOR,
    LABEL_NAME, LABEL_VERSION,
};

/// Value of the `app.kubernetes.io/name` label on every child
pub const APP_NAME: &str = "temporal";

/// Everything a builder knows about the cluster it builds for
///
/// The spec is normalized once on construction; builders read resolved
/// values and never re-apply defaults.
#[derive(Clone, Debug)]
pub struct ClusterContext {
    /// TemporalCluster name
    pub name: String,
    /// Namespace of the cluster and all its children
    pub namespace: String,
    /// Normalized spec
    pub spec: TemporalClusterSpec,
    /// Last persisted status
    pub status: TemporalClusterStatus,
    /// Parsed `spec.version`
    pub version: Version,
}

impl ClusterContext {
    /// Normalize a cluster into a build context
    pub fn new(cluster: &TemporalCluster) -> Result<Self, Error> {
        let name = cluster.name_any();
        let namespace = cluster
            .namespace()
            .ok_or_else(|| Error::config_for(&name, "TemporalCluster has no namespace"))?;
        let version = Version::parse(&cluster.spec.version)
            .map_err(|e| Error::config_for_field(&name, "spec.version", e.to_string()))?;
        Ok(Self {
            spec: normalize(&cluster.spec),
            status: cluster.status.clone().unwrap_or_default(),
            name,
            namespace,
            version,
        })
    }

    /// Labels identifying a component of this cluster
    ///
    /// Stable across upgrades; used as selectors.
    pub fn selector_labels(&self, component: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            (LABEL_NAME.to_string(), APP_NAME.to_string()),
            (LABEL_INSTANCE.to_string(), self.name.clone()),
            (LABEL_COMPONENT.to_string(), component.to_string()),
        ])
    }

    /// Selector labels plus version and managed-by
    pub fn labels(&self, component: &str) -> BTreeMap<String, String> {
        let mut labels = self.selector_labels(component);
        labels.insert(LABEL_VERSION.to_string(), self.spec.version.clone());
        labels.insert(
            LABEL_MANAGED_BY.to_string(),
            LABEL_MANAGED_BY_OPERATOR.to_string(),
        );
        labels
    }

    /// Metadata for a namespaced child
    pub fn object_meta(&self, name: &str, component: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(self.namespace.clone()),
            labels: Some(self.labels(component)),
            ..Default::default()
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Fixtures shared by builder tests

    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use temporal_common::crd::{
        DatastoreSpec, PersistenceSpec, SecretKeyReference, SqlSpec, TemporalCluster,
        TemporalClusterSpec,
    };

    use super::ClusterContext;

    /// SQL store named `name` on `postgres:5432`
    pub fn sql_store(name: &str) -> DatastoreSpec {
        DatastoreSpec {
            name: name.to_string(),
            sql: Some(SqlSpec {
                plugin_name: "postgres12".to_string(),
                connect_addr: "postgres:5432".to_string(),
                database_name: format!("temporal_{name}"),
                user: "temporal".to_string(),
                ..Default::default()
            }),
            password_secret_ref: Some(SecretKeyReference {
                name: "postgres-password".to_string(),
                key: "PASSWORD".to_string(),
            }),
            ..Default::default()
        }
    }

    /// 1.18.4 cluster with SQL default and visibility stores
    pub fn cluster_spec() -> TemporalClusterSpec {
        TemporalClusterSpec {
            version: "1.18.4".to_string(),
            num_history_shards: 512,
            persistence: PersistenceSpec {
                default_store: sql_store("default"),
                visibility_store: Some(sql_store("visibility")),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Persisted cluster `prod` in namespace `temporal`
    pub fn cluster(spec: TemporalClusterSpec) -> TemporalCluster {
        let mut cluster = TemporalCluster::new("prod", spec);
        cluster.metadata = ObjectMeta {
            name: Some("prod".to_string()),
            namespace: Some("temporal".to_string()),
            uid: Some("cluster-uid".to_string()),
            generation: Some(1),
            ..Default::default()
        };
        cluster
    }

    /// Context for [`cluster_spec`]
    pub fn context() -> ClusterContext {
        context_for(cluster_spec())
    }

    /// Context for an arbitrary spec
    pub fn context_for(spec: TemporalClusterSpec) -> ClusterContext {
        ClusterContext::new(&cluster(spec)).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn context_normalizes_spec() {
        let ctx = context();
        assert_eq!(ctx.name, "prod");
        assert_eq!(ctx.namespace, "temporal");
        assert_eq!(ctx.version, Version::new(1, 18, 4));
        assert!(ctx.spec.image.is_some());
    }

    #[test]
    fn invalid_version_is_a_config_error() {
        let mut spec = cluster_spec();
        spec.version = "latest".to_string();
        let err = ClusterContext::new(&cluster(spec)).unwrap_err();
        assert_eq!(err.field(), Some("spec.version"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn selector_labels_omit_version() {
        let ctx = context();
        let selector = ctx.selector_labels("frontend");
        assert!(!selector.contains_key(LABEL_VERSION));
        let labels = ctx.labels("frontend");
        assert_eq!(labels.get(LABEL_VERSION).map(String::as_str), Some("1.18.4"));
        assert_eq!(labels.get(LABEL_INSTANCE).map(String::as_str), Some("prod"));
    }
}
