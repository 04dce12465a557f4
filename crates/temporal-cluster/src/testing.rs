//! In-memory API server and fixtures for controller tests

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use kube::ResourceExt;
use serde_json::{json, Value};

use temporal_common::crd::{
    DatastoreSpec, DomainSpec, MtlsProvider, MtlsSpec, PersistenceSpec, SecretKeyReference,
    SqlSpec, TemporalCluster, TemporalClusterClientStatus, TemporalClusterSpec,
    TemporalClusterStatus,
};
use temporal_common::Error;

use crate::client::ClusterKubeClient;

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

/// cert-manager mTLS on both traffic domains
pub fn mtls_spec() -> MtlsSpec {
    MtlsSpec {
        provider: MtlsProvider::CertManager,
        internode: Some(DomainSpec { enabled: true }),
        frontend: Some(DomainSpec { enabled: true }),
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

type ObjectKey = (String, String);

/// API server keeping objects in memory
///
/// Enforces resourceVersion on replace, keeps the status of replaced
/// objects and bumps `generation` when the spec changes. Tests move
/// children along (jobs finishing, certificates issuing) with the helper
/// methods.
#[derive(Default)]
pub struct FakeKube {
    objects: Mutex<BTreeMap<ObjectKey, DynamicObject>>,
    clusters: Mutex<BTreeMap<String, TemporalCluster>>,
    cluster_statuses: Mutex<Vec<TemporalClusterStatus>>,
    client_statuses: Mutex<Vec<TemporalClusterClientStatus>>,
    revision: AtomicU64,
}

impl FakeKube {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_revision(&self) -> String {
        (self.revision.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    pub fn object(&self, kind: &str, name: &str) -> Option<DynamicObject> {
        self.objects
            .lock()
            .unwrap()
            .get(&(kind.to_string(), name.to_string()))
            .cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.lock().unwrap().is_empty()
    }

    pub fn add_cluster(&self, cluster: TemporalCluster) {
        self.clusters
            .lock()
            .unwrap()
            .insert(cluster.name_any(), cluster);
    }

    pub fn cluster_statuses(&self) -> Vec<TemporalClusterStatus> {
        self.cluster_statuses.lock().unwrap().clone()
    }

    pub fn client_statuses(&self) -> Vec<TemporalClusterClientStatus> {
        self.client_statuses.lock().unwrap().clone()
    }

    fn set_status(&self, kind: &str, status: impl Fn(&DynamicObject) -> Option<Value>) {
        let mut objects = self.objects.lock().unwrap();
        for ((k, _), obj) in objects.iter_mut() {
            if k != kind {
                continue;
            }
            if let Some(value) = status(obj) {
                obj.data["status"] = value;
            }
        }
    }

    /// Every Job that has not failed completes
    pub fn complete_jobs(&self) {
        self.set_status("Job", |job| {
            let failed = job.data["status"]["failed"].as_i64().unwrap_or(0) > 0;
            (!failed).then(|| {
                json!({
                    "succeeded": 1,
                    "conditions": [{"type": "Complete", "status": "True"}]
                })
            })
        });
    }

    pub fn fail_job(&self, name: &str) {
        let mut objects = self.objects.lock().unwrap();
        let job = objects
            .get_mut(&("Job".to_string(), name.to_string()))
            .unwrap();
        job.data["status"] = json!({
            "failed": 1,
            "conditions": [{"type": "Failed", "status": "True"}]
        });
    }

    /// Every Deployment reports all replicas updated and ready
    pub fn roll_out_deployments(&self) {
        self.set_status("Deployment", |deployment| {
            let replicas = deployment.data["spec"]["replicas"].as_i64().unwrap_or(1);
            Some(json!({
                "observedGeneration": deployment.metadata.generation.unwrap_or(1),
                "replicas": replicas,
                "updatedReplicas": replicas,
                "readyReplicas": replicas
            }))
        });
    }

    /// cert-manager signs every Certificate
    pub fn issue_certificates(&self) {
        self.set_status("Certificate", |_| {
            Some(json!({
                "conditions": [{"type": "Ready", "status": "True"}],
                "notAfter": "2035-01-01T00:00:00Z"
            }))
        });
    }

    /// Every Issuer reports Ready
    pub fn ready_issuers(&self) {
        self.set_status("Issuer", |_| {
            Some(json!({"conditions": [{"type": "Ready", "status": "True"}]}))
        });
    }
}

#[async_trait]
impl ClusterKubeClient for FakeKube {
    async fn get(
        &self,
        api_resource: &ApiResource,
        _namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error> {
        Ok(self.object(&api_resource.kind, name))
    }

    async fn create(
        &self,
        api_resource: &ApiResource,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, Error> {
        let name = object.name_any();
        let key = (api_resource.kind.clone(), name.clone());
        let mut stored = object.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        stored.metadata.uid = Some(format!("uid-{name}"));
        stored.metadata.generation = Some(1);
        stored.metadata.resource_version = Some(self.next_revision());

        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&key) {
            return Err(Error::conflict(&api_resource.kind, name));
        }
        objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn replace(
        &self,
        api_resource: &ApiResource,
        _namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, Error> {
        let name = object.name_any();
        let key = (api_resource.kind.clone(), name.clone());
        let revision = self.next_revision();

        let mut objects = self.objects.lock().unwrap();
        let Some(existing) = objects.get(&key) else {
            return Err(Error::internal(format!("{key:?} not found")));
        };
        if existing.metadata.resource_version != object.metadata.resource_version {
            return Err(Error::conflict(&api_resource.kind, name));
        }

        let mut stored = object.clone();
        let generation = existing.metadata.generation.unwrap_or(1);
        stored.metadata.generation = Some(if existing.data["spec"] == object.data["spec"] {
            generation
        } else {
            generation + 1
        });
        match existing.data.get("status") {
            Some(status) => stored.data["status"] = status.clone(),
            None => {
                if let Some(map) = stored.data.as_object_mut() {
                    map.remove("status");
                }
            }
        }
        stored.metadata.resource_version = Some(revision);
        objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn delete(
        &self,
        api_resource: &ApiResource,
        _namespace: &str,
        name: &str,
    ) -> Result<(), Error> {
        self.objects
            .lock()
            .unwrap()
            .remove(&(api_resource.kind.clone(), name.to_string()));
        Ok(())
    }

    async fn get_cluster(
        &self,
        name: &str,
        _namespace: &str,
    ) -> Result<Option<TemporalCluster>, Error> {
        Ok(self.clusters.lock().unwrap().get(name).cloned())
    }

    async fn patch_cluster_status(
        &self,
        _name: &str,
        _namespace: &str,
        status: &TemporalClusterStatus,
    ) -> Result<(), Error> {
        self.cluster_statuses.lock().unwrap().push(status.clone());
        Ok(())
    }

    async fn patch_client_status(
        &self,
        _name: &str,
        _namespace: &str,
        status: &TemporalClusterClientStatus,
    ) -> Result<(), Error> {
        self.client_statuses.lock().unwrap().push(status.clone());
        Ok(())
    }
}
