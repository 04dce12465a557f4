//! CRD installation
//!
//! The operator applies its own CRDs on startup with server-side apply so the
//! installed schema always matches the running binary.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};

use temporal_common::crd::{TemporalCluster, TemporalClusterClient};
use temporal_common::FIELD_MANAGER;

/// CRD definition with name and resource
struct CrdDef {
    name: String,
    crd: CustomResourceDefinition,
}

fn operator_crds() -> Vec<CrdDef> {
    vec![
        CrdDef {
            name: TemporalCluster::crd_name().to_string(),
            crd: TemporalCluster::crd(),
        },
        CrdDef {
            name: TemporalClusterClient::crd_name().to_string(),
            crd: TemporalClusterClient::crd(),
        },
    ]
}

/// Render every CRD as a multi-document YAML stream
pub fn crd_manifests() -> anyhow::Result<String> {
    let mut out = String::new();
    for def in operator_crds() {
        let yaml = serde_yaml::to_string(&def.crd)
            .map_err(|e| anyhow::anyhow!("failed to serialize {} CRD: {}", def.name, e))?;
        out.push_str("---\n");
        out.push_str(&yaml);
    }
    Ok(out)
}

/// Ensure the operator CRDs are installed
pub async fn ensure_crds(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for def in operator_crds() {
        tracing::info!(crd = %def.name, "Installing CRD");
        crds.patch(&def.name, &params, &Patch::Apply(&def.crd))
            .await
            .map_err(|e| anyhow::anyhow!("failed to install {} CRD: {}", def.name, e))?;
    }

    tracing::info!("Operator CRDs installed/updated");
    Ok(())
}
