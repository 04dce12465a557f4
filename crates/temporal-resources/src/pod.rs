//! Pieces of pod templates shared by server, add-on and job workloads

use k8s_openapi::api::core::v1::{
    EnvVar, EnvVarSource, KeyToPath, ObjectFieldSelector, ProjectedVolumeSource,
    SecretKeySelector, SecretProjection, SecretVolumeSource, Volume, VolumeMount, VolumeProjection,
};

use temporal_common::crd::{DatastoreSpec, TrafficDomain};
use temporal_common::naming;

use crate::meta::ClusterContext;
use crate::mtls::{self, CA_CERT_FILE, TLS_CERT_FILE, TLS_KEY_FILE};

/// Plain env var
pub fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

/// Env var read from the pod's own status
pub fn field_env(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: field_path.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Password env var of a datastore, if it references a secret
pub fn password_env(store: &DatastoreSpec) -> Option<EnvVar> {
    let secret = store.password_secret_ref.as_ref()?;
    Some(EnvVar {
        name: store.password_env_var(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.name.clone(),
                key: secret.key.clone(),
                optional: None,
            }),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Volume of a whole secret
pub fn secret_volume(volume: &str, secret: &str) -> Volume {
    Volume {
        name: volume.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Read-only mount of a volume
pub fn mount(volume: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: volume.to_string(),
        mount_path: path.to_string(),
        read_only: Some(true),
        ..Default::default()
    }
}

/// Volume and mount of a datastore's TLS files, if TLS is on
///
/// The referenced keys may live in different secrets, so they are
/// projected into one directory under their conventional file names.
pub fn datastore_tls(store: &DatastoreSpec) -> Option<(Volume, VolumeMount)> {
    let tls = store.tls.as_ref().filter(|t| t.enabled)?;
    let refs = tls.file_refs();
    if refs.is_empty() {
        return None;
    }
    let name = format!("{}-datastore-tls", store.name);
    let sources = refs
        .into_iter()
        .map(|(file, secret)| VolumeProjection {
            secret: Some(SecretProjection {
                name: secret.name.clone(),
                items: Some(vec![KeyToPath {
                    key: secret.key.clone(),
                    path: file.to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        })
        .collect();
    let volume = Volume {
        name: name.clone(),
        projected: Some(ProjectedVolumeSource {
            sources: Some(sources),
            ..Default::default()
        }),
        ..Default::default()
    };
    Some((volume, mount(&name, &store.tls_mount_path())))
}

/// Client certificate an add-on presents to the frontend
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientCert {
    /// Certificate (and secret) name
    pub certificate: String,
    /// Directory the secret is mounted at
    pub dir: String,
    /// Name the frontend certificate is issued for
    pub server_name: String,
}

impl ClientCert {
    /// Path of the certificate file
    pub fn cert_file(&self) -> String {
        format!("{}/{TLS_CERT_FILE}", self.dir)
    }

    /// Path of the private key file
    pub fn key_file(&self) -> String {
        format!("{}/{TLS_KEY_FILE}", self.dir)
    }

    /// Path of the issuing CA file
    pub fn ca_file(&self) -> String {
        format!("{}/{CA_CERT_FILE}", self.dir)
    }

    /// Secret volume and its mount
    pub fn volume(&self) -> (Volume, VolumeMount) {
        (
            secret_volume(&self.certificate, &self.certificate),
            mount(&self.certificate, &self.dir),
        )
    }
}

/// Client certificate of an add-on when frontend mTLS is issued by cert-manager
pub fn client_cert(ctx: &ClusterContext, client: &str) -> Option<ClientCert> {
    ctx.spec
        .mtls
        .as_ref()
        .filter(|m| m.uses_cert_manager() && m.frontend_enabled())?;
    Some(ClientCert {
        certificate: naming::client_certificate(&ctx.name, client),
        dir: mtls::client_certs_mount_path(client),
        server_name: naming::server_name(&ctx.name, TrafficDomain::Frontend),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use temporal_common::crd::{DatastoreTlsSpec, SecretKeyReference};

    #[test]
    fn datastore_tls_projects_each_reference() {
        let store = DatastoreSpec {
            name: "default".to_string(),
            tls: Some(DatastoreTlsSpec {
                enabled: true,
                ca_file_ref: Some(SecretKeyReference {
                    name: "pg-ca".to_string(),
                    key: "ca.crt".to_string(),
                }),
                cert_file_ref: Some(SecretKeyReference {
                    name: "pg-client".to_string(),
                    key: "tls.crt".to_string(),
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        let (volume, mount) = datastore_tls(&store).unwrap();
        assert_eq!(volume.name, "default-datastore-tls");
        let sources = volume.projected.unwrap().sources.unwrap();
        assert_eq!(sources.len(), 2);
        let ca = sources[0].secret.as_ref().unwrap();
        assert_eq!(ca.name, "pg-ca");
        assert_eq!(ca.items.as_ref().unwrap()[0].path, "ca.pem");
        assert_eq!(mount.mount_path, "/etc/tls/datastores/default");
    }

    #[test]
    fn tls_disabled_mounts_nothing() {
        let store = DatastoreSpec {
            name: "default".to_string(),
            tls: Some(DatastoreTlsSpec::default()),
            ..Default::default()
        };
        assert!(datastore_tls(&store).is_none());
    }

    #[test]
    fn password_comes_from_secret() {
        let store = DatastoreSpec {
            name: "default".to_string(),
            password_secret_ref: Some(SecretKeyReference {
                name: "postgres-password".to_string(),
                key: "PASSWORD".to_string(),
            }),
            ..Default::default()
        };
        let var = password_env(&store).unwrap();
        assert_eq!(var.name, "TEMPORAL_DEFAULT_DATASTORE_PASSWORD");
        let selector = var.value_from.unwrap().secret_key_ref.unwrap();
        assert_eq!(selector.name, "postgres-password");
    }
}
