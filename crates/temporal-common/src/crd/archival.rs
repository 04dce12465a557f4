//! Archival of closed workflow histories and visibility records

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Cluster archival settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ArchivalSpec {
    /// Turn archival on for the cluster
    #[serde(default)]
    pub enabled: bool,

    /// Storage backend
    pub provider: ArchivalProvider,

    /// History archival
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<ArchivalTarget>,

    /// Visibility archival
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<ArchivalTarget>,
}

/// Archival storage backend
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ArchivalProvider {
    /// Local or mounted filesystem
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filestore: Option<FilestoreArchiver>,

    /// Amazon S3
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3: Option<S3Archiver>,

    /// Google Cloud Storage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcs: Option<GcsArchiver>,
}

impl ArchivalProvider {
    /// URI scheme of the configured provider
    pub fn scheme(&self) -> Option<&'static str> {
        if self.filestore.is_some() {
            Some("file")
        } else if self.s3.is_some() {
            Some("s3")
        } else if self.gcs.is_some() {
            Some("gs")
        } else {
            None
        }
    }

    /// Number of populated providers; exactly one is valid
    pub fn count(&self) -> usize {
        [
            self.filestore.is_some(),
            self.s3.is_some(),
            self.gcs.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count()
    }
}

/// Filestore archiver permissions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FilestoreArchiver {
    /// Permission bits for created files
    #[serde(default = "default_file_mode")]
    pub file_permissions: String,
    /// Permission bits for created directories
    #[serde(default = "default_dir_mode")]
    pub dir_permissions: String,
}

fn default_file_mode() -> String {
    "0666".to_string()
}

fn default_dir_mode() -> String {
    "0766".to_string()
}

/// S3 archiver
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct S3Archiver {
    /// Bucket region
    pub region: String,
    /// Custom endpoint (MinIO etc.)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Path-style addressing
    #[serde(default)]
    pub s3_force_path_style: bool,
}

/// GCS archiver
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GcsArchiver {
    /// Path of the credentials file inside server pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_file_path: Option<String>,
}

/// Archival for one record kind
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ArchivalTarget {
    /// Archive records of this kind
    #[serde(default)]
    pub enabled: bool,
    /// Allow reading archived records back
    #[serde(default)]
    pub enable_read: bool,
    /// Default path (bucket/prefix or directory), without the scheme
    pub path: String,
    /// Turn archival on for newly created namespaces
    #[serde(default)]
    pub namespace_default: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_follows_provider() {
        let mut p = ArchivalProvider::default();
        assert_eq!(p.scheme(), None);
        assert_eq!(p.count(), 0);
        p.s3 = Some(S3Archiver {
            region: "us-east-1".to_string(),
            ..Default::default()
        });
        assert_eq!(p.scheme(), Some("s3"));
        assert_eq!(p.count(), 1);
    }

    #[test]
    fn filestore_permissions_default() {
        let f: FilestoreArchiver = serde_json::from_str("{}").unwrap();
        assert_eq!(f.file_permissions, "0666");
        assert_eq!(f.dir_permissions, "0766");
    }
}
