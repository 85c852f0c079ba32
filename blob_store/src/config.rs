//! Blob store configuration.

use std::{env, path::PathBuf};

use serde::{Deserialize, Serialize};

/// Configuration of a single blob store, tagged by `provider`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum BlobStoreConfig {
    /// Blobs live on a filesystem this process controls.
    Local {
        #[serde(default = "default_local_root")]
        local_root: PathBuf,
        directory_key: String,
    },
    /// Amazon S3 or an S3-compatible object store.
    S3 {
        /// Storage path, e.g. `s3://bucket/prefix`.
        path: String,
        #[serde(default)]
        region: Option<String>,
        /// Endpoint override for S3-compatible stores (MinIO, LocalStack).
        #[serde(default)]
        endpoint: Option<String>,
    },
    /// WebDAV storage fronted by an access-control proxy that also mints
    /// signed URLs.
    Webdav {
        private_endpoint: String,
        public_endpoint: String,
        username: String,
        password: String,
        directory_key: String,
    },
}

impl BlobStoreConfig {
    pub fn local(local_root: impl Into<PathBuf>, directory_key: &str) -> Self {
        BlobStoreConfig::Local {
            local_root: local_root.into(),
            directory_key: directory_key.to_string(),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, BlobStoreConfig::Local { .. })
    }
}

/// Default root for local blob stores.
pub fn default_local_root() -> PathBuf {
    env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("bits_storage")
}
