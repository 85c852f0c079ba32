use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::{
    remote::RemoteSigner,
    signing_authority::{Audience, SigningIntent},
    BlobError,
    BlobResult,
};

/// Metadata reported by the backend. Any field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobAttributes {
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub content_length: Option<u64>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub(crate) enum BlobAccess {
    Local {
        path: PathBuf,
        internal_path: String,
    },
    Remote {
        location: object_store::path::Path,
        signer: RemoteSigner,
    },
}

/// Descriptor of a stored blob, built fresh on every lookup.
#[derive(Debug, Clone)]
pub struct Blob {
    pub key: String,
    pub attributes: BlobAttributes,
    pub(crate) access: BlobAccess,
}

impl Blob {
    /// On-disk location, for local backends only.
    pub fn local_path(&self) -> Option<&Path> {
        match &self.access {
            BlobAccess::Local { path, .. } => Some(path),
            BlobAccess::Remote { .. } => None,
        }
    }

    /// URL (or, for local backends, the nginx-internal path) used by
    /// components inside the platform network.
    pub async fn internal_download_url(&self) -> BlobResult<String> {
        match &self.access {
            BlobAccess::Local { internal_path, .. } => Ok(internal_path.clone()),
            BlobAccess::Remote { location, signer } => {
                signer
                    .sign(location, SigningIntent::Download, Audience::Internal)
                    .await
            }
        }
    }

    pub async fn public_download_url(&self) -> BlobResult<String> {
        match &self.access {
            BlobAccess::Local { .. } => Err(BlobError::Unsupported {
                operation: "public download url",
                backend: "local",
            }),
            BlobAccess::Remote { location, signer } => {
                signer
                    .sign(location, SigningIntent::Download, Audience::Public)
                    .await
            }
        }
    }

    pub async fn public_upload_url(&self) -> BlobResult<String> {
        match &self.access {
            BlobAccess::Local { .. } => Err(BlobError::Unsupported {
                operation: "public upload url",
                backend: "local",
            }),
            BlobAccess::Remote { location, signer } => {
                signer
                    .sign(location, SigningIntent::Upload, Audience::Public)
                    .await
            }
        }
    }
}
