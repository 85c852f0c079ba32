//! Operations shared by every resource type.

use std::{fmt, path::PathBuf, str::FromStr};

use axum::{
    body::Body,
    http::{
        header::{CONTENT_LENGTH, CONTENT_TYPE, ETAG, LOCATION},
        HeaderValue,
        StatusCode,
    },
    response::{IntoResponse, Response},
};
use blob_store::BlobStore;
use tokio_util::io::ReaderStream;
use tracing::info;

use crate::{
    error::{BitsError, BitsResult, InputError},
    upload::UploadedFile,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Packages,
    Droplets,
    Buildpacks,
    BuildpackCache,
}

impl Resource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Packages => "packages",
            Resource::Droplets => "droplets",
            Resource::Buildpacks => "buildpacks",
            Resource::BuildpackCache => "buildpack_cache",
        }
    }

    /// Maps the part of a URL following the resource name onto a store key.
    pub fn store_key<'a>(&self, path_key: &'a str) -> BitsResult<&'a str> {
        match self {
            Resource::BuildpackCache => path_key.strip_prefix("entries/").ok_or_else(|| {
                InputError::InvalidRequest(format!("unknown buildpack cache path '{}'", path_key))
                    .into()
            }),
            _ => Ok(path_key),
        }
    }
}

impl FromStr for Resource {
    type Err = BitsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "packages" => Ok(Resource::Packages),
            "droplets" => Ok(Resource::Droplets),
            "buildpacks" => Ok(Resource::Buildpacks),
            "buildpack_cache" => Ok(Resource::BuildpackCache),
            other => Err(BitsError::NotFound(format!("Unknown resource type '{}'", other))),
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a GET for a stored blob is answered.
#[derive(Debug, PartialEq, Eq)]
pub enum BlobResponse {
    /// Let nginx serve the file from this internal location.
    InternalRedirect(String),
    /// Stream the file from local disk.
    File {
        path: PathBuf,
        etag: Option<String>,
    },
    /// Send the client to the backend.
    Redirect(String),
}

impl BlobResponse {
    pub async fn into_http(self) -> BitsResult<Response> {
        let (path, etag) = match self {
            BlobResponse::InternalRedirect(location) => {
                return Ok((StatusCode::OK, [("X-Accel-Redirect", location)]).into_response())
            }
            BlobResponse::Redirect(url) => {
                return Ok((StatusCode::FOUND, [(LOCATION, url)]).into_response())
            }
            BlobResponse::File { path, etag } => (path, etag),
        };
        let file = tokio::fs::File::open(&path).await?;
        let length = file.metadata().await?.len();
        let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
        let headers = response.headers_mut();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        );
        headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
        if let Some(etag) = etag.and_then(|e| HeaderValue::from_str(&e).ok()) {
            headers.insert(ETAG, etag);
        }
        Ok(response)
    }
}

/// Requires a non-empty upload, producing the resource's own error otherwise.
pub fn require_file(
    upload: Option<UploadedFile>,
    invalid: fn(String) -> InputError,
) -> BitsResult<UploadedFile> {
    match upload {
        Some(file) if !file.is_empty() => Ok(file),
        _ => Err(invalid("a file must be provided".to_string()).into()),
    }
}

pub async fn store_upload(store: &BlobStore, upload: &UploadedFile, key: &str) -> BitsResult<()> {
    info!(key, size = upload.size(), "storing upload");
    store.copy_in(upload.path(), key).await?;
    Ok(())
}

/// Copies `source_key` to `key`; a missing source is reported with
/// `not_found`.
pub async fn duplicate(
    store: &BlobStore,
    source_key: &str,
    key: &str,
    not_found: impl FnOnce() -> String,
) -> BitsResult<()> {
    if !store.exists(source_key).await? {
        return Err(BitsError::NotFound(not_found()));
    }
    info!(source_key, key, "duplicating blob");
    store.copy_between_keys(source_key, key).await?;
    Ok(())
}

pub async fn fetch(store: &BlobStore, key: &str, use_nginx: bool) -> BitsResult<BlobResponse> {
    let blob = store
        .blob(key)
        .await?
        .ok_or_else(|| BitsError::NotFound(key.to_string()))?;

    if !store.is_local() {
        return Ok(BlobResponse::Redirect(blob.public_download_url().await?));
    }
    if use_nginx {
        return Ok(BlobResponse::InternalRedirect(
            blob.internal_download_url().await?,
        ));
    }
    let path = blob
        .local_path()
        .ok_or_else(|| BitsError::BackendFailure(format!("no local path for {}", key)))?;
    Ok(BlobResponse::File {
        path: path.to_path_buf(),
        etag: blob.attributes.etag.clone(),
    })
}

pub async fn remove(store: &BlobStore, key: &str) -> BitsResult<()> {
    if !store.exists(key).await? {
        return Err(BitsError::NotFound(key.to_string()));
    }
    info!(key, "deleting blob");
    store.delete(key).await?;
    Ok(())
}
