//! Backend-agnostic blob storage.
//!
//! A [`BlobStore`] is selected once from a [`BlobStoreConfig`] and answers the
//! same small set of operations whatever sits behind it:
//!
//! - **Local**: blobs are files below `<local_root>/<directory_key>`. The
//!   store is `local`, so callers serve bytes themselves (or hand an internal
//!   redirect to nginx) and sign URLs locally.
//! - **Remote**: blobs live in an [`object_store::ObjectStore`] (S3, or a
//!   WebDAV server reached through `object_store`'s HTTP store). The store is
//!   never `local`; download and upload URLs are minted either natively by
//!   the object store or by a [`SigningAuthority`].
//!
//! Keys are opaque `/`-separated path fragments. `delete` is idempotent and
//! [`BlobStore::blob`] returns `None` for missing keys; backend failures are
//! always errors.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use object_store::{
    aws::AmazonS3Builder,
    http::HttpBuilder,
    ClientOptions,
    ObjectStore,
};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use tracing::info;
use url::Url;

pub mod blob;
mod config;
mod error;
mod local;
mod remote;
pub mod signing_authority;

pub use blob::{Blob, BlobAttributes};
pub use config::{default_local_root, BlobStoreConfig};
pub use error::{BlobError, BlobResult};
use local::LocalBackend;
use remote::RemoteBackend;
pub use remote::RemoteSigner;
pub use signing_authority::{Audience, SigningAuthority, SigningIntent};

/// Lifetime of URLs minted by remote backends.
pub const DEFAULT_URL_EXPIRY: Duration = Duration::from_secs(3600);

enum BlobStoreBackend {
    Local(LocalBackend),
    Remote(RemoteBackend),
}

struct BlobStoreInner {
    backend: BlobStoreBackend,
}

#[derive(Clone)]
pub struct BlobStore {
    inner: Arc<BlobStoreInner>,
}

impl std::fmt::Debug for BlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner.backend {
            BlobStoreBackend::Local(local) => f
                .debug_struct("BlobStore")
                .field("backend", &"local")
                .field("root", &local.root())
                .finish(),
            BlobStoreBackend::Remote(remote) => f
                .debug_struct("BlobStore")
                .field("backend", &"remote")
                .field("prefix", &remote.prefix())
                .finish(),
        }
    }
}

impl BlobStore {
    /// Creates a store rooted at `<root>/<directory_key>`, creating the
    /// directory if needed.
    pub fn new_local(root: impl Into<PathBuf>, directory_key: &str) -> BlobResult<Self> {
        let backend = LocalBackend::new(root.into(), directory_key)?;
        Ok(Self::with_backend(BlobStoreBackend::Local(backend)))
    }

    /// Creates a store over an arbitrary object store. `prefix` is prepended
    /// to every key.
    pub fn new_remote(
        store: Arc<dyn ObjectStore>,
        prefix: &str,
        signer: RemoteSigner,
    ) -> BlobResult<Self> {
        let backend = RemoteBackend::new(store, prefix, signer)?;
        Ok(Self::with_backend(BlobStoreBackend::Remote(backend)))
    }

    pub fn from_config(config: &BlobStoreConfig) -> BlobResult<Self> {
        match config {
            BlobStoreConfig::Local {
                local_root,
                directory_key,
            } => {
                info!(root = %local_root.display(), directory_key, "using local blob store");
                Self::new_local(local_root.clone(), directory_key)
            }
            BlobStoreConfig::S3 {
                path,
                region,
                endpoint,
            } => {
                info!(path, "using s3 blob store");
                let url: Url = path.parse()?;
                let mut builder = AmazonS3Builder::from_env().with_url(path.as_str());
                if let Some(region) = region {
                    builder = builder.with_region(region);
                }
                if let Some(endpoint) = endpoint {
                    builder = builder
                        .with_endpoint(endpoint)
                        .with_allow_http(endpoint.starts_with("http://"));
                }
                let s3 = Arc::new(builder.build()?);
                Self::new_remote(
                    s3.clone(),
                    url.path().trim_matches('/'),
                    RemoteSigner::Native(s3),
                )
            }
            BlobStoreConfig::Webdav {
                private_endpoint,
                public_endpoint,
                username,
                password,
                directory_key,
            } => {
                info!(endpoint = private_endpoint, directory_key, "using webdav blob store");
                let credentials = STANDARD.encode(format!("{username}:{password}"));
                let mut headers = HeaderMap::new();
                let mut auth = HeaderValue::from_str(&format!("Basic {credentials}"))
                    .map_err(|e| anyhow::anyhow!("invalid webdav credentials: {e}"))?;
                auth.set_sensitive(true);
                headers.insert(AUTHORIZATION, auth);

                let store = HttpBuilder::new()
                    .with_url(private_endpoint.as_str())
                    .with_client_options(ClientOptions::new().with_default_headers(headers))
                    .build()?;
                let authority = SigningAuthority::new(
                    private_endpoint,
                    public_endpoint,
                    username,
                    password,
                    reqwest::Client::new(),
                )?;
                Self::new_remote(
                    Arc::new(store),
                    directory_key,
                    RemoteSigner::Authority(authority),
                )
            }
        }
    }

    fn with_backend(backend: BlobStoreBackend) -> Self {
        Self {
            inner: Arc::new(BlobStoreInner { backend }),
        }
    }

    /// Whether blobs live on a filesystem this process serves directly.
    pub fn is_local(&self) -> bool {
        matches!(self.inner.backend, BlobStoreBackend::Local(_))
    }

    pub async fn exists(&self, key: &str) -> BlobResult<bool> {
        Ok(self.blob(key).await?.is_some())
    }

    /// Looks up the descriptor of `key`. Missing keys yield `None`.
    pub async fn blob(&self, key: &str) -> BlobResult<Option<Blob>> {
        match &self.inner.backend {
            BlobStoreBackend::Local(local) => local.blob(key).await,
            BlobStoreBackend::Remote(remote) => remote.blob(key).await,
        }
    }

    /// Stores the content of a local file under `key`, replacing any
    /// previous content.
    pub async fn copy_in(&self, source: &Path, key: &str) -> BlobResult<()> {
        match &self.inner.backend {
            BlobStoreBackend::Local(local) => local.copy_in(source, key).await,
            BlobStoreBackend::Remote(remote) => remote.copy_in(source, key).await,
        }
    }

    pub async fn copy_between_keys(&self, source_key: &str, destination_key: &str) -> BlobResult<()> {
        match &self.inner.backend {
            BlobStoreBackend::Local(local) => local.copy_between_keys(source_key, destination_key).await,
            BlobStoreBackend::Remote(remote) => {
                remote.copy_between_keys(source_key, destination_key).await
            }
        }
    }

    /// Removes `key`. Removing a missing key succeeds.
    pub async fn delete(&self, key: &str) -> BlobResult<()> {
        match &self.inner.backend {
            BlobStoreBackend::Local(local) => local.delete(key).await,
            BlobStoreBackend::Remote(remote) => remote.delete(key).await,
        }
    }

    /// Removes every blob below `prefix`; an empty prefix empties the store.
    pub async fn delete_prefix(&self, prefix: &str) -> BlobResult<()> {
        match &self.inner.backend {
            BlobStoreBackend::Local(local) => local.delete_prefix(prefix).await,
            BlobStoreBackend::Remote(remote) => remote.delete_prefix(prefix).await,
        }
    }

    /// Writes the content of `key` into the local file `destination`.
    pub async fn download(&self, key: &str, destination: &Path) -> BlobResult<()> {
        match &self.inner.backend {
            BlobStoreBackend::Local(local) => local.download(key, destination).await,
            BlobStoreBackend::Remote(remote) => remote.download(key, destination).await,
        }
    }
}

/// Rejects keys that cannot be mapped onto a relative storage path.
pub(crate) fn validate_key(key: &str) -> BlobResult<()> {
    let invalid = |reason: &str| BlobError::InvalidKey {
        key: key.to_string(),
        reason: reason.to_string(),
    };
    if key.is_empty() {
        return Err(invalid("key is empty"));
    }
    if key.starts_with('/') {
        return Err(invalid("key must be relative"));
    }
    for segment in key.split('/') {
        match segment {
            "" => return Err(invalid("key contains an empty segment")),
            "." | ".." => return Err(invalid("key contains a relative segment")),
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use object_store::memory::InMemory;
    use tempfile::TempDir;

    use super::*;

    async fn write_source(dir: &TempDir, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        tokio::fs::write(&path, content).await.unwrap();
        path
    }

    async fn read_back(store: &BlobStore, key: &str, dir: &TempDir) -> Vec<u8> {
        let destination = dir.path().join(format!("read-{}", key.replace('/', "_")));
        store.download(key, &destination).await.unwrap();
        tokio::fs::read(&destination).await.unwrap()
    }

    fn stores(root: &TempDir) -> Vec<BlobStore> {
        vec![
            BlobStore::new_local(root.path(), "cc-packages").unwrap(),
            BlobStore::new_remote(
                Arc::new(InMemory::new()),
                "cc-packages",
                RemoteSigner::Native(Arc::new(remote::tests::FixedSigner)),
            )
            .unwrap(),
        ]
    }

    #[test]
    fn test_validate_key() {
        assert!(validate_key("abc").is_ok());
        assert!(validate_key("abc/def").is_ok());
        for key in ["", "/abc", "abc//def", "abc/", "../abc", "abc/./def", "abc/.."] {
            assert!(
                matches!(validate_key(key), Err(BlobError::InvalidKey { .. })),
                "{key} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_round_trip_duplicate_and_delete() {
        let root = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        let source = write_source(&scratch, "upload", b"package content").await;

        for store in stores(&root) {
            store.copy_in(&source, "abc").await.unwrap();
            assert!(store.exists("abc").await.unwrap());
            assert_eq!(read_back(&store, "abc", &scratch).await, b"package content");

            store.copy_between_keys("abc", "def").await.unwrap();
            store.delete("abc").await.unwrap();
            assert!(!store.exists("abc").await.unwrap());
            assert_eq!(read_back(&store, "def", &scratch).await, b"package content");
        }
    }

    #[tokio::test]
    async fn test_copy_in_overwrites() {
        let root = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        let first = write_source(&scratch, "first", b"first").await;
        let second = write_source(&scratch, "second", b"second version").await;

        for store in stores(&root) {
            store.copy_in(&first, "ab/cd").await.unwrap();
            store.copy_in(&second, "ab/cd").await.unwrap();
            assert_eq!(read_back(&store, "ab/cd", &scratch).await, b"second version");
            let blob = store.blob("ab/cd").await.unwrap().unwrap();
            assert_eq!(blob.attributes.content_length, Some(14));
        }
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let root = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        let source = write_source(&scratch, "upload", b"x").await;

        for store in stores(&root) {
            store.delete("missing").await.unwrap();

            store.copy_in(&source, "abc").await.unwrap();
            assert!(store.exists("abc").await.unwrap());
            store.delete("abc").await.unwrap();
            assert!(!store.exists("abc").await.unwrap());
            store.delete("abc").await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_missing_blob_is_none() {
        let root = TempDir::new().unwrap();
        for store in stores(&root) {
            assert!(store.blob("nope").await.unwrap().is_none());
            let err = store.copy_between_keys("nope", "other").await.unwrap_err();
            assert!(err.is_not_found());
        }
    }

    #[tokio::test]
    async fn test_delete_prefix() {
        let root = TempDir::new().unwrap();
        let scratch = TempDir::new().unwrap();
        let source = write_source(&scratch, "upload", b"cache").await;

        for store in stores(&root) {
            store.copy_in(&source, "app-1/cflinuxfs3").await.unwrap();
            store.copy_in(&source, "app-1/cflinuxfs4").await.unwrap();
            store.copy_in(&source, "app-2/cflinuxfs4").await.unwrap();

            store.delete_prefix("app-1").await.unwrap();
            assert!(!store.exists("app-1/cflinuxfs3").await.unwrap());
            assert!(!store.exists("app-1/cflinuxfs4").await.unwrap());
            assert!(store.exists("app-2/cflinuxfs4").await.unwrap());
            store.delete_prefix("app-1").await.unwrap();

            store.delete_prefix("").await.unwrap();
            assert!(!store.exists("app-2/cflinuxfs4").await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_locality() {
        let root = TempDir::new().unwrap();
        let stores = stores(&root);
        assert!(stores[0].is_local());
        assert!(!stores[1].is_local());
    }

    #[tokio::test]
    async fn test_from_local_config() {
        let root = TempDir::new().unwrap();
        let store = BlobStore::from_config(&BlobStoreConfig::local(root.path(), "cc-droplets")).unwrap();
        assert!(store.is_local());
        assert!(root.path().join("cc-droplets").is_dir());
    }
}
