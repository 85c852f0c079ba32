use std::{fmt, path::Path as FsPath, sync::Arc};

use bits_utils::expiry_from_now;
use futures::{StreamExt, TryStreamExt};
use http::Method;
use object_store::{path::Path, signer::Signer, ObjectStore, WriteMultipart};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncWriteExt},
};
use tracing::debug;

use crate::{
    blob::{BlobAccess, BlobAttributes},
    signing_authority::{Audience, SigningAuthority, SigningIntent},
    validate_key,
    Blob,
    BlobError,
    BlobResult,
    DEFAULT_URL_EXPIRY,
};

const UPLOAD_CHUNK_SIZE: usize = 5 * 1024 * 1024;

/// How a remote backend mints download and upload URLs.
#[derive(Clone)]
pub enum RemoteSigner {
    /// The object store presigns URLs itself (S3).
    Native(Arc<dyn Signer>),
    /// An access-control proxy mints them (WebDAV).
    Authority(SigningAuthority),
}

impl fmt::Debug for RemoteSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteSigner::Native(signer) => f.debug_tuple("Native").field(signer).finish(),
            RemoteSigner::Authority(authority) => {
                f.debug_tuple("Authority").field(authority).finish()
            }
        }
    }
}

impl RemoteSigner {
    pub(crate) async fn sign(
        &self,
        location: &Path,
        intent: SigningIntent,
        audience: Audience,
    ) -> BlobResult<String> {
        match self {
            RemoteSigner::Native(signer) => {
                let method = match intent {
                    SigningIntent::Download => Method::GET,
                    SigningIntent::Upload => Method::PUT,
                };
                let url = signer
                    .signed_url(method, location, DEFAULT_URL_EXPIRY)
                    .await?;
                Ok(url.to_string())
            }
            RemoteSigner::Authority(authority) => {
                authority
                    .sign(
                        location.as_ref(),
                        expiry_from_now(DEFAULT_URL_EXPIRY),
                        intent,
                        audience,
                    )
                    .await
            }
        }
    }
}

pub(crate) struct RemoteBackend {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    signer: RemoteSigner,
}

impl RemoteBackend {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: &str, signer: RemoteSigner) -> BlobResult<Self> {
        let prefix = prefix.trim_matches('/');
        if !prefix.is_empty() {
            validate_key(prefix)?;
        }
        Ok(Self {
            store,
            prefix: prefix.to_string(),
            signer,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn location(&self, key: &str) -> BlobResult<Path> {
        validate_key(key)?;
        Ok(self.join(key))
    }

    fn join(&self, key: &str) -> Path {
        if self.prefix.is_empty() {
            Path::from(key)
        } else {
            Path::from(format!("{}/{}", self.prefix, key))
        }
    }

    pub async fn blob(&self, key: &str) -> BlobResult<Option<Blob>> {
        let location = self.location(key)?;
        let meta = match self.store.head(&location).await {
            Ok(meta) => meta,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(Blob {
            key: key.to_string(),
            attributes: BlobAttributes {
                etag: meta.e_tag,
                last_modified: Some(meta.last_modified),
                content_length: Some(meta.size),
                created_at: None,
            },
            access: BlobAccess::Remote {
                location,
                signer: self.signer.clone(),
            },
        }))
    }

    pub async fn copy_in(&self, source: &FsPath, key: &str) -> BlobResult<()> {
        let location = self.location(key)?;
        debug!(key, source = %source.display(), "uploading file to remote blob store");
        let mut file = File::open(source).await?;

        match self.store.put_multipart(&location).await {
            Ok(upload) => {
                let mut writer = WriteMultipart::new(upload);
                if let Err(err) = stream_into(&mut file, &mut writer).await {
                    let _ = writer.abort().await;
                    return Err(err);
                }
                writer.finish().await?;
            }
            // WebDAV has no multipart uploads.
            Err(object_store::Error::NotImplemented) => {
                let mut content = Vec::new();
                file.read_to_end(&mut content).await?;
                self.store.put(&location, content.into()).await?;
            }
            Err(err) => return Err(err.into()),
        }
        Ok(())
    }

    pub async fn copy_between_keys(&self, source_key: &str, destination_key: &str) -> BlobResult<()> {
        let from = self.location(source_key)?;
        let to = self.location(destination_key)?;
        self.store.copy(&from, &to).await.map_err(|err| match err {
            object_store::Error::NotFound { .. } => BlobError::NotFound {
                key: source_key.to_string(),
            },
            err => err.into(),
        })
    }

    pub async fn delete(&self, key: &str) -> BlobResult<()> {
        let location = self.location(key)?;
        match self.store.delete(&location).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn delete_prefix(&self, prefix: &str) -> BlobResult<()> {
        let prefix = prefix.trim_end_matches('/');
        let root = match (prefix.is_empty(), self.prefix.is_empty()) {
            (true, true) => None,
            (true, false) => Some(Path::from(self.prefix.as_str())),
            (false, _) => Some(self.location(prefix)?),
        };
        let locations: Vec<Path> = self
            .store
            .list(root.as_ref())
            .map_ok(|meta| meta.location)
            .try_collect()
            .await?;
        for location in locations {
            match self.store.delete(&location).await {
                Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    pub async fn download(&self, key: &str, destination: &FsPath) -> BlobResult<()> {
        let location = self.location(key)?;
        let result = self.store.get(&location).await.map_err(|err| match err {
            object_store::Error::NotFound { .. } => BlobError::NotFound {
                key: key.to_string(),
            },
            err => err.into(),
        })?;
        let mut stream = result.into_stream();
        let mut file = File::create(destination).await?;
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        Ok(())
    }
}

async fn stream_into(file: &mut File, writer: &mut WriteMultipart) -> BlobResult<()> {
    let mut buffer = vec![0u8; UPLOAD_CHUNK_SIZE];
    loop {
        writer.wait_for_capacity(1).await?;
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            return Ok(());
        }
        writer.write(&buffer[..read]);
    }
}
