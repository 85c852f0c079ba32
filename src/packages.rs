//! Package creation with upload state reporting.
//!
//! Uploads move the package through `PROCESSING_UPLOAD` and then `READY`
//! with the checksums of the stored archive; duplicates go straight to
//! `READY`. Whatever goes wrong after the request is accepted is reported as
//! `FAILED`, on a best-effort basis, before the original error is returned.

use std::{fs::File, io::Read, path::Path};

use bits_utils::best_effort;
use blob_store::BlobStore;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use tracing::{info, info_span, Instrument};

use crate::{
    app_packager::AppPackager,
    cc_updater::{CcUpdater, Checksums},
    error::{BitsError, BitsResult, InputError},
    resources,
    upload::{UploadReader, UploadedFile},
};

/// Multipart field carrying app bits that are validated and repackaged.
pub const BITS_FIELD: &str = "bits";
/// Multipart field carrying a package stored as-is.
pub const PACKAGE_FIELD: &str = "package";

#[derive(Debug)]
pub enum PackageSource {
    /// App bits zip, repackaged before storing.
    Bits(UploadedFile),
    /// Ready-made package, stored unchanged.
    Package(UploadedFile),
    /// Copy of an existing package.
    Duplicate(String),
}

impl PackageSource {
    pub fn from_upload(upload: UploadedFile) -> Self {
        if upload.field() == BITS_FIELD {
            PackageSource::Bits(upload)
        } else {
            PackageSource::Package(upload)
        }
    }
}

#[derive(Debug, Clone)]
pub struct PackageService {
    store: BlobStore,
    cc_updater: CcUpdater,
    uploads: UploadReader,
}

impl PackageService {
    pub fn new(store: BlobStore, cc_updater: CcUpdater, uploads: UploadReader) -> Self {
        Self {
            store,
            cc_updater,
            uploads,
        }
    }

    pub fn store(&self) -> &BlobStore {
        &self.store
    }

    pub async fn create(&self, guid: &str, source: Option<PackageSource>) -> BitsResult<Checksums> {
        let span = info_span!("create_package", guid);
        async {
            let result = match source {
                Some(source) => self.create_from(guid, source).await,
                None => Err(InputError::InvalidPackageSource.into()),
            };
            if let Err(err) = &result {
                best_effort(
                    &format!("FAILED report for package {}", guid),
                    self.cc_updater.failed(guid, &err.to_string()),
                )
                .await;
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn create_from(&self, guid: &str, source: PackageSource) -> BitsResult<Checksums> {
        match source {
            PackageSource::Bits(upload) => {
                self.cc_updater.processing_upload(guid).await?;
                let upload = require_package(upload)?;
                let checksums = self.store_bits(guid, &upload).await?;
                self.cc_updater.ready(guid, &checksums).await?;
                Ok(checksums)
            }
            PackageSource::Package(upload) => {
                self.cc_updater.processing_upload(guid).await?;
                let upload = require_package(upload)?;
                resources::store_upload(&self.store, &upload, guid).await?;
                let checksums = file_checksums(upload.path()).await?;
                self.cc_updater.ready(guid, &checksums).await?;
                Ok(checksums)
            }
            PackageSource::Duplicate(source_guid) => {
                resources::duplicate(&self.store, &source_guid, guid, || {
                    format!("Could not find package: {}", source_guid)
                })
                .await?;
                let checksums = Checksums::default();
                self.cc_updater.ready(guid, &checksums).await?;
                Ok(checksums)
            }
        }
    }

    /// Validates app bits, rebuilds the archive from its extracted tree
    /// without directory entries, and stores the result.
    async fn store_bits(&self, guid: &str, upload: &UploadedFile) -> BitsResult<Checksums> {
        let uploaded = AppPackager::new(upload.path());
        let size = uploaded.size().await?;
        info!(guid, size, "repackaging app bits");

        let workdir = self.uploads.temp_dir()?;
        let contents = workdir.path().join("contents");
        tokio::fs::create_dir(&contents).await?;
        uploaded.extract(&contents).await?;

        let repackaged = AppPackager::new(workdir.path().join("package.zip"));
        repackaged.append_tree(&contents).await?;
        // An archive without files leaves nothing to repackage.
        let stored = if tokio::fs::try_exists(repackaged.path()).await? {
            repackaged.strip_directory_entries().await?;
            repackaged.path()
        } else {
            upload.path()
        };

        self.store.copy_in(stored, guid).await?;
        file_checksums(stored).await
    }
}

fn require_package(upload: UploadedFile) -> BitsResult<UploadedFile> {
    resources::require_file(Some(upload), InputError::PackageUpload)
}

/// SHA-1 and SHA-256 of a file, computed in one pass.
pub async fn file_checksums(path: &Path) -> BitsResult<Checksums> {
    let path = path.to_path_buf();
    let (sha1, sha256) = tokio::task::spawn_blocking(move || {
        let mut file = File::open(path)?;
        let mut sha1 = Sha1::new();
        let mut sha256 = Sha256::new();
        let mut buffer = vec![0u8; 64 * 1024];
        loop {
            let read = file.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            sha1.update(&buffer[..read]);
            sha256.update(&buffer[..read]);
        }
        Ok::<_, std::io::Error>((hex::encode(sha1.finalize()), hex::encode(sha256.finalize())))
    })
    .await
    .map_err(|e| BitsError::BackendFailure(e.to_string()))??;
    Ok(Checksums {
        sha1: Some(sha1),
        sha256: Some(sha256),
    })
}
