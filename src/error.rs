use std::io;

use blob_store::BlobError;

use crate::{app_packager::PackagerError, cc_updater::StateSyncError};

/// Reasons an upload request is rejected before anything is written.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InputError {
    #[error("Request invalid due to parse error: {0}")]
    MessageParse(String),

    #[error("The request is invalid: {0}")]
    InvalidRequest(String),

    #[error(
        "Cannot create package. The source must either be uploaded or the guid of a source app \
         to be copied must be provided"
    )]
    InvalidPackageSource,

    #[error(
        "Cannot create droplet. The source must either be uploaded or the guid of a source \
         droplet to be copied must be provided"
    )]
    InvalidDropletSource,

    #[error("The package upload is invalid: {0}")]
    PackageUpload(String),

    #[error("The droplet upload is invalid: {0}")]
    DropletUpload(String),

    #[error("The buildpack upload is invalid: {0}")]
    BuildpackUpload(String),

    #[error("The buildpack cache upload is invalid: {0}")]
    BuildpackCacheUpload(String),

    #[error("The app upload is invalid: {0}")]
    AppBitsUpload(String),
}

#[derive(Debug, thiserror::Error)]
pub enum BitsError {
    #[error(transparent)]
    InvalidInput(#[from] InputError),

    #[error("{0}")]
    NotFound(String),

    #[error("No space left on device")]
    OutOfSpace,

    #[error("{0}")]
    UpdateConflict(String),

    #[error("{0}")]
    SigningFailure(String),

    #[error("{0}")]
    BackendFailure(String),

    #[error("The app package is invalid: {0}")]
    PackageInvalid(String),

    #[error("{0}")]
    Configuration(String),
}

pub type BitsResult<T> = Result<T, BitsError>;

impl From<BlobError> for BitsError {
    fn from(err: BlobError) -> Self {
        match err {
            BlobError::NotFound { key } => BitsError::NotFound(key),
            BlobError::NoSpaceLeft => BitsError::OutOfSpace,
            BlobError::InvalidKey { key, reason } => {
                InputError::InvalidRequest(format!("invalid key '{}': {}", key, reason)).into()
            }
            err @ BlobError::SigningRequest { .. } => BitsError::SigningFailure(err.to_string()),
            err => BitsError::BackendFailure(err.to_string()),
        }
    }
}

impl From<StateSyncError> for BitsError {
    fn from(err: StateSyncError) -> Self {
        match err {
            StateSyncError::ResourceNotFound(message) => BitsError::NotFound(message),
            StateSyncError::UpdateConflict(_) => {
                BitsError::UpdateConflict("Cannot update an existing package".to_string())
            }
            err => BitsError::BackendFailure(err.to_string()),
        }
    }
}

impl From<PackagerError> for BitsError {
    fn from(err: PackagerError) -> Self {
        match err {
            PackagerError::InvalidInput(message) => InputError::AppBitsUpload(message).into(),
            PackagerError::PackageInvalid(message) => BitsError::PackageInvalid(message),
            PackagerError::Io(err) => err.into(),
            err => BitsError::BackendFailure(err.to_string()),
        }
    }
}

impl From<io::Error> for BitsError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::StorageFull {
            return BitsError::OutOfSpace;
        }
        BitsError::BackendFailure(err.to_string())
    }
}
