//! Error types for blob store operations.

use std::{error::Error as StdError, io};

/// Result type for blob store operations.
pub type BlobResult<T> = Result<T, BlobError>;

/// Errors that can occur during blob store operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum BlobError {
    /// Blob not found at the specified key.
    #[error("Blob not found: {key}")]
    NotFound { key: String },

    /// The key cannot be mapped onto the backend.
    #[error("Invalid blob key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    /// The backend ran out of storage while writing.
    #[error("No space left on device")]
    NoSpaceLeft,

    /// The signing authority refused to sign.
    #[error("Could not get a signed url, {status}/{body}")]
    SigningRequest { status: u16, body: String },

    /// Operation has no meaning for this backend.
    #[error("{operation} is not supported by the {backend} backend")]
    Unsupported {
        operation: &'static str,
        backend: &'static str,
    },

    /// I/O error during blob operation.
    #[error("I/O error: {source}")]
    IoError { source: io::Error },

    /// Error reported by the object store client.
    #[error("Object store error: {source}")]
    ObjectStore { source: object_store::Error },

    /// Network error talking to the signing authority.
    #[error("Network error: {source}")]
    NetworkError {
        #[from]
        source: reqwest::Error,
    },

    /// Invalid endpoint or signed URL.
    #[error("Invalid URL: {source}")]
    InvalidUrl {
        #[from]
        source: url::ParseError,
    },

    /// Generic error.
    #[error("Blob store error: {source}")]
    Other {
        #[from]
        source: anyhow::Error,
    },
}

impl BlobError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BlobError::NotFound { .. })
    }
}

impl From<io::Error> for BlobError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::StorageFull {
            return BlobError::NoSpaceLeft;
        }
        BlobError::IoError { source: err }
    }
}

impl From<object_store::Error> for BlobError {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => BlobError::NotFound { key: path },
            err if is_storage_full(&err) => BlobError::NoSpaceLeft,
            err => BlobError::ObjectStore { source: err },
        }
    }
}

/// Walks the source chain looking for an exhausted-storage I/O error.
fn is_storage_full(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            if io_err.kind() == io::ErrorKind::StorageFull {
                return true;
            }
        }
        current = e.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_full_maps_to_no_space_left() {
        let err: BlobError = io::Error::from(io::ErrorKind::StorageFull).into();
        assert!(matches!(err, BlobError::NoSpaceLeft));
        assert_eq!(err.to_string(), "No space left on device");
    }

    #[test]
    fn test_other_io_errors_stay_io_errors() {
        let err: BlobError = io::Error::from(io::ErrorKind::PermissionDenied).into();
        assert!(matches!(err, BlobError::IoError { .. }));
    }

    #[test]
    fn test_object_store_not_found() {
        let err: BlobError = object_store::Error::NotFound {
            path: "packages/abc".to_string(),
            source: "missing".into(),
        }
        .into();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_object_store_storage_full() {
        let err: BlobError = object_store::Error::Generic {
            store: "LocalFileSystem",
            source: Box::new(io::Error::from(io::ErrorKind::StorageFull)),
        }
        .into();
        assert!(matches!(err, BlobError::NoSpaceLeft));
    }
}
