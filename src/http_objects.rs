use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::{
    cc_updater::Checksums,
    error::{BitsError, InputError},
};

/// Error body in the Cloud Controller's format.
#[derive(Debug, Serialize, Deserialize)]
pub struct BitsApiError {
    #[serde(skip)]
    status_code: StatusCode,
    pub code: u32,
    pub description: String,
    pub error_code: String,
}

impl BitsApiError {
    pub fn new(status_code: StatusCode, code: u32, name: &str, description: &str) -> Self {
        Self {
            status_code,
            code,
            description: description.to_string(),
            error_code: format!("CF-{}", name),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.status_code
    }

    pub fn forbidden(description: &str) -> Self {
        Self::new(StatusCode::FORBIDDEN, 10002, "NotAuthenticated", description)
    }
}

fn input_error_details(err: &InputError) -> (u32, &'static str) {
    match err {
        InputError::MessageParse(_) => (1001, "MessageParseError"),
        InputError::InvalidRequest(_) => (10004, "InvalidRequest"),
        InputError::InvalidPackageSource => (150011, "InvalidPackageSource"),
        InputError::InvalidDropletSource => (150012, "InvalidDropletSource"),
        InputError::PackageUpload(_) => (150013, "PackageUploadInvalid"),
        InputError::DropletUpload(_) => (150014, "DropletUploadInvalid"),
        InputError::BuildpackUpload(_) => (290002, "BuildpackBitsUploadInvalid"),
        InputError::BuildpackCacheUpload(_) => (290003, "BuildpackCacheUploadInvalid"),
        InputError::AppBitsUpload(_) => (160001, "AppBitsUploadInvalid"),
    }
}

impl From<BitsError> for BitsApiError {
    fn from(err: BitsError) -> Self {
        let description = err.to_string();
        let (status, code, name) = match &err {
            BitsError::InvalidInput(input) => {
                let (code, name) = input_error_details(input);
                (StatusCode::BAD_REQUEST, code, name)
            }
            BitsError::NotFound(_) => (StatusCode::NOT_FOUND, 10010, "ResourceNotFound"),
            BitsError::OutOfSpace => (StatusCode::INSUFFICIENT_STORAGE, 500000, "NoSpaceOnDevice"),
            BitsError::UpdateConflict(_) => {
                (StatusCode::BAD_REQUEST, 150010, "CannotUpdateExistingPackage")
            }
            BitsError::PackageInvalid(_) => (StatusCode::BAD_REQUEST, 150001, "AppPackageInvalid"),
            BitsError::SigningFailure(_)
            | BitsError::BackendFailure(_)
            | BitsError::Configuration(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, 10001, "ServerError")
            }
        };
        Self::new(status, code, name, &description)
    }
}

impl IntoResponse for BitsApiError {
    fn into_response(self) -> Response {
        if self.status_code.is_server_error() {
            error!("API Error: {} - {}", self.status_code, self.description);
        } else {
            warn!("API Error: {} - {}", self.status_code, self.description);
        }
        (self.status_code, Json(self)).into_response()
    }
}

/// Optional JSON body of PUT requests that duplicate an existing blob.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DuplicateRequest {
    pub source_guid: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChecksumEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

/// Response to a successful package upload.
#[derive(Debug, Serialize, Deserialize)]
pub struct PackageCreated {
    pub guid: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub checksums: Vec<ChecksumEntry>,
}

impl PackageCreated {
    pub fn new(guid: &str, checksums: &Checksums) -> Self {
        let mut entries = Vec::new();
        if let Some(sha1) = &checksums.sha1 {
            entries.push(ChecksumEntry {
                kind: "sha1".to_string(),
                value: sha1.clone(),
            });
        }
        if let Some(sha256) = &checksums.sha256 {
            entries.push(ChecksumEntry {
                kind: "sha256".to_string(),
                value: sha256.clone(),
            });
        }
        Self {
            guid: guid.to_string(),
            state: "READY".to_string(),
            checksums: entries,
        }
    }
}
