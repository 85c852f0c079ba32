use axum::{
    extract::{Path, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

use super::{delete_blob, get_blob, RouteState};
use crate::{
    digest_header::DigestHeaderParser,
    error::{BitsError, InputError},
    http_objects::BitsApiError,
    resources::{self, Resource},
};

const DROPLET_FIELD: &str = "droplet";

/// Stores an upload or duplicates the droplet named by `source_guid`, which
/// is itself a `<guid>/<checksum>` key.
pub async fn put_droplet(
    Path((guid, checksum)): Path<(String, String)>,
    State(state): State<RouteState>,
    request: Request,
) -> Result<Response, BitsApiError> {
    let key = format!("{}/{}", guid, checksum);
    let put = state.uploads.read(request, &[DROPLET_FIELD]).await?;
    let source_guid = put.source_guid().map(str::to_string);

    match (put.upload, source_guid) {
        (Some(upload), _) => {
            let upload = resources::require_file(Some(upload), InputError::DropletUpload)?;
            resources::store_upload(&state.droplets, &upload, &key).await?;
        }
        (None, Some(source)) => {
            resources::duplicate(&state.droplets, &source, &key, || source.clone()).await?;
        }
        (None, None) => return Err(BitsError::from(InputError::InvalidDropletSource).into()),
    }
    Ok(StatusCode::CREATED.into_response())
}

/// Stores an upload under `<guid>/<sha256>`, the digest being taken from the
/// `Digest` request header.
pub async fn put_droplet_with_digest(
    Path(guid): Path<String>,
    State(state): State<RouteState>,
    request: Request,
) -> Result<Response, BitsApiError> {
    let header = request
        .headers()
        .get("Digest")
        .map(|value| value.to_str().unwrap_or_default().to_string());
    let digest = DigestHeaderParser::new("sha256")
        .parse(header.as_deref())
        .map_err(|e| BitsError::from(InputError::DropletUpload(e.to_string())))?
        .to_string();

    let put = state.uploads.read(request, &[DROPLET_FIELD]).await?;
    let upload = resources::require_file(put.upload, InputError::DropletUpload)?;
    resources::store_upload(&state.droplets, &upload, &format!("{}/{}", guid, digest)).await?;
    Ok(StatusCode::CREATED.into_response())
}

pub async fn get_droplet(
    Path((guid, checksum)): Path<(String, String)>,
    State(state): State<RouteState>,
) -> Result<Response, BitsApiError> {
    get_blob(&state, Resource::Droplets, &format!("{}/{}", guid, checksum)).await
}

pub async fn delete_droplet(
    Path((guid, checksum)): Path<(String, String)>,
    State(state): State<RouteState>,
) -> Result<Response, BitsApiError> {
    delete_blob(&state, Resource::Droplets, &format!("{}/{}", guid, checksum)).await
}
