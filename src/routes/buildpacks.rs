use axum::{
    extract::{Path, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

use super::{delete_blob, get_blob, RouteState};
use crate::{
    error::InputError,
    http_objects::BitsApiError,
    resources::{self, Resource},
};

const BUILDPACK_FIELD: &str = "buildpack";

pub async fn put_buildpack(
    Path(guid): Path<String>,
    State(state): State<RouteState>,
    request: Request,
) -> Result<Response, BitsApiError> {
    let put = state.uploads.read(request, &[BUILDPACK_FIELD]).await?;
    let upload = resources::require_file(put.upload, InputError::BuildpackUpload)?;
    resources::store_upload(&state.buildpacks, &upload, &guid).await?;
    Ok(StatusCode::CREATED.into_response())
}

pub async fn get_buildpack(
    Path(guid): Path<String>,
    State(state): State<RouteState>,
) -> Result<Response, BitsApiError> {
    get_blob(&state, Resource::Buildpacks, &guid).await
}

pub async fn delete_buildpack(
    Path(guid): Path<String>,
    State(state): State<RouteState>,
) -> Result<Response, BitsApiError> {
    delete_blob(&state, Resource::Buildpacks, &guid).await
}
