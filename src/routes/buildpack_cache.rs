//! Buildpack cache entries, keyed by `<app_guid>/<stack>`.

use axum::{
    extract::{Path, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::info;

use super::{delete_blob, get_blob, RouteState};
use crate::{
    error::{BitsError, InputError},
    http_objects::BitsApiError,
    resources::{self, Resource},
};

const BUILDPACK_CACHE_FIELD: &str = "buildpack_cache";

pub async fn put_entry(
    Path((app_guid, stack)): Path<(String, String)>,
    State(state): State<RouteState>,
    request: Request,
) -> Result<Response, BitsApiError> {
    let put = state.uploads.read(request, &[BUILDPACK_CACHE_FIELD]).await?;
    let upload = resources::require_file(put.upload, InputError::BuildpackCacheUpload)?;
    resources::store_upload(
        &state.buildpack_cache,
        &upload,
        &format!("{}/{}", app_guid, stack),
    )
    .await?;
    Ok(StatusCode::CREATED.into_response())
}

pub async fn get_entry(
    Path((app_guid, stack)): Path<(String, String)>,
    State(state): State<RouteState>,
) -> Result<Response, BitsApiError> {
    get_blob(&state, Resource::BuildpackCache, &format!("{}/{}", app_guid, stack)).await
}

pub async fn delete_entry(
    Path((app_guid, stack)): Path<(String, String)>,
    State(state): State<RouteState>,
) -> Result<Response, BitsApiError> {
    delete_blob(&state, Resource::BuildpackCache, &format!("{}/{}", app_guid, stack)).await
}

/// Removes the entries of every stack of an app.
pub async fn delete_app_entries(
    Path(app_guid): Path<String>,
    State(state): State<RouteState>,
) -> Result<Response, BitsApiError> {
    info!(app_guid, "deleting buildpack cache entries of app");
    state
        .buildpack_cache
        .delete_prefix(&app_guid)
        .await
        .map_err(BitsError::from)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn delete_all_entries(State(state): State<RouteState>) -> Result<Response, BitsApiError> {
    info!("deleting all buildpack cache entries");
    state
        .buildpack_cache
        .delete_prefix("")
        .await
        .map_err(BitsError::from)?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
