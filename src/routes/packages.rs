use axum::{
    extract::{Path, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use super::{delete_blob, get_blob, RouteState};
use crate::{
    http_objects::{BitsApiError, PackageCreated},
    packages::{PackageSource, BITS_FIELD, PACKAGE_FIELD},
    resources::Resource,
};

pub async fn put_package(
    Path(guid): Path<String>,
    State(state): State<RouteState>,
    request: Request,
) -> Result<Response, BitsApiError> {
    let put = state
        .uploads
        .read(request, &[BITS_FIELD, PACKAGE_FIELD])
        .await?;
    let source_guid = put.source_guid().map(str::to_string);
    let source = match put.upload {
        Some(upload) => Some(PackageSource::from_upload(upload)),
        None => source_guid.map(PackageSource::Duplicate),
    };

    let checksums = state.packages.create(&guid, source).await?;
    Ok((
        StatusCode::CREATED,
        Json(PackageCreated::new(&guid, &checksums)),
    )
        .into_response())
}

pub async fn get_package(
    Path(guid): Path<String>,
    State(state): State<RouteState>,
) -> Result<Response, BitsApiError> {
    get_blob(&state, Resource::Packages, &guid).await
}

pub async fn delete_package(
    Path(guid): Path<String>,
    State(state): State<RouteState>,
) -> Result<Response, BitsApiError> {
    delete_blob(&state, Resource::Packages, &guid).await
}
