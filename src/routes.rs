use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, MatchedPath, OriginalUri, Path, Query, Request, State},
    http::{header::CONTENT_TYPE, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, put},
    Router,
};
use bits_utils::get_epoch_time_in_secs;
use blob_store::BlobStore;
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::{
    http_objects::BitsApiError,
    packages::PackageService,
    resources::{self, Resource},
    signer::SecureLinkSigner,
    upload::UploadReader,
    url_signer::{UrlSigner, Verb},
};

mod buildpack_cache;
mod buildpacks;
mod droplets;
mod packages;

#[derive(Clone)]
pub struct RouteState {
    pub packages: PackageService,
    pub droplets: BlobStore,
    pub buildpacks: BlobStore,
    pub buildpack_cache: BlobStore,
    pub url_signer: Arc<UrlSigner>,
    pub signer: SecureLinkSigner,
    pub use_nginx: bool,
    pub uploads: UploadReader,
}

impl RouteState {
    pub fn store(&self, resource: Resource) -> &BlobStore {
        match resource {
            Resource::Packages => self.packages.store(),
            Resource::Droplets => &self.droplets,
            Resource::Buildpacks => &self.buildpacks,
            Resource::BuildpackCache => &self.buildpack_cache,
        }
    }
}

pub fn create_routes(route_state: RouteState, max_body_size: usize) -> Router {
    let signed = resource_routes().route_layer(middleware::from_fn_with_state(
        route_state.clone(),
        verify_signature,
    ));

    Router::new()
        .route("/", get(index))
        .route("/sign/{resource}/{*key}", get(sign_url))
        .merge(resource_routes())
        .nest("/signed", signed)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request| {
                    let method = req.method();
                    let uri = req.uri();

                    let matched_path = req
                        .extensions()
                        .get::<MatchedPath>()
                        .map(|matched_path| matched_path.as_str());

                    tracing::debug_span!("request", %method, %uri, matched_path)
                })
                .on_failure(()),
        )
        .layer(DefaultBodyLimit::max(max_body_size))
        .with_state(route_state)
}

/// Resource routes, served both directly and below `/signed`.
fn resource_routes() -> Router<RouteState> {
    Router::new()
        .route(
            "/packages/{guid}",
            put(packages::put_package)
                .get(packages::get_package)
                .delete(packages::delete_package),
        )
        .route("/droplets/{guid}", put(droplets::put_droplet_with_digest))
        .route(
            "/droplets/{guid}/{checksum}",
            put(droplets::put_droplet)
                .get(droplets::get_droplet)
                .delete(droplets::delete_droplet),
        )
        .route(
            "/buildpacks/{guid}",
            put(buildpacks::put_buildpack)
                .get(buildpacks::get_buildpack)
                .delete(buildpacks::delete_buildpack),
        )
        .route(
            "/buildpack_cache/entries",
            delete(buildpack_cache::delete_all_entries),
        )
        .route(
            "/buildpack_cache/entries/{app_guid}",
            delete(buildpack_cache::delete_app_entries),
        )
        .route(
            "/buildpack_cache/entries/{app_guid}/{stack}",
            put(buildpack_cache::put_entry)
                .get(buildpack_cache::get_entry)
                .delete(buildpack_cache::delete_entry),
        )
}

async fn index() -> &'static str {
    "Bits Service"
}

async fn get_blob(state: &RouteState, resource: Resource, key: &str) -> Result<Response, BitsApiError> {
    let blob = resources::fetch(state.store(resource), key, state.use_nginx).await?;
    Ok(blob.into_http().await?)
}

async fn delete_blob(state: &RouteState, resource: Resource, key: &str) -> Result<Response, BitsApiError> {
    resources::remove(state.store(resource), key).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[derive(Debug, Deserialize)]
struct SignParams {
    #[serde(default)]
    verb: Option<String>,
}

async fn sign_url(
    Path((resource, key)): Path<(String, String)>,
    Query(params): Query<SignParams>,
    State(state): State<RouteState>,
) -> Result<Response, BitsApiError> {
    let resource: Resource = resource.parse()?;
    let verb = match params.verb.as_deref() {
        Some(verb) => verb.parse()?,
        None => Verb::Get,
    };
    let url = state
        .url_signer
        .signed_url(resource, &key, verb, state.store(resource))
        .await?;
    Ok(([(CONTENT_TYPE, "text/plain")], url).into_response())
}

#[derive(Debug, Deserialize)]
struct SignatureParams {
    md5: String,
    expires: u64,
}

/// Admits a request below `/signed` only with a valid, unexpired signature
/// for its exact path.
async fn verify_signature(
    State(state): State<RouteState>,
    OriginalUri(uri): OriginalUri,
    request: Request,
    next: Next,
) -> Result<Response, BitsApiError> {
    let Ok(Query(params)) = Query::<SignatureParams>::try_from_uri(&uri) else {
        warn!(path = uri.path(), "signed request without signature");
        return Err(BitsApiError::forbidden("Missing signature"));
    };
    if !state.signer.verify(
        uri.path(),
        params.expires,
        &params.md5,
        get_epoch_time_in_secs(),
    ) {
        warn!(path = uri.path(), "rejected signed request");
        return Err(BitsApiError::forbidden("Invalid or expired signature"));
    }
    Ok(next.run(request).await)
}
