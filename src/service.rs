use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum::Router;
use axum_server::Handle;
use blob_store::BlobStore;
use tokio::signal;
use tracing::info;

use crate::{
    cc_updater::CcUpdater,
    config::ServerConfig,
    packages::PackageService,
    routes::{create_routes, RouteState},
    signer::SecureLinkSigner,
    upload::UploadReader,
    url_signer::UrlSigner,
};

#[derive(Clone)]
pub struct Service {
    pub config: ServerConfig,
    pub route_state: RouteState,
}

impl Service {
    pub fn new(config: ServerConfig) -> Result<Self> {
        let packages = BlobStore::from_config(&config.packages)
            .context("error initializing packages blob store")?;
        let droplets = BlobStore::from_config(&config.droplets)
            .context("error initializing droplets blob store")?;
        let buildpacks = BlobStore::from_config(&config.buildpacks)
            .context("error initializing buildpacks blob store")?;
        let buildpack_cache = BlobStore::from_config(&config.buildpack_cache)
            .context("error initializing buildpack cache blob store")?;

        let signer = SecureLinkSigner::new(&config.signing_secret)
            .context("error initializing url signer")?;
        let url_signer = Arc::new(UrlSigner::new(
            signer.clone(),
            &config.public_endpoint,
            config.signed_url_expiry(),
        ));
        let cc_updater = CcUpdater::from_config(config.cc_updates.as_ref())
            .context("error initializing cc updates")?;
        let uploads = UploadReader::new(config.upload_dir.clone());

        let route_state = RouteState {
            packages: PackageService::new(packages, cc_updater, uploads.clone()),
            droplets,
            buildpacks,
            buildpack_cache,
            url_signer,
            signer,
            use_nginx: config.nginx.use_nginx,
            uploads,
        };

        Ok(Self {
            config,
            route_state,
        })
    }

    pub fn routes(&self) -> Router {
        create_routes(self.route_state.clone(), self.config.max_body_size)
    }

    pub async fn start(&self) -> Result<()> {
        let handle = Handle::new();
        let handle_sh = handle.clone();
        tokio::spawn(async move {
            shutdown_signal(handle_sh).await;
            info!("graceful shutdown signal received, shutting down server gracefully");
        });

        let addr: SocketAddr = self.config.listen_addr.parse()?;
        info!("server api listening on {}", self.config.listen_addr);
        axum_server::bind(addr)
            .handle(handle)
            .serve(self.routes().into_make_service())
            .await?;

        Ok(())
    }
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
        },
        _ = terminate => {
        },
    }
    handle.shutdown();
    info!("signal received, shutting down server gracefully");
}
