use anyhow::Result;
use blob_store::BlobStoreConfig;
use tempfile::TempDir;
use tracing::subscriber;
use tracing_subscriber::{layer::SubscriberExt, Layer};

use crate::{
    cc_updater::CcUpdater,
    config::{NginxConfig, ServerConfig},
    service::Service,
};

pub const TEST_SECRET: &str = "geh3im";

/// A service running on an ephemeral port with all stores in a temp dir.
pub struct TestService {
    pub service: Service,
    pub base_url: String,
    pub client: reqwest::Client,
    pub temp_dir: TempDir,
}

impl TestService {
    pub async fn new() -> Result<Self> {
        Self::start(false, None).await
    }

    pub async fn with_nginx() -> Result<Self> {
        Self::start(true, None).await
    }

    pub async fn with_cc_updater(cc_updater: CcUpdater) -> Result<Self> {
        Self::start(false, Some(cc_updater)).await
    }

    async fn start(use_nginx: bool, cc_updater: Option<CcUpdater>) -> Result<Self> {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"));
        let _ = subscriber::set_global_default(
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer().with_filter(env_filter)),
        );

        let temp_dir = tempfile::tempdir()?;
        let root = temp_dir.path().join("store");
        let uploads = temp_dir.path().join("uploads");
        std::fs::create_dir_all(&uploads)?;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let base_url = format!("http://{}", listener.local_addr()?);

        let cfg = ServerConfig {
            listen_addr: listener.local_addr()?.to_string(),
            public_endpoint: base_url.clone(),
            signing_secret: TEST_SECRET.to_string(),
            nginx: NginxConfig { use_nginx },
            upload_dir: Some(uploads),
            packages: BlobStoreConfig::local(&root, "cc-packages"),
            droplets: BlobStoreConfig::local(&root, "cc-droplets"),
            buildpacks: BlobStoreConfig::local(&root, "cc-buildpacks"),
            buildpack_cache: BlobStoreConfig::local(&root, "cc-buildpack_cache"),
            ..Default::default()
        };
        let mut service = Service::new(cfg)?;
        if let Some(cc_updater) = cc_updater {
            service.route_state.packages = crate::packages::PackageService::new(
                service.route_state.packages.store().clone(),
                cc_updater,
                service.route_state.uploads.clone(),
            );
        }

        let routes = service.routes();
        tokio::spawn(async move {
            let _ = axum::serve(listener, routes).await;
        });

        Ok(Self {
            service,
            base_url,
            client: reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .build()?,
            temp_dir,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Path of a blob on disk below the local store root.
    pub fn stored_path(&self, directory_key: &str, key: &str) -> std::path::PathBuf {
        self.temp_dir.path().join("store").join(directory_key).join(key)
    }
}
