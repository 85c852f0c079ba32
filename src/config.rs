use std::{fmt::Debug, fs, net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{anyhow, Context, Result};
use blob_store::{default_local_root, BlobStoreConfig};
use figment::{
    providers::{Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Base URL, scheme included, that signed URLs point at.
    pub public_endpoint: String,
    /// Required in config files; only the built-in defaults carry a
    /// development secret.
    #[serde(default = "String::new")]
    pub signing_secret: String,
    pub signed_url_expiry_secs: u64,
    pub nginx: NginxConfig,
    /// Largest accepted request body in bytes.
    pub max_body_size: usize,
    pub structured_logging: bool,
    /// Directory for materialized uploads; the system temp dir when unset.
    pub upload_dir: Option<PathBuf>,
    pub packages: BlobStoreConfig,
    pub droplets: BlobStoreConfig,
    pub buildpacks: BlobStoreConfig,
    pub buildpack_cache: BlobStoreConfig,
    pub cc_updates: Option<CcUpdatesConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NginxConfig {
    #[serde(default)]
    pub use_nginx: bool,
}

/// Connection to the system of record. All fields are required when the
/// section is present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CcUpdatesConfig {
    pub cc_url: String,
    pub ca_cert: PathBuf,
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
}

impl CcUpdatesConfig {
    pub fn validate(&self) -> Result<()> {
        if self.cc_url.is_empty() {
            return Err(anyhow!("cc_updates.cc_url must be set"));
        }
        for (name, path) in [
            ("ca_cert", &self.ca_cert),
            ("client_cert", &self.client_cert),
            ("client_key", &self.client_key),
        ] {
            if path.as_os_str().is_empty() {
                return Err(anyhow!("cc_updates.{} must be set", name));
            }
            fs::metadata(path).with_context(|| {
                format!("cc_updates.{} is not readable: {}", name, path.display())
            })?;
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        let root = default_local_root();
        ServerConfig {
            listen_addr: "0.0.0.0:8000".to_string(),
            public_endpoint: "http://localhost:8000".to_string(),
            signing_secret: "bits-dev-secret".to_string(),
            signed_url_expiry_secs: 3600,
            nginx: NginxConfig::default(),
            max_body_size: 1024 * 1024 * 1024,
            structured_logging: false,
            upload_dir: None,
            packages: BlobStoreConfig::local(&root, "cc-packages"),
            droplets: BlobStoreConfig::local(&root, "cc-droplets"),
            buildpacks: BlobStoreConfig::local(&root, "cc-buildpacks"),
            buildpack_cache: BlobStoreConfig::local(&root, "cc-buildpack_cache"),
            cc_updates: None,
        }
    }
}

impl ServerConfig {
    pub fn from_path(path: &str) -> Result<ServerConfig> {
        let config_str =
            fs::read_to_string(path).with_context(|| format!("reading config file {}", path))?;
        let config: ServerConfig = Figment::new().merge(Yaml::string(&config_str)).extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.listen_addr.parse::<SocketAddr>().is_err() {
            return Err(anyhow!("invalid listen address: {}", self.listen_addr));
        }
        if self.signing_secret.is_empty() {
            return Err(anyhow!("signing_secret must be set"));
        }
        if self.signed_url_expiry_secs == 0 {
            return Err(anyhow!("signed_url_expiry_secs must be positive"));
        }
        if let Some(cc_updates) = &self.cc_updates {
            cc_updates.validate()?;
        }
        Ok(())
    }

    pub fn signed_url_expiry(&self) -> Duration {
        Duration::from_secs(self.signed_url_expiry_secs)
    }
}
