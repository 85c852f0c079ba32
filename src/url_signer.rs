//! Mints access URLs for stored blobs.
//!
//! Local stores are served through `<public_endpoint>/signed/...`, protected by
//! a secure-link signature. Remote stores hand out their own download URLs,
//! but uploads are always funneled through this service so that server-side
//! checks apply to them.

use std::{fmt, str::FromStr, time::Duration};

use bits_utils::expiry_from_now;
use blob_store::BlobStore;
use serde::Deserialize;
use tracing::debug;

use crate::{
    error::{BitsError, BitsResult, InputError},
    resources::Resource,
    signer::SecureLinkSigner,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    #[default]
    Get,
    Put,
}

impl FromStr for Verb {
    type Err = BitsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "get" => Ok(Verb::Get),
            "put" => Ok(Verb::Put),
            other => Err(InputError::InvalidRequest(format!("unknown verb '{}'", other)).into()),
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verb::Get => write!(f, "get"),
            Verb::Put => write!(f, "put"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UrlSigner {
    signer: SecureLinkSigner,
    public_endpoint: String,
    expiry: Duration,
}

impl UrlSigner {
    pub fn new(signer: SecureLinkSigner, public_endpoint: &str, expiry: Duration) -> Self {
        Self {
            signer,
            public_endpoint: public_endpoint.trim_end_matches('/').to_string(),
            expiry,
        }
    }

    /// Signs access to `key`, the part of the resource URL that follows the
    /// resource name.
    pub async fn signed_url(
        &self,
        resource: Resource,
        key: &str,
        verb: Verb,
        store: &BlobStore,
    ) -> BitsResult<String> {
        debug!(%resource, key, %verb, local = store.is_local(), "signing url");
        if store.is_local() || verb == Verb::Put {
            return self.sign_locally(resource, key, expiry_from_now(self.expiry));
        }

        let store_key = resource.store_key(key)?;
        let blob = store
            .blob(store_key)
            .await?
            .ok_or_else(|| BitsError::NotFound(store_key.to_string()))?;
        Ok(blob.public_download_url().await?)
    }

    /// `<public_endpoint>/signed/<resource>/<key>?md5=<sig>&expires=<t>`.
    pub fn sign_locally(&self, resource: Resource, key: &str, expires: u64) -> BitsResult<String> {
        if !(self.public_endpoint.starts_with("http://")
            || self.public_endpoint.starts_with("https://"))
        {
            return Err(BitsError::Configuration(format!(
                "public endpoint '{}' must start with http:// or https://",
                self.public_endpoint
            )));
        }
        let path = format!("/signed/{}/{}", resource, key);
        let signature = self.signer.sign(&path, expires);
        Ok(format!(
            "{}{}?md5={}&expires={}",
            self.public_endpoint, path, signature, expires
        ))
    }
}
