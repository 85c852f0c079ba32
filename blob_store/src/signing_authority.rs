//! Delegated URL signing.
//!
//! Some remote backends sit behind an access-control proxy that verifies
//! every request itself, so the signature must be minted by that proxy rather
//! than by this process. The proxy exposes two endpoints on its internal
//! address, `/sign` for downloads and `/sign_for_put` for uploads, protected
//! with basic auth. Both take `expires` and `path` query parameters and answer
//! with a pre-signed URI, whose scheme and authority are then rewritten onto
//! the configured public or internal base URI.

use reqwest::StatusCode;
use tracing::debug;
use url::Url;

use crate::{BlobError, BlobResult};

/// What the signed URL will be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningIntent {
    Download,
    Upload,
}

impl SigningIntent {
    fn endpoint(&self) -> &'static str {
        match self {
            SigningIntent::Download => "/sign",
            SigningIntent::Upload => "/sign_for_put",
        }
    }
}

/// Which network the signed URL is handed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Components inside the platform network.
    Internal,
    /// Clients outside the platform.
    Public,
}

#[derive(Clone, Debug)]
pub struct SigningAuthority {
    client: reqwest::Client,
    internal_uri: Url,
    public_uri: Url,
    username: String,
    password: String,
}

impl SigningAuthority {
    pub fn new(
        internal_endpoint: &str,
        public_endpoint: &str,
        username: &str,
        password: &str,
        client: reqwest::Client,
    ) -> BlobResult<Self> {
        Ok(Self {
            client,
            internal_uri: internal_endpoint.parse()?,
            public_uri: public_endpoint.parse()?,
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    /// Asks the authority to sign `path` until `expires` (seconds since the
    /// epoch).
    pub async fn sign(
        &self,
        path: &str,
        expires: u64,
        intent: SigningIntent,
        audience: Audience,
    ) -> BlobResult<String> {
        let request_uri = self.request_uri(path, expires, intent);
        debug!(uri = %request_uri, "requesting signed url");

        let response = self
            .client
            .get(request_uri)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if status != StatusCode::OK {
            return Err(BlobError::SigningRequest {
                status: status.as_u16(),
                body,
            });
        }

        let signed = self.internal_uri.join(body.trim())?;
        let mut rewritten = match audience {
            Audience::Internal => self.internal_uri.clone(),
            Audience::Public => self.public_uri.clone(),
        };
        rewritten.set_path(signed.path());
        rewritten.set_query(signed.query());
        Ok(rewritten.to_string())
    }

    fn request_uri(&self, path: &str, expires: u64, intent: SigningIntent) -> Url {
        let mut uri = self.internal_uri.clone();
        uri.set_path(intent.endpoint());
        uri.query_pairs_mut()
            .clear()
            .append_pair("expires", &expires.to_string())
            .append_pair("path", &format!("/{}", path.trim_start_matches('/')));
        uri
    }
}
