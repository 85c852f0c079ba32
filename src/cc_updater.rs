//! Reports package upload state to the Cloud Controller.
//!
//! Each transition is a `PATCH <cc_url>/packages/<guid>` over mutual TLS with
//! a JSON body such as
//! `{"state":"READY","checksums":[{"type":"sha1","value":"..."}]}`.
//! Transitions are only ever sent forward and the remote state is never read
//! back; ordering is enforced by the Cloud Controller.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::{Certificate, Identity, StatusCode};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::CcUpdatesConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum StateSyncError {
    #[error("{0}")]
    ResourceNotFound(String),

    #[error("{0}")]
    UpdateConflict(String),

    #[error("Unexpected response with code {status} from CC: {body}")]
    Unexpected { status: u16, body: String },

    #[error("CC request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UploadState {
    ProcessingUpload,
    Ready,
    Failed,
}

/// Hex digests of a stored package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Checksums {
    pub sha1: Option<String>,
    pub sha256: Option<String>,
}

#[derive(Debug, Serialize)]
struct Checksum<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    value: &'a str,
}

#[derive(Debug, Serialize)]
struct StateUpdate<'a> {
    state: UploadState,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    checksums: Vec<Checksum<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

impl<'a> StateUpdate<'a> {
    fn new(state: UploadState, checksums: Option<&'a Checksums>, error: Option<&'a str>) -> Self {
        let mut entries = Vec::new();
        if let Some(checksums) = checksums {
            if let Some(sha1) = &checksums.sha1 {
                entries.push(Checksum {
                    kind: "sha1",
                    value: sha1,
                });
            }
            if let Some(sha256) = &checksums.sha256 {
                entries.push(Checksum {
                    kind: "sha256",
                    value: sha256,
                });
            }
        }
        Self {
            state,
            checksums: entries,
            error,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CcClient {
    base_url: String,
    collection: String,
    client: reqwest::Client,
}

impl CcClient {
    pub fn new(base_url: &str, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            collection: "packages".to_string(),
            client,
        }
    }

    async fn update(&self, guid: &str, update: &StateUpdate<'_>) -> Result<(), StateSyncError> {
        let url = format!("{}/{}/{}", self.base_url, self.collection, guid);
        debug!(guid, state = ?update.state, "updating cloud controller");
        let response = self.client.patch(&url).json(update).send().await?;

        let status = response.status();
        match status {
            StatusCode::NO_CONTENT => Ok(()),
            StatusCode::NOT_FOUND => Err(StateSyncError::ResourceNotFound(response.text().await?)),
            StatusCode::UNPROCESSABLE_ENTITY => {
                Err(StateSyncError::UpdateConflict(response.text().await?))
            }
            _ => Err(StateSyncError::Unexpected {
                status: status.as_u16(),
                body: response.text().await?,
            }),
        }
    }
}

/// State synchronizer; a no-op when no Cloud Controller is configured.
#[derive(Debug, Clone)]
pub enum CcUpdater {
    Disabled,
    Enabled(CcClient),
}

impl CcUpdater {
    pub fn from_config(config: Option<&CcUpdatesConfig>) -> Result<Self> {
        let Some(config) = config else {
            info!("cc updates not configured, upload state will not be reported");
            return Ok(CcUpdater::Disabled);
        };
        let client = mtls_client(config)?;
        info!(cc_url = %config.cc_url, "reporting upload state to cloud controller");
        Ok(CcUpdater::Enabled(CcClient::new(&config.cc_url, client)))
    }

    pub async fn processing_upload(&self, guid: &str) -> Result<(), StateSyncError> {
        self.send(guid, StateUpdate::new(UploadState::ProcessingUpload, None, None))
            .await
    }

    pub async fn ready(&self, guid: &str, checksums: &Checksums) -> Result<(), StateSyncError> {
        self.send(guid, StateUpdate::new(UploadState::Ready, Some(checksums), None))
            .await
    }

    pub async fn failed(&self, guid: &str, error: &str) -> Result<(), StateSyncError> {
        self.send(guid, StateUpdate::new(UploadState::Failed, None, Some(error)))
            .await
    }

    async fn send(&self, guid: &str, update: StateUpdate<'_>) -> Result<(), StateSyncError> {
        match self {
            CcUpdater::Disabled => Ok(()),
            CcUpdater::Enabled(client) => client.update(guid, &update).await,
        }
    }
}

/// Builds an HTTP client that trusts only the configured CA and presents the
/// configured client certificate.
pub fn mtls_client(config: &CcUpdatesConfig) -> Result<reqwest::Client> {
    for (name, path) in [
        ("ca cert", &config.ca_cert),
        ("client cert", &config.client_cert),
        ("client key", &config.client_key),
    ] {
        if path.as_os_str().is_empty() {
            return Err(anyhow!("Missing {} for CC updates", name));
        }
    }

    let ca_cert = std::fs::read(&config.ca_cert).context("Failed to read CA certificate")?;
    let mut identity_pem =
        std::fs::read(&config.client_cert).context("Failed to read client certificate")?;
    identity_pem.push(b'\n');
    identity_pem
        .extend(std::fs::read(&config.client_key).context("Failed to read client key")?);

    let client = reqwest::Client::builder()
        .tls_built_in_root_certs(false)
        .add_root_certificate(Certificate::from_pem(&ca_cert).context("Invalid CA certificate")?)
        .identity(Identity::from_pem(&identity_pem).context("Invalid client certificate or key")?)
        .timeout(REQUEST_TIMEOUT)
        .build()?;
    Ok(client)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        path::PathBuf,
        sync::{Arc, Mutex},
    };

    use axum::{
        extract::{Path, State},
        http::StatusCode,
        routing::patch,
        Json,
        Router,
    };
    use serde_json::{json, Value};

    use super::*;

    /// A stand-in Cloud Controller recording every PATCH it receives.
    #[derive(Clone)]
    pub(crate) struct StubCc {
        pub url: String,
        pub requests: Arc<Mutex<Vec<(String, Value)>>>,
    }

    impl StubCc {
        pub(crate) fn updater(&self) -> CcUpdater {
            CcUpdater::Enabled(CcClient::new(&self.url, reqwest::Client::new()))
        }

        pub(crate) fn states(&self) -> Vec<String> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .map(|(_, body)| body["state"].as_str().unwrap_or_default().to_string())
                .collect()
        }
    }

    /// Answers every request with `status`, or with `status_for(state)` when
    /// provided.
    pub(crate) async fn start_stub_cc(
        status_for: impl Fn(&str) -> StatusCode + Clone + Send + Sync + 'static,
    ) -> StubCc {
        let requests: Arc<Mutex<Vec<(String, Value)>>> = Arc::default();
        let app = Router::new()
            .route(
                "/packages/{guid}",
                patch(
                    move |State(requests): State<Arc<Mutex<Vec<(String, Value)>>>>,
                          Path(guid): Path<String>,
                          Json(body): Json<Value>| {
                        let status_for = status_for.clone();
                        async move {
                            let state = body["state"].as_str().unwrap_or_default().to_string();
                            requests.lock().unwrap().push((guid, body));
                            let status = status_for(&state);
                            (status, format!("cc says {}", status.as_u16()))
                        }
                    },
                ),
            )
            .with_state(requests.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        StubCc {
            url: format!("http://{}", addr),
            requests,
        }
    }

    #[test]
    fn test_body_shapes() {
        let body = serde_json::to_value(StateUpdate::new(UploadState::ProcessingUpload, None, None))
            .unwrap();
        assert_eq!(body, json!({"state": "PROCESSING_UPLOAD"}));

        let checksums = Checksums {
            sha1: Some("abc".to_string()),
            sha256: Some("def".to_string()),
        };
        let body =
            serde_json::to_value(StateUpdate::new(UploadState::Ready, Some(&checksums), None))
                .unwrap();
        assert_eq!(
            body,
            json!({
                "state": "READY",
                "checksums": [
                    {"type": "sha1", "value": "abc"},
                    {"type": "sha256", "value": "def"},
                ]
            })
        );

        let body = serde_json::to_value(StateUpdate::new(
            UploadState::Ready,
            Some(&Checksums::default()),
            None,
        ))
        .unwrap();
        assert_eq!(body, json!({"state": "READY"}));

        let body = serde_json::to_value(StateUpdate::new(
            UploadState::Failed,
            None,
            Some("No space left on device"),
        ))
        .unwrap();
        assert_eq!(
            body,
            json!({"state": "FAILED", "error": "No space left on device"})
        );
    }

    #[tokio::test]
    async fn test_successful_transitions() {
        let cc = start_stub_cc(|_| StatusCode::NO_CONTENT).await;
        let updater = cc.updater();

        updater.processing_upload("abc").await.unwrap();
        updater
            .ready(
                "abc",
                &Checksums {
                    sha1: Some("1".to_string()),
                    sha256: None,
                },
            )
            .await
            .unwrap();
        // Ordering is the Cloud Controller's business.
        updater.failed("abc", "late failure").await.unwrap();

        let requests = cc.requests.lock().unwrap();
        assert_eq!(requests.len(), 3);
        assert!(requests.iter().all(|(guid, _)| guid == "abc"));
        assert_eq!(
            requests[1].1,
            json!({"state": "READY", "checksums": [{"type": "sha1", "value": "1"}]})
        );
        assert_eq!(requests[2].1["error"], "late failure");
    }

    #[tokio::test]
    async fn test_error_mapping() {
        let cc = start_stub_cc(|state| match state {
            "PROCESSING_UPLOAD" => StatusCode::NOT_FOUND,
            "READY" => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        })
        .await;
        let updater = cc.updater();

        match updater.processing_upload("abc").await {
            Err(StateSyncError::ResourceNotFound(body)) => assert_eq!(body, "cc says 404"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(matches!(
            updater.ready("abc", &Checksums::default()).await,
            Err(StateSyncError::UpdateConflict(_))
        ));
        match updater.failed("abc", "boom").await {
            Err(err @ StateSyncError::Unexpected { status: 500, .. }) => assert_eq!(
                err.to_string(),
                "Unexpected response with code 500 from CC: cc says 500"
            ),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_disabled_updater_is_a_no_op() {
        let updater = CcUpdater::from_config(None).unwrap();
        assert!(matches!(updater, CcUpdater::Disabled));
        updater.processing_upload("abc").await.unwrap();
        updater.ready("abc", &Checksums::default()).await.unwrap();
        updater.failed("abc", "boom").await.unwrap();
    }

    #[test]
    fn test_mtls_requires_all_material() {
        let config = CcUpdatesConfig {
            cc_url: "https://cc.internal:9023".to_string(),
            ca_cert: PathBuf::from("/tmp/ca.crt"),
            client_cert: PathBuf::new(),
            client_key: PathBuf::from("/tmp/client.key"),
        };
        let err = mtls_client(&config).unwrap_err();
        assert_eq!(err.to_string(), "Missing client cert for CC updates");

        let config = CcUpdatesConfig {
            client_cert: PathBuf::from("/does/not/exist.crt"),
            ..config
        };
        assert!(CcUpdater::from_config(Some(&config)).is_err());
    }
}
