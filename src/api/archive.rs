// Archive - Archive a session through the HTTP API

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(error: reqwest::Error) -> Self {
        ApiError::Request(error.to_string())
    }
}

/// Archives sessions on the server
#[async_trait]
pub trait ArchiveApi: Send + Sync {
    async fn archive_session(&self, session_id: &str, reason: &str) -> Result<(), ApiError>;
}

#[derive(Serialize)]
struct ArchiveRequest<'a> {
    reason: &'a str,
}

/// reqwest-backed [`ArchiveApi`]
#[derive(Clone, Debug)]
pub struct HttpArchiveClient {
    http: reqwest::Client,
    base_url: Url,
    token: String,
    timeout: Duration,
}

impl HttpArchiveClient {
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self, ApiError> {
        let base_url = Url::parse(base_url).map_err(|e| ApiError::InvalidUrl(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::InvalidUrl(format!("{base_url} cannot be a base")));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            token: token.into(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get the endpoint for archiving a session
    pub fn archive_url(&self, session_id: &str) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["v1", "sessions", session_id, "archive"]);
        Ok(url)
    }
}

#[async_trait]
impl ArchiveApi for HttpArchiveClient {
    async fn archive_session(&self, session_id: &str, reason: &str) -> Result<(), ApiError> {
        let url = self.archive_url(session_id)?;
        debug!(%session_id, "archiving session");

        let response = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .timeout(self.timeout)
            .json(&ArchiveRequest { reason })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        warn!(%session_id, status = status.as_u16(), "archive rejected");
        Err(ApiError::Status {
            status: status.as_u16(),
            body,
        })
    }
}
