//! HTTP clients for the cloud services the agent depends on
//!
//! - [`gcs`] object storage (listing, downloads, ranged reads)
//! - [`secrets`] secret retrieval
//! - [`jira`] issue tracker
//! - [`pubsub`] issue publishing
//! - [`token`] bearer tokens for the cloud APIs

pub mod gcs;
pub mod jira;
pub mod pubsub;
pub mod secrets;
pub mod token;

pub use gcs::{GcsBlobStore, GcsChunkSource};
pub use jira::JiraClient;
pub use pubsub::PubSubPublisher;
pub use secrets::{SecretManagerClient, SecretSource};
pub use token::AccessTokenSource;

use reqwest::{Response, StatusCode};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Client errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Authentication error: {0}")]
    Auth(String),
}

impl ClientError {
    /// Connection failures are worth another attempt
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Network(_))
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::Parse(err.to_string())
        } else {
            ClientError::Network(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Attempts with exponential backoff
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,

    /// Delay before the second attempt
    pub initial_backoff: Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_secs(2),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A single attempt
    pub fn none() -> Self {
        Self {
            attempts: 1,
            ..Self::default()
        }
    }

    /// Run `call` until it succeeds, fails permanently or runs out of attempts
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = self.initial_backoff;
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.attempts => {
                    tracing::warn!(
                        operation = operation,
                        attempt = attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Retrying request"
                    );
                    sleep(backoff).await;
                    backoff = backoff.mul_f64(self.backoff_multiplier);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Build the shared HTTP client
pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| ClientError::Network(format!("Failed to create HTTP client: {e}")))
}

/// Turn non-success responses into errors
pub(crate) async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ClientError::Auth(format!(
            "{}: {}",
            status.as_u16(),
            message
        ))),
        _ => Err(ClientError::Server {
            status: status.as_u16(),
            message,
        }),
    }
}

/// Build `base/segment/...` with every segment percent-encoded
pub(crate) fn endpoint(base: &str, segments: &[&str]) -> Result<reqwest::Url> {
    let mut url = reqwest::Url::parse(base)
        .map_err(|e| ClientError::Parse(format!("Invalid base URL {base}: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| ClientError::Parse(format!("Base URL {base} cannot carry a path")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
