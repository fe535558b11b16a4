//! Bearer tokens for the cloud APIs

use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::{ensure_success, ClientError, Result};

/// Token endpoint of the instance metadata server
pub const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Tokens are refreshed this long before they expire
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

enum TokenKind {
    Fixed(String),
    Metadata {
        client: reqwest::Client,
        url: String,
        cache: Mutex<Option<CachedToken>>,
    },
}

/// Source of bearer tokens: a fixed token or the metadata server
pub struct AccessTokenSource {
    kind: TokenKind,
}

impl AccessTokenSource {
    /// Always hand out `token`
    pub fn fixed(token: impl Into<String>) -> Self {
        Self {
            kind: TokenKind::Fixed(token.into()),
        }
    }

    /// Ask the metadata server, caching the token until shortly before expiry
    pub fn metadata_server(client: reqwest::Client) -> Self {
        Self::metadata_at(client, METADATA_TOKEN_URL)
    }

    pub fn metadata_at(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            kind: TokenKind::Metadata {
                client,
                url: url.into(),
                cache: Mutex::new(None),
            },
        }
    }

    /// A valid token
    pub async fn token(&self) -> Result<String> {
        match &self.kind {
            TokenKind::Fixed(token) => Ok(token.clone()),
            TokenKind::Metadata { client, url, cache } => {
                let mut cached = cache.lock().await;
                if let Some(token) = cached.as_ref() {
                    if Instant::now() < token.refresh_at {
                        return Ok(token.value.clone());
                    }
                }

                let response = client
                    .get(url.as_str())
                    .header("Metadata-Flavor", "Google")
                    .send()
                    .await
                    .map_err(|e| ClientError::Auth(format!("Metadata server unreachable: {e}")))?;
                let token: TokenResponse = ensure_success(response).await?.json().await?;

                let lifetime = Duration::from_secs(token.expires_in).saturating_sub(EXPIRY_MARGIN);
                let value = token.access_token;
                *cached = Some(CachedToken {
                    value: value.clone(),
                    refresh_at: Instant::now() + lifetime,
                });
                Ok(value)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fixed_token() {
        let source = AccessTokenSource::fixed("abc");
        assert_eq!(source.token().await.unwrap(), "abc");
    }

    #[tokio::test]
    async fn test_metadata_token_is_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/token"))
            .and(header("Metadata-Flavor", "Google"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "ya29.token",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let source =
            AccessTokenSource::metadata_at(reqwest::Client::new(), format!("{}/token", server.uri()));
        assert_eq!(source.token().await.unwrap(), "ya29.token");
        assert_eq!(source.token().await.unwrap(), "ya29.token");
    }

    #[tokio::test]
    async fn test_metadata_failure_is_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let source =
            AccessTokenSource::metadata_at(reqwest::Client::new(), format!("{}/token", server.uri()));
        assert!(matches!(source.token().await, Err(ClientError::Auth(_))));
    }
}
