//! Secret retrieval

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use std::sync::Arc;

use super::token::AccessTokenSource;
use super::{endpoint, ensure_success, ClientError, Result, RetryPolicy};

/// Source of secret values
#[async_trait]
pub trait SecretSource: Send + Sync {
    /// Latest version of secret `secret_id` in `project`
    async fn get_secret(&self, project: &str, secret_id: &str) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct AccessResponse {
    payload: SecretPayload,
}

#[derive(Debug, Deserialize)]
struct SecretPayload {
    /// Base64 encoded secret value
    data: String,
}

/// Secret Manager REST client
pub struct SecretManagerClient {
    client: reqwest::Client,
    base_url: String,
    tokens: Arc<AccessTokenSource>,
    retry: RetryPolicy,
}

impl SecretManagerClient {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        tokens: Arc<AccessTokenSource>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            tokens,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn access(&self, project: &str, secret_id: &str) -> Result<String> {
        let url = endpoint(
            &self.base_url,
            &[
                "v1",
                "projects",
                project,
                "secrets",
                secret_id,
                "versions",
                "latest:access",
            ],
        )?;
        let response = self
            .client
            .get(url)
            .bearer_auth(self.tokens.token().await?)
            .send()
            .await?;
        let body: AccessResponse = ensure_success(response).await?.json().await?;

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(body.payload.data.trim())
            .map_err(|e| ClientError::Parse(format!("Secret payload is not base64: {e}")))?;
        String::from_utf8(bytes)
            .map_err(|e| ClientError::Parse(format!("Secret payload is not UTF-8: {e}")))
    }
}

#[async_trait]
impl SecretSource for SecretManagerClient {
    async fn get_secret(&self, project: &str, secret_id: &str) -> Result<String> {
        self.retry
            .run("secret_access", || self.access(project, secret_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> SecretManagerClient {
        SecretManagerClient::new(
            reqwest::Client::new(),
            server.uri(),
            Arc::new(AccessTokenSource::fixed("token")),
        )
        .with_retry(RetryPolicy::none())
    }

    #[tokio::test]
    async fn test_latest_version_is_decoded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/projects/ops/secrets/jira-token/versions/latest:access"))
            .and(header("authorization", "Bearer token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "projects/ops/secrets/jira-token/versions/3",
                "payload": {"data": "czNjcjN0"}
            })))
            .mount(&server)
            .await;

        let secret = client(&server).get_secret("ops", "jira-token").await.unwrap();
        assert_eq!(secret, "s3cr3t");
    }

    #[tokio::test]
    async fn test_denied_access() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_string("denied"))
            .mount(&server)
            .await;

        let err = client(&server).get_secret("ops", "jira-token").await.unwrap_err();
        assert!(matches!(err, ClientError::Auth(_)));
    }

    #[tokio::test]
    async fn test_garbled_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"payload": {"data": "***"}})),
            )
            .mount(&server)
            .await;

        let err = client(&server).get_secret("ops", "jira-token").await.unwrap_err();
        assert!(matches!(err, ClientError::Parse(_)));
    }
}
