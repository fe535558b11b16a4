//! Topic publishing over the Pub/Sub REST API

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use super::token::AccessTokenSource;
use super::{ensure_success, ClientError, Result, RetryPolicy};
use crate::publish::EventPublisher;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

/// Publisher for fully qualified topics (`projects/{p}/topics/{t}`)
pub struct PubSubPublisher {
    client: reqwest::Client,
    base_url: String,
    tokens: Arc<AccessTokenSource>,
    retry: RetryPolicy,
}

impl PubSubPublisher {
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

    async fn publish_once(&self, url: &str, body: &serde_json::Value) -> Result<String> {
        let response = self
            .client
            .post(url)
            .bearer_auth(self.tokens.token().await?)
            .json(body)
            .send()
            .await?;
        let published: PublishResponse = ensure_success(response).await?.json().await?;
        published
            .message_ids
            .into_iter()
            .next()
            .ok_or_else(|| ClientError::Parse("Publish response carries no message id".to_string()))
    }
}

#[async_trait]
impl EventPublisher for PubSubPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<String> {
        // The topic path keeps its slashes, the `:publish` verb is appended
        let url = format!(
            "{}/v1/{}:publish",
            self.base_url.trim_end_matches('/'),
            topic.trim_start_matches('/')
        );
        let body = json!({
            "messages": [{
                "data": base64::engine::general_purpose::STANDARD.encode(payload)
            }]
        });
        self.retry
            .run("pubsub_publish", || self.publish_once(&url, &body))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn publisher(server: &MockServer) -> PubSubPublisher {
        PubSubPublisher::new(
            reqwest::Client::new(),
            server.uri(),
            Arc::new(AccessTokenSource::fixed("token")),
        )
        .with_retry(RetryPolicy::none())
    }

    #[tokio::test]
    async fn test_publish_encodes_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/projects/ops/topics/issues:publish"))
            .and(header("authorization", "Bearer token"))
            .and(body_json(json!({"messages": [{"data": "eyJhIjoxfQ=="}]})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"messageIds": ["1234"]})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let id = publisher(&server)
            .publish("projects/ops/topics/issues", br#"{"a":1}"#.to_vec())
            .await
            .unwrap();
        assert_eq!(id, "1234");
    }

    #[tokio::test]
    async fn test_rejected_publish() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_string("topic not found"))
            .mount(&server)
            .await;

        let err = publisher(&server)
            .publish("projects/ops/topics/missing", b"{}".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Server { status: 404, .. }));
    }
}
