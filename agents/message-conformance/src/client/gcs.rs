//! Object storage over the JSON API
//!
//! Listing pages through `nextPageToken`, downloads use `alt=media`, and
//! archives are read in ranged requests so one blob never has to fit in
//! memory.

use async_trait::async_trait;
use reqwest::header::{CONTENT_RANGE, RANGE};
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use conform_core::decompress::ChunkSource;
use conform_core::store::{BlobHandle, BlobStore, StoreError, StoreResult};

use super::token::AccessTokenSource;
use super::{endpoint, ensure_success, ClientError};

impl From<ClientError> for StoreError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Network(message) | ClientError::Auth(message) => {
                StoreError::Connection(message)
            }
            ClientError::Parse(message) => StoreError::Payload(message),
            ClientError::Server { status, message } => StoreError::Service { status, message },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectList {
    #[serde(default)]
    items: Vec<ObjectResource>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectResource {
    name: String,
    content_type: Option<String>,
    /// Decimal string in the JSON API
    size: Option<String>,
}

/// Blob store backed by the storage JSON API
#[derive(Clone)]
pub struct GcsBlobStore {
    client: reqwest::Client,
    base_url: String,
    tokens: Arc<AccessTokenSource>,
}

impl GcsBlobStore {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        tokens: Arc<AccessTokenSource>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            tokens,
        }
    }

    fn object_url(&self, container: &str, name: &str) -> Result<reqwest::Url, ClientError> {
        endpoint(
            &self.base_url,
            &["storage", "v1", "b", container, "o", name],
        )
    }

    async fn list_page(
        &self,
        container: &str,
        prefix: &str,
        page_token: Option<&str>,
    ) -> Result<ObjectList, ClientError> {
        let url = endpoint(&self.base_url, &["storage", "v1", "b", container, "o"])?;
        let mut query = vec![("prefix", prefix)];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }

        let response = self
            .client
            .get(url)
            .query(&query)
            .bearer_auth(self.tokens.token().await?)
            .send()
            .await?;
        Ok(ensure_success(response).await?.json().await?)
    }
}

#[async_trait]
impl BlobStore for GcsBlobStore {
    async fn list_blobs(&self, container: &str, prefix: &str) -> StoreResult<Vec<BlobHandle>> {
        let mut blobs = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = match self.list_page(container, prefix, page_token.as_deref()).await {
                Err(ClientError::Server { status: 404, .. }) => {
                    return Err(StoreError::NotFound(container.to_string()))
                }
                other => other?,
            };

            blobs.extend(page.items.into_iter().map(|item| BlobHandle {
                container: container.to_string(),
                size: item.size.and_then(|s| s.parse().ok()).unwrap_or(0),
                content_type: item.content_type,
                name: item.name,
            }));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(blobs)
    }

    async fn get(&self, container: &str, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let url = self.object_url(container, key)?;
        let response = self
            .client
            .get(url)
            .query(&[("alt", "media")])
            .bearer_auth(self.tokens.token().await?)
            .send()
            .await
            .map_err(ClientError::from)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let bytes = ensure_success(response)
            .await?
            .bytes()
            .await
            .map_err(ClientError::from)?;
        Ok(Some(bytes.to_vec()))
    }

    async fn open_chunks(
        &self,
        blob: &BlobHandle,
        chunk_size: usize,
        expires_in: Duration,
    ) -> StoreResult<Box<dyn ChunkSource>> {
        let url = self.object_url(&blob.container, &blob.name)?;
        Ok(Box::new(GcsChunkSource {
            client: self.client.clone(),
            url,
            tokens: self.tokens.clone(),
            chunk_size: chunk_size.max(1) as u64,
            offset: 0,
            total: None,
            expires_at: Instant::now().checked_add(expires_in),
            finished: false,
        }))
    }
}

/// Ranged read session over one object
pub struct GcsChunkSource {
    client: reqwest::Client,
    url: reqwest::Url,
    tokens: Arc<AccessTokenSource>,
    chunk_size: u64,
    offset: u64,
    total: Option<u64>,
    expires_at: Option<Instant>,
    finished: bool,
}

impl GcsChunkSource {
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

/// Total size from a `bytes start-end/total` header
fn total_from_content_range(value: &str) -> Option<u64> {
    value.rsplit_once('/')?.1.trim().parse().ok()
}

#[async_trait]
impl ChunkSource for GcsChunkSource {
    async fn next_chunk(&mut self) -> StoreResult<Option<Vec<u8>>> {
        if self.finished {
            return Ok(None);
        }
        if self.total.is_some_and(|total| self.offset >= total) {
            self.finished = true;
            return Ok(None);
        }
        if self.expires_at.is_some_and(|at| Instant::now() >= at) {
            return Err(StoreError::Connection(format!(
                "read session for {} expired at offset {}",
                self.url, self.offset
            )));
        }

        let last = self.offset + self.chunk_size - 1;
        let response = self
            .client
            .get(self.url.clone())
            .query(&[("alt", "media")])
            .header(RANGE, format!("bytes={}-{}", self.offset, last))
            .bearer_auth(self.tokens.token().await?)
            .send()
            .await
            .map_err(ClientError::from)?;

        match response.status() {
            StatusCode::RANGE_NOT_SATISFIABLE => {
                self.finished = true;
                return Ok(None);
            }
            StatusCode::PARTIAL_CONTENT => {
                self.total = response
                    .headers()
                    .get(CONTENT_RANGE)
                    .and_then(|value| value.to_str().ok())
                    .and_then(total_from_content_range);
            }
            StatusCode::OK => {
                // Range ignored, the whole object arrived at once
                self.finished = true;
            }
            _ => {}
        }

        let bytes = ensure_success(response)
            .await?
            .bytes()
            .await
            .map_err(ClientError::from)?;
        if bytes.is_empty() {
            self.finished = true;
            return Ok(None);
        }
        self.offset += bytes.len() as u64;
        Ok(Some(bytes.to_vec()))
    }
}
