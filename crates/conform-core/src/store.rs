//! Storage collaborators
//!
//! The core never talks to a cloud SDK. Blob listing, downloads and schema
//! lookups go through the traits in this module; the agent provides HTTP
//! implementations and tests use [`InMemoryBlobStore`].

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;

use crate::decompress::{ChunkSource, MemoryChunks};

/// Storage access errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Storage service returned {status}: {message}")]
    Service { status: u16, message: String },

    #[error("Invalid payload: {0}")]
    Payload(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A listed blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobHandle {
    pub container: String,
    pub name: String,
    pub content_type: Option<String>,
    pub size: u64,
}

impl BlobHandle {
    pub fn new(container: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            name: name.into(),
            content_type: None,
            size: 0,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn is_content_type(&self, expected: &str) -> bool {
        self.content_type.as_deref() == Some(expected)
    }
}

/// Object storage
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Blobs in `container` whose name starts with `prefix`, in listing order
    async fn list_blobs(&self, container: &str, prefix: &str) -> StoreResult<Vec<BlobHandle>>;

    /// Whole object, `None` when it does not exist
    async fn get(&self, container: &str, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Whole object, failing when it does not exist
    async fn download(&self, blob: &BlobHandle) -> StoreResult<Vec<u8>> {
        self.get(&blob.container, &blob.name)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("{}/{}", blob.container, blob.name)))
    }

    /// Ranged read session over one object, valid for `expires_in`
    async fn open_chunks(
        &self,
        blob: &BlobHandle,
        chunk_size: usize,
        expires_in: Duration,
    ) -> StoreResult<Box<dyn ChunkSource>>;
}

/// Lookup of schema documents by tag or URI
#[async_trait]
pub trait SchemaSource: Send + Sync {
    async fn fetch_schema(&self, tag: &str) -> StoreResult<Option<Value>>;
}

/// Blob name a schema tag is stored under
///
/// `/` becomes `_` and `.json` is appended unless already present.
pub fn schema_blob_name(tag: &str) -> String {
    let name = tag.replace('/', "_");
    if name.ends_with(".json") {
        name
    } else {
        format!("{name}.json")
    }
}

fn parse_schema(name: &str, bytes: &[u8]) -> StoreResult<Value> {
    serde_json::from_slice(bytes)
        .map_err(|e| StoreError::Payload(format!("schema {name} is not valid JSON: {e}")))
}

/// Schemas stored as JSON blobs in one bucket
pub struct BucketSchemaSource {
    store: Arc<dyn BlobStore>,
    bucket: String,
}

impl BucketSchemaSource {
    pub fn new(store: Arc<dyn BlobStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl SchemaSource for BucketSchemaSource {
    async fn fetch_schema(&self, tag: &str) -> StoreResult<Option<Value>> {
        let name = schema_blob_name(tag);
        match self.store.get(&self.bucket, &name).await? {
            Some(bytes) => parse_schema(&name, &bytes).map(Some),
            None => Ok(None),
        }
    }
}

/// Schemas stored as files in one directory
pub struct DirSchemaSource {
    root: PathBuf,
}

impl DirSchemaSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl SchemaSource for DirSchemaSource {
    async fn fetch_schema(&self, tag: &str) -> StoreResult<Option<Value>> {
        let name = schema_blob_name(tag);
        let path = self.root.join(&name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => parse_schema(&name, &bytes).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Connection(format!("{}: {e}", path.display()))),
        }
    }
}

#[derive(Debug, Clone)]
struct StoredBlob {
    content_type: Option<String>,
    data: Vec<u8>,
}

/// Blob store held in memory
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    containers: RwLock<BTreeMap<String, BTreeMap<String, StoredBlob>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object, replacing any previous one with the same name
    pub fn insert(
        &self,
        container: &str,
        name: &str,
        content_type: Option<&str>,
        data: impl Into<Vec<u8>>,
    ) {
        let mut containers = match self.containers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        containers.entry(container.to_string()).or_default().insert(
            name.to_string(),
            StoredBlob {
                content_type: content_type.map(str::to_string),
                data: data.into(),
            },
        );
    }

    fn lookup(&self, container: &str, name: &str) -> Option<StoredBlob> {
        let containers = match self.containers.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        containers
            .get(container)
            .and_then(|blobs| blobs.get(name))
            .cloned()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn list_blobs(&self, container: &str, prefix: &str) -> StoreResult<Vec<BlobHandle>> {
        let containers = match self.containers.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let blobs = containers
            .get(container)
            .ok_or_else(|| StoreError::NotFound(container.to_string()))?;
        Ok(blobs
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, blob)| BlobHandle {
                container: container.to_string(),
                name: name.clone(),
                content_type: blob.content_type.clone(),
                size: blob.data.len() as u64,
            })
            .collect())
    }

    async fn get(&self, container: &str, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.lookup(container, key).map(|blob| blob.data))
    }

    async fn open_chunks(
        &self,
        blob: &BlobHandle,
        chunk_size: usize,
        _expires_in: Duration,
    ) -> StoreResult<Box<dyn ChunkSource>> {
        let stored = self
            .lookup(&blob.container, &blob.name)
            .ok_or_else(|| StoreError::NotFound(format!("{}/{}", blob.container, blob.name)))?;
        Ok(Box::new(MemoryChunks::new(stored.data, chunk_size)))
    }
}
