//! Data catalog discovery
//!
//! A catalog lists datasets and their distributions. Every distribution of
//! format `topic` that names a schema (`describedBy` together with
//! `describedByType`) yields one topic-schema binding.

use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

use conform_core::processor::TopicSchemaBinding;
use conform_core::store::BlobStore;

const UNKNOWN_TOPIC: &str = "unknown";

/// Topic-schema bindings declared by one catalog document
pub fn discover_bindings(catalog: &Value) -> Vec<TopicSchemaBinding> {
    let datasets = catalog
        .get("dataset")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    datasets
        .iter()
        .filter_map(|dataset| dataset.get("distribution").and_then(Value::as_array))
        .flatten()
        .filter(|dist| dist.get("format").and_then(Value::as_str) == Some("topic"))
        .filter(|dist| dist.get("describedByType").is_some())
        .filter_map(|dist| {
            let schema_tag = dist.get("describedBy")?.as_str()?;
            let topic_name = dist
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or(UNKNOWN_TOPIC);
            Some(TopicSchemaBinding::new(schema_tag, topic_name))
        })
        .collect()
}

/// Reads every catalog document of a bucket
pub struct CatalogScanner {
    store: Arc<dyn BlobStore>,
    bucket: String,
}

impl CatalogScanner {
    pub fn new(store: Arc<dyn BlobStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    /// Bindings of all catalogs, in listing order, without duplicates
    ///
    /// Unreadable catalogs are logged and skipped.
    pub async fn scan(&self) -> Vec<TopicSchemaBinding> {
        let blobs = match self.store.list_blobs(&self.bucket, "").await {
            Ok(blobs) => blobs,
            Err(e) => {
                tracing::error!(bucket = %self.bucket, error = %e, "Could not list data catalogs");
                return Vec::new();
            }
        };

        let mut seen = HashSet::new();
        let mut bindings = Vec::new();
        for blob in &blobs {
            let catalog = match self.store.download(blob).await {
                Ok(bytes) => serde_json::from_slice::<Value>(&bytes),
                Err(e) => {
                    tracing::warn!(catalog = %blob.name, error = %e, "Could not download data catalog");
                    continue;
                }
            };
            match catalog {
                Ok(catalog) => {
                    for binding in discover_bindings(&catalog) {
                        if seen.insert(binding.clone()) {
                            bindings.push(binding);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(catalog = %blob.name, error = %e, "Data catalog is not valid JSON");
                }
            }
        }

        tracing::info!(
            catalogs = blobs.len(),
            topics = bindings.len(),
            "Discovered topics with a schema"
        );
        bindings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conform_core::store::InMemoryBlobStore;
    use serde_json::json;

    fn catalog() -> Value {
        json!({
            "projectId": "sales",
            "dataset": [
                {
                    "identifier": "orders",
                    "distribution": [
                        {
                            "format": "topic",
                            "title": "orders-topic",
                            "describedBy": "schemas/orders",
                            "describedByType": "application/schema+json"
                        },
                        {
                            "format": "blob-storage",
                            "title": "orders-archive",
                            "describedBy": "schemas/orders",
                            "describedByType": "application/schema+json"
                        },
                        {"format": "topic", "title": "no-schema"},
                        {"format": "topic", "title": "no-type", "describedBy": "schemas/x"}
                    ]
                },
                {
                    "identifier": "untitled",
                    "distribution": [
                        {
                            "format": "topic",
                            "describedBy": "schemas/anon",
                            "describedByType": "application/schema+json"
                        }
                    ]
                },
                {"identifier": "empty"}
            ]
        })
    }

    #[test]
    fn test_discover_bindings() {
        let bindings = discover_bindings(&catalog());
        assert_eq!(
            bindings,
            vec![
                TopicSchemaBinding::new("schemas/orders", "orders-topic"),
                TopicSchemaBinding::new("schemas/anon", "unknown"),
            ]
        );
    }

    #[test]
    fn test_catalog_without_datasets() {
        assert!(discover_bindings(&json!({"projectId": "x"})).is_empty());
        assert!(discover_bindings(&json!([])).is_empty());
    }

    #[tokio::test]
    async fn test_scan_skips_broken_catalogs_and_duplicates() {
        let store = Arc::new(InMemoryBlobStore::new());
        store.insert("catalogs", "a.json", None, catalog().to_string());
        store.insert("catalogs", "b.json", None, catalog().to_string());
        store.insert("catalogs", "c.json", None, b"{broken".to_vec());

        let bindings = CatalogScanner::new(store, "catalogs").scan().await;
        assert_eq!(bindings.len(), 2);
    }

    #[tokio::test]
    async fn test_scan_missing_bucket_yields_nothing() {
        let store = Arc::new(InMemoryBlobStore::new());
        assert!(CatalogScanner::new(store, "catalogs").scan().await.is_empty());
    }
}
