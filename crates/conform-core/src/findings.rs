//! Validation findings
//!
//! A finding is one distinct problem seen while validating a topic: an
//! object violating its schema, a malformed schema, or a blob that could not
//! be read. Identical findings are collapsed through a fingerprint over
//! their identifying fields.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;

/// What failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    /// A message does not conform to its schema
    Message,
    /// The schema itself is malformed
    Schema,
    /// A blob could not be downloaded, decompressed or parsed
    Blob,
}

impl FindingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingKind::Message => "message",
            FindingKind::Schema => "schema",
            FindingKind::Blob => "blob",
        }
    }

    /// Kinds that are filed as tickets
    pub fn is_ticketed(&self) -> bool {
        matches!(self, FindingKind::Message | FindingKind::Schema)
    }
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured description of one validation error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Path to the offending value inside the instance
    pub path: Vec<String>,
    /// Path to the failing keyword inside the schema
    pub schema_path: Vec<String>,
    /// Failing keyword, e.g. `required`
    pub validator_name: String,
    /// Value of the failing keyword in the schema
    pub validator_value: Value,
    /// Human-readable message
    pub message: String,
}

impl ErrorDetail {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            path: Vec::new(),
            schema_path: Vec::new(),
            validator_name: String::new(),
            validator_value: Value::Null,
            message: message.into(),
        }
    }

    pub fn with_paths(mut self, path: Vec<String>, schema_path: Vec<String>) -> Self {
        self.path = path;
        self.schema_path = schema_path;
        self
    }

    pub fn with_validator(mut self, name: impl Into<String>, value: Value) -> Self {
        self.validator_name = name.into();
        self.validator_value = value;
        self
    }

    /// Stable one-line rendering used in fingerprints and logs
    pub fn describe(&self) -> String {
        format!(
            "{} (path: /{}, schema path: /{}, validator: {})",
            self.message,
            self.path.join("/"),
            self.schema_path.join("/"),
            self.validator_name
        )
    }
}

/// Error payload of a finding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail", rename_all = "snake_case")]
pub enum FindingError {
    Validation(ErrorDetail),
    Blob(String),
}

impl FindingError {
    pub fn describe(&self) -> String {
        match self {
            FindingError::Validation(detail) => detail.describe(),
            FindingError::Blob(text) => text.clone(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            FindingError::Validation(detail) => &detail.message,
            FindingError::Blob(text) => text,
        }
    }
}

/// Where a finding came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobContext {
    pub schema_tag: String,
    pub topic_name: String,
    pub history_bucket: String,
    pub blob_full_name: String,
}

impl BlobContext {
    pub fn finding(&self, kind: FindingKind, error: FindingError) -> Finding {
        Finding {
            schema_tag: self.schema_tag.clone(),
            topic_name: self.topic_name.clone(),
            history_bucket: self.history_bucket.clone(),
            blob_full_name: self.blob_full_name.clone(),
            kind,
            error,
        }
    }
}

/// One recorded problem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub schema_tag: String,
    pub topic_name: String,
    pub history_bucket: String,
    pub blob_full_name: String,
    pub kind: FindingKind,
    pub error: FindingError,
}

impl Finding {
    /// Hex sha256 over the identifying fields and the error description
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [
            self.schema_tag.as_str(),
            self.topic_name.as_str(),
            self.history_bucket.as_str(),
            self.blob_full_name.as_str(),
            self.kind.as_str(),
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update(self.error.describe().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Fingerprint that ignores the blob, used to recognise the same
    /// error reported again from a later archive
    pub fn error_signature(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [
            self.schema_tag.as_str(),
            self.topic_name.as_str(),
            self.kind.as_str(),
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update(self.error.describe().as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Insertion-ordered findings without duplicates
#[derive(Debug, Clone, Default)]
pub struct FindingSet {
    seen: HashSet<String>,
    findings: Vec<Finding>,
}

impl FindingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a finding, returning false when an identical one is present
    pub fn insert(&mut self, finding: Finding) -> bool {
        if !self.seen.insert(finding.fingerprint()) {
            return false;
        }
        self.findings.push(finding);
        true
    }

    pub fn extend<I: IntoIterator<Item = Finding>>(&mut self, findings: I) -> usize {
        findings
            .into_iter()
            .filter(|finding| self.insert(finding.clone()))
            .count()
    }

    pub fn len(&self) -> usize {
        self.findings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter()
    }

    pub fn count_kind(&self, kind: FindingKind) -> usize {
        self.findings.iter().filter(|f| f.kind == kind).count()
    }

    pub fn into_vec(self) -> Vec<Finding> {
        self.findings
    }
}

impl IntoIterator for FindingSet {
    type Item = Finding;
    type IntoIter = std::vec::IntoIter<Finding>;

    fn into_iter(self) -> Self::IntoIter {
        self.findings.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context(blob: &str) -> BlobContext {
        BlobContext {
            schema_tag: "schemas/orders".to_string(),
            topic_name: "orders".to_string(),
            history_bucket: "orders-history-stg".to_string(),
            blob_full_name: blob.to_string(),
        }
    }

    fn required_detail() -> ErrorDetail {
        ErrorDetail::new("\"id\" is a required property")
            .with_paths(vec![], vec!["required".to_string()])
            .with_validator("required", json!(["id"]))
    }

    #[test]
    fn test_identical_findings_collapse() {
        let mut set = FindingSet::new();
        let ctx = context("2024/01/01/a.xz");

        assert!(set.insert(ctx.finding(
            FindingKind::Message,
            FindingError::Validation(required_detail())
        )));
        assert!(!set.insert(ctx.finding(
            FindingKind::Message,
            FindingError::Validation(required_detail())
        )));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_distinct_blobs_are_kept() {
        let mut set = FindingSet::new();
        let error = FindingError::Validation(required_detail());
        set.insert(context("a.xz").finding(FindingKind::Message, error.clone()));
        set.insert(context("b.xz").finding(FindingKind::Message, error));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_error_signature_ignores_blob() {
        let error = FindingError::Validation(required_detail());
        let a = context("a.xz").finding(FindingKind::Message, error.clone());
        let b = context("b.xz").finding(FindingKind::Message, error);
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.error_signature(), b.error_signature());
    }

    #[test]
    fn test_kind_serialization() {
        assert_eq!(serde_json::to_value(FindingKind::Blob).unwrap(), json!("blob"));
        assert!(FindingKind::Schema.is_ticketed());
        assert!(!FindingKind::Blob.is_ticketed());
    }

    #[test]
    fn test_describe_includes_paths() {
        let detail = ErrorDetail::new("1 is not of type \"string\"")
            .with_paths(
                vec!["items".to_string(), "0".to_string()],
                vec!["properties".to_string(), "items".to_string(), "type".to_string()],
            )
            .with_validator("type", json!("string"));
        let text = detail.describe();
        assert!(text.contains("/items/0"));
        assert!(text.contains("/properties/items/type"));
        assert!(text.ends_with("validator: type)"));
    }

    #[test]
    fn test_count_kind() {
        let mut set = FindingSet::new();
        let ctx = context("a.xz");
        set.insert(ctx.finding(FindingKind::Blob, FindingError::Blob("truncated".into())));
        set.insert(ctx.finding(FindingKind::Message, FindingError::Validation(required_detail())));
        assert_eq!(set.count_kind(FindingKind::Blob), 1);
        assert_eq!(set.count_kind(FindingKind::Schema), 0);
    }
}
