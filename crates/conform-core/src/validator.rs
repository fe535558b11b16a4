//! Schema validation of messages and archives
//!
//! [`MessageValidator`] checks single objects against a resolved schema and
//! turns every error into a structured [`ErrorDetail`]. [`BlobValidator`]
//! drives one archive through decompression, splitting and validation while
//! polling the topic budget.

use serde_json::Value;
use std::collections::HashSet;

use crate::budget::{BudgetProbe, TopicBudget};
use crate::decompress::{DecompressedStream, DEFAULT_CHUNK_SIZE, XZ_CONTENT_TYPE};
use crate::error::{DecompressionError, ValidationFailure};
use crate::findings::{BlobContext, ErrorDetail, FindingError, FindingKind, FindingSet};
use crate::splitter::{parse_candidates, parse_dirty_json, split};
use crate::store::{BlobHandle, BlobStore};

/// Largest unparsed text carried between chunks
pub const MAX_CARRY_OVER: usize = 16 * 1024 * 1024;

const SCHEMA_KEY: &str = "$schema";
const KNOWN_DIALECTS: &str = "json-schema.org/";

/// Compiled schema for validating single objects
pub struct MessageValidator {
    schema: Value,
    compiled: Result<jsonschema::Validator, ErrorDetail>,
}

impl MessageValidator {
    /// Compile `schema`
    ///
    /// A schema that does not compile is kept: every validation then
    /// reports it as a structural failure.
    pub fn new(schema: Value) -> Self {
        let schema = without_foreign_dialect(schema);
        let compiled = jsonschema::validator_for(&schema).map_err(|error| {
            ErrorDetail::new(error.to_string())
                .with_paths(
                    pointer_segments(&error.instance_path.to_string()),
                    pointer_segments(&error.schema_path.to_string()),
                )
                .with_validator(last_segment(&error.schema_path.to_string()), Value::Null)
        });

        if let Err(detail) = &compiled {
            tracing::warn!(error = %detail.message, "Schema does not compile");
        }

        Self { schema, compiled }
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled.is_ok()
    }

    /// Every distinct reason `instance` does not conform
    pub fn validate(&self, instance: &Value) -> Vec<ValidationFailure> {
        let validator = match &self.compiled {
            Ok(validator) => validator,
            Err(detail) => return vec![ValidationFailure::SchemaStructural(detail.clone())],
        };

        let mut seen = HashSet::new();
        let mut failures = Vec::new();
        for error in validator.iter_errors(instance) {
            let detail = self.detail(&error);
            if seen.insert(detail.describe()) {
                failures.push(ValidationFailure::SchemaValidation(detail));
            }
        }
        failures
    }

    fn detail(&self, error: &jsonschema::ValidationError<'_>) -> ErrorDetail {
        let schema_path = error.schema_path.to_string();
        let schema_segments = pointer_segments(&schema_path);
        let validator_value = schema_node(&self.schema, &schema_segments)
            .cloned()
            .unwrap_or(Value::Null);
        let instance = format!("{} ", error.instance);
        let message = error.to_string().replace(&instance, "");

        ErrorDetail::new(message)
            .with_paths(
                pointer_segments(&error.instance_path.to_string()),
                schema_segments,
            )
            .with_validator(last_segment(&schema_path), validator_value)
    }
}

/// Drop a `$schema` that the validator cannot map to a draft
fn without_foreign_dialect(mut schema: Value) -> Value {
    if let Some(map) = schema.as_object_mut() {
        let foreign = map
            .get(SCHEMA_KEY)
            .and_then(Value::as_str)
            .is_some_and(|dialect| !dialect.contains(KNOWN_DIALECTS));
        if foreign {
            map.remove(SCHEMA_KEY);
        }
    }
    schema
}

/// Walk a schema path, following local `$ref` hops the validator took
fn schema_node<'v>(root: &'v Value, segments: &[String]) -> Option<&'v Value> {
    let mut node = root;
    for segment in segments {
        if segment == "$ref" {
            if let Some(fragment) = node
                .get("$ref")
                .and_then(Value::as_str)
                .and_then(|reference| reference.strip_prefix('#'))
            {
                node = root.pointer(fragment)?;
                continue;
            }
        }
        node = match node {
            Value::Object(map) => map.get(segment.as_str())?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(node)
}

fn pointer_segments(pointer: &str) -> Vec<String> {
    pointer
        .split('/')
        .skip(1)
        .map(|segment| segment.replace("~1", "/").replace("~0", "~"))
        .collect()
}

fn last_segment(pointer: &str) -> String {
    pointer_segments(pointer).pop().unwrap_or_default()
}

/// How far validation of one blob got
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobStatus {
    /// Not an xz archive
    Skipped,
    /// Every object was checked
    Complete,
    /// The budget ran out first
    Truncated,
    /// The blob could not be read, see its `blob` finding
    Failed,
}

/// Outcome of one blob
#[derive(Debug, Clone)]
pub struct BlobReport {
    pub status: BlobStatus,
    pub findings: FindingSet,
    pub messages_checked: usize,
}

/// Topic-level fields shared by every finding of a blob
#[derive(Debug, Clone)]
pub struct TopicContext {
    pub schema_tag: String,
    pub topic_name: String,
    pub history_bucket: String,
}

impl TopicContext {
    pub fn for_blob(&self, blob_full_name: &str) -> BlobContext {
        BlobContext {
            schema_tag: self.schema_tag.clone(),
            topic_name: self.topic_name.clone(),
            history_bucket: self.history_bucket.clone(),
            blob_full_name: blob_full_name.to_string(),
        }
    }
}

/// Validates archives of one topic within the topic's budget
pub struct BlobValidator<'a> {
    store: &'a dyn BlobStore,
    validator: &'a MessageValidator,
    budget: &'a TopicBudget,
    probe: &'a (dyn BudgetProbe + Sync),
    context: TopicContext,
    chunk_size: usize,
}

impl<'a> BlobValidator<'a> {
    pub fn new(
        store: &'a dyn BlobStore,
        validator: &'a MessageValidator,
        budget: &'a TopicBudget,
        context: TopicContext,
    ) -> Self {
        Self {
            store,
            validator,
            budget,
            probe: budget,
            context,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Poll `probe` instead of the topic budget when deciding to stop
    ///
    /// Downloaded bytes are still recorded on the topic budget.
    pub fn with_probe(mut self, probe: &'a (dyn BudgetProbe + Sync)) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Validate every message of `blob`
    ///
    /// Read failures become a single `blob` finding next to whatever was
    /// found before the failure.
    pub async fn validate(&self, blob: &BlobHandle) -> BlobReport {
        let mut report = BlobReport {
            status: BlobStatus::Skipped,
            findings: FindingSet::new(),
            messages_checked: 0,
        };
        if !blob.is_content_type(XZ_CONTENT_TYPE) {
            tracing::debug!(blob = %blob.name, content_type = ?blob.content_type, "Skipping blob");
            return report;
        }

        let context = self.context.for_blob(&blob.name);
        report.status = match self.stream(blob, &context, &mut report).await {
            Ok(true) => BlobStatus::Complete,
            Ok(false) => {
                tracing::warn!(
                    topic = %context.topic_name,
                    blob = %blob.name,
                    messages_checked = report.messages_checked,
                    "Not all messages of blob were checked, budget exhausted"
                );
                BlobStatus::Truncated
            }
            Err(e) => {
                let text = format!("Could not unzip blob because of {e}");
                tracing::error!(topic = %context.topic_name, blob = %blob.name, "{text}");
                report
                    .findings
                    .insert(context.finding(FindingKind::Blob, FindingError::Blob(text)));
                BlobStatus::Failed
            }
        };
        report
    }

    /// True when the blob was read to its end
    async fn stream(
        &self,
        blob: &BlobHandle,
        context: &BlobContext,
        report: &mut BlobReport,
    ) -> Result<bool, DecompressionError> {
        let source = self
            .store
            .open_chunks(blob, self.chunk_size, self.budget.deadline().allotment())
            .await?;
        let mut stream = DecompressedStream::new(source)?;
        let mut carry_over: Option<String> = None;

        while let Some(text) = stream.next_text().await? {
            self.budget.record_bytes(stream.take_produced_bytes());
            let piece = match carry_over.take() {
                Some(mut previous) => {
                    previous.push_str(&text);
                    previous
                }
                None => text,
            };

            let parsed = parse_candidates(split(&piece, self.probe), self.probe);
            for object in &parsed.objects {
                record(report, context, self.validator.validate(object));
                report.messages_checked += 1;
                if self.probe.exhausted() {
                    break;
                }
            }

            if parsed.timed_out || self.probe.exhausted() {
                return Ok(false);
            }

            if let Some(rest) = &parsed.carry_over {
                if rest.len() > MAX_CARRY_OVER {
                    return Err(DecompressionError::CarryOverExceeded(rest.len()));
                }
            }
            carry_over = parsed.carry_over;
        }

        if let Some(rest) = carry_over {
            tracing::warn!(
                blob = %blob.name,
                unparsed_bytes = rest.len(),
                "Blob ended with text that is not a complete object"
            );
        }
        Ok(true)
    }
}

fn record(report: &mut BlobReport, context: &BlobContext, failures: Vec<ValidationFailure>) {
    for failure in failures {
        let kind = failure.kind();
        report
            .findings
            .insert(context.finding(kind, FindingError::Validation(failure.into_detail())));
    }
}

/// Validate plain message text without a budget
pub fn check_text(validator: &MessageValidator, context: &BlobContext, text: &str) -> BlobReport {
    let parsed = parse_dirty_json(text);
    let mut report = BlobReport {
        status: BlobStatus::Complete,
        findings: FindingSet::new(),
        messages_checked: 0,
    };
    for object in &parsed.objects {
        record(&mut report, context, validator.validate(object));
        report.messages_checked += 1;
    }
    if parsed.carry_over.is_some() {
        report.findings.insert(context.finding(
            FindingKind::Blob,
            FindingError::Blob("Text ends with an incomplete or malformed object".to_string()),
        ));
    }
    report
}
