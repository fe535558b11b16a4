//! Topic processing loop
//!
//! For every topic-schema binding: load and resolve the schema, list
//! yesterday's archives in the topic's history bucket, validate each archive
//! within the topic's budget, then hand the leftover budget to the topics
//! that are still waiting.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::budget::{BudgetAllocator, BudgetProbe, TopicBudget};
use crate::decompress::DEFAULT_CHUNK_SIZE;
use crate::findings::{Finding, FindingKind, FindingSet};
use crate::resolver::SchemaResolver;
use crate::store::BlobStore;
use crate::validator::{BlobStatus, BlobValidator, MessageValidator, TopicContext};

/// Suffix of the bucket archiving a topic's messages
pub const HISTORY_BUCKET_SUFFIX: &str = "-history-stg";

/// A topic and the schema its messages must follow
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicSchemaBinding {
    pub schema_tag: String,
    pub topic_name: String,
}

impl TopicSchemaBinding {
    pub fn new(schema_tag: impl Into<String>, topic_name: impl Into<String>) -> Self {
        Self {
            schema_tag: schema_tag.into(),
            topic_name: topic_name.into(),
        }
    }
}

/// Bucket holding the archives of `topic_name`
pub fn history_bucket_name(topic_name: &str) -> String {
    format!("{topic_name}{HISTORY_BUCKET_SUFFIX}")
}

/// Listing prefix for the archives written the day before `now`
pub fn history_prefix_for(now: DateTime<Utc>) -> String {
    (now - ChronoDuration::days(1)).format("%Y/%m/%d").to_string()
}

/// Processing parameters shared by every topic
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    /// Listing prefix of the archives to validate
    pub history_prefix: String,
    /// Compressed bytes per download
    pub chunk_size: usize,
}

impl ProcessorSettings {
    /// Validate yesterday's archives
    pub fn yesterday() -> Self {
        Self {
            history_prefix: history_prefix_for(Utc::now()),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_history_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.history_prefix = prefix.into();
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }
}

/// How a topic ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicStatus {
    /// Schema missing or unresolvable, topic skipped
    SchemaUnavailable,
    /// The history bucket could not be listed
    ListingFailed,
    /// No archives for the day
    NoMessages,
    /// Every archive was read to its end
    Complete,
    /// The budget ran out before every archive was read
    Truncated,
}

/// Outcome of one topic
#[derive(Debug, Clone)]
pub struct TopicReport {
    pub binding: TopicSchemaBinding,
    pub status: TopicStatus,
    pub findings: FindingSet,
    pub blobs_listed: usize,
    pub blobs_validated: usize,
    pub messages_checked: usize,
    pub elapsed: Duration,
    pub bytes_used: u64,
}

impl TopicReport {
    fn new(binding: &TopicSchemaBinding, status: TopicStatus) -> Self {
        Self {
            binding: binding.clone(),
            status,
            findings: FindingSet::new(),
            blobs_listed: 0,
            blobs_validated: 0,
            messages_checked: 0,
            elapsed: Duration::ZERO,
            bytes_used: 0,
        }
    }
}

/// Outcome of every topic of one invocation
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub topics: Vec<TopicReport>,
    pub findings: FindingSet,
}

impl RunSummary {
    pub fn findings(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter()
    }

    pub fn count_kind(&self, kind: FindingKind) -> usize {
        self.findings.count_kind(kind)
    }

    pub fn truncated_topics(&self) -> usize {
        self.topics
            .iter()
            .filter(|t| t.status == TopicStatus::Truncated)
            .count()
    }
}

/// Validates topics one after another within a shared budget
pub struct TopicProcessor {
    store: Arc<dyn BlobStore>,
    resolver: SchemaResolver,
    settings: ProcessorSettings,
    allocator: BudgetAllocator,
}

impl TopicProcessor {
    pub fn new(
        store: Arc<dyn BlobStore>,
        resolver: SchemaResolver,
        settings: ProcessorSettings,
        allocator: BudgetAllocator,
    ) -> Self {
        Self {
            store,
            resolver,
            settings,
            allocator,
        }
    }

    pub fn allocator(&self) -> &BudgetAllocator {
        &self.allocator
    }

    /// Validate every binding in order
    pub async fn run(&mut self, bindings: &[TopicSchemaBinding]) -> RunSummary {
        let mut summary = RunSummary::default();
        for binding in bindings {
            let report = self.validate_topic(binding).await;
            summary.findings.extend(report.findings.iter().cloned());
            summary.topics.push(report);
        }
        tracing::info!(
            topics = summary.topics.len(),
            findings = summary.findings.len(),
            truncated_topics = summary.truncated_topics(),
            "Finished validating topics"
        );
        summary
    }

    /// Validate one topic and redistribute its leftover budget
    pub async fn validate_topic(&mut self, binding: &TopicSchemaBinding) -> TopicReport {
        let started = Instant::now();
        let budget = self.allocator.topic_budget();

        let mut report = self.process(binding, &budget).await;

        report.elapsed = started.elapsed();
        report.bytes_used = budget.bytes_used();
        let next = self.allocator.update(report.elapsed, report.bytes_used);

        tracing::info!(
            topic = %binding.topic_name,
            schema_tag = %binding.schema_tag,
            status = ?report.status,
            findings = report.findings.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            next_allotment_secs = next,
            "Topic processed"
        );
        report
    }

    async fn process(&self, binding: &TopicSchemaBinding, budget: &TopicBudget) -> TopicReport {
        let schema = match self.resolver.load_resolved(&binding.schema_tag).await {
            Ok(Some(schema)) => schema,
            Ok(None) => {
                tracing::info!(
                    topic = %binding.topic_name,
                    schema_tag = %binding.schema_tag,
                    "No valid schema found for topic"
                );
                return TopicReport::new(binding, TopicStatus::SchemaUnavailable);
            }
            Err(e) => {
                tracing::error!(
                    topic = %binding.topic_name,
                    schema_tag = %binding.schema_tag,
                    error = %e,
                    "Could not resolve schema"
                );
                return TopicReport::new(binding, TopicStatus::SchemaUnavailable);
            }
        };

        let history_bucket = history_bucket_name(&binding.topic_name);
        let blobs = match self
            .store
            .list_blobs(&history_bucket, &self.settings.history_prefix)
            .await
        {
            Ok(blobs) => blobs,
            Err(e) => {
                tracing::error!(
                    topic = %binding.topic_name,
                    bucket = %history_bucket,
                    error = %e,
                    "Could not list history bucket"
                );
                return TopicReport::new(binding, TopicStatus::ListingFailed);
            }
        };

        if blobs.is_empty() {
            tracing::info!(
                topic = %binding.topic_name,
                prefix = %self.settings.history_prefix,
                "No new messages were published"
            );
            return TopicReport::new(binding, TopicStatus::NoMessages);
        }

        tracing::info!(
            topic = %binding.topic_name,
            schema_tag = %binding.schema_tag,
            blobs = blobs.len(),
            "Validating messages against schema"
        );

        let validator = MessageValidator::new(schema);
        let context = TopicContext {
            schema_tag: binding.schema_tag.clone(),
            topic_name: binding.topic_name.clone(),
            history_bucket,
        };
        let blob_validator = BlobValidator::new(self.store.as_ref(), &validator, budget, context)
            .with_chunk_size(self.settings.chunk_size);

        let mut report = TopicReport::new(binding, TopicStatus::Complete);
        report.blobs_listed = blobs.len();

        for blob in &blobs {
            if budget.exhausted() {
                report.status = TopicStatus::Truncated;
                break;
            }
            let blob_report = blob_validator.validate(blob).await;
            if blob_report.status != BlobStatus::Skipped {
                report.blobs_validated += 1;
            }
            report.messages_checked += blob_report.messages_checked;
            report.findings.extend(blob_report.findings);
            if blob_report.status == BlobStatus::Truncated {
                report.status = TopicStatus::Truncated;
                break;
            }
        }

        if report.status == TopicStatus::Truncated {
            tracing::warn!(
                topic = %binding.topic_name,
                blobs_validated = report.blobs_validated,
                blobs_listed = report.blobs_listed,
                "Not all messages of topic were checked, budget exhausted"
            );
        }
        report
    }
}
