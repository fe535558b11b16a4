//! Prometheus metrics for the Message Conformance Agent
//!
//! - `topics_processed_total` (counter) - topics by final status
//! - `blobs_validated_total` (counter) - archives read
//! - `findings_total` (counter) - distinct findings by kind
//! - `budget_exhausted_total` (counter) - topics truncated by the budget
//! - `tickets_created_total`, `comments_added_total` (counters) - filing results
//! - `issues_published_total` (counter) - published issue events
//! - `runs_total` (counter) - invocations by result
//! - `topic_duration_seconds` (histogram) - time spent per topic

use prometheus::{
    Counter, CounterVec, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use thiserror::Error;

use conform_core::processor::{TopicReport, TopicStatus};

use crate::contracts::RunReport;

const NAMESPACE: &str = "message_conformance";

/// Telemetry errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Metrics error: {0}")]
    MetricsError(#[from] prometheus::Error),

    #[error("Metrics encoding error: {0}")]
    EncodingError(String),
}

pub type Result<T> = std::result::Result<T, TelemetryError>;

fn status_label(status: &TopicStatus) -> &'static str {
    match status {
        TopicStatus::SchemaUnavailable => "schema_unavailable",
        TopicStatus::ListingFailed => "listing_failed",
        TopicStatus::NoMessages => "no_messages",
        TopicStatus::Complete => "complete",
        TopicStatus::Truncated => "truncated",
    }
}

/// Metrics of the agent, registered in their own registry
pub struct RunMetrics {
    registry: Registry,
    topics_total: CounterVec,
    blobs_total: Counter,
    findings_total: CounterVec,
    budget_exhausted_total: Counter,
    tickets_created_total: Counter,
    comments_added_total: Counter,
    issues_published_total: Counter,
    runs_total: CounterVec,
    topic_duration_seconds: Histogram,
}

impl RunMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let topics_total = CounterVec::new(
            Opts::new("topics_processed_total", "Topics processed by final status")
                .namespace(NAMESPACE),
            &["status"],
        )?;
        let blobs_total = Counter::with_opts(
            Opts::new("blobs_validated_total", "Archives read and validated").namespace(NAMESPACE),
        )?;
        let findings_total = CounterVec::new(
            Opts::new("findings_total", "Distinct findings by kind").namespace(NAMESPACE),
            &["kind"],
        )?;
        let budget_exhausted_total = Counter::with_opts(
            Opts::new(
                "budget_exhausted_total",
                "Topics whose archives were not all read in time",
            )
            .namespace(NAMESPACE),
        )?;
        let tickets_created_total = Counter::with_opts(
            Opts::new("tickets_created_total", "Tickets created").namespace(NAMESPACE),
        )?;
        let comments_added_total = Counter::with_opts(
            Opts::new("comments_added_total", "Ticket comments added").namespace(NAMESPACE),
        )?;
        let issues_published_total = Counter::with_opts(
            Opts::new("issues_published_total", "Issue events published").namespace(NAMESPACE),
        )?;
        let runs_total = CounterVec::new(
            Opts::new("runs_total", "Invocations by result").namespace(NAMESPACE),
            &["result"],
        )?;
        let topic_duration_seconds = Histogram::with_opts(
            HistogramOpts::new("topic_duration_seconds", "Time spent validating one topic")
                .namespace(NAMESPACE)
                .buckets(vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 540.0]),
        )?;

        registry.register(Box::new(topics_total.clone()))?;
        registry.register(Box::new(blobs_total.clone()))?;
        registry.register(Box::new(findings_total.clone()))?;
        registry.register(Box::new(budget_exhausted_total.clone()))?;
        registry.register(Box::new(tickets_created_total.clone()))?;
        registry.register(Box::new(comments_added_total.clone()))?;
        registry.register(Box::new(issues_published_total.clone()))?;
        registry.register(Box::new(runs_total.clone()))?;
        registry.register(Box::new(topic_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            topics_total,
            blobs_total,
            findings_total,
            budget_exhausted_total,
            tickets_created_total,
            comments_added_total,
            issues_published_total,
            runs_total,
            topic_duration_seconds,
        })
    }

    pub fn record_topic(&self, report: &TopicReport) {
        self.topics_total
            .with_label_values(&[status_label(&report.status)])
            .inc();
        self.blobs_total.inc_by(report.blobs_validated as f64);
        for finding in report.findings.iter() {
            self.findings_total
                .with_label_values(&[finding.kind.as_str()])
                .inc();
        }
        if report.status == TopicStatus::Truncated {
            self.budget_exhausted_total.inc();
        }
        self.topic_duration_seconds
            .observe(report.elapsed.as_secs_f64());
    }

    /// Filing and publishing counts of a finished run
    pub fn record_run(&self, report: &RunReport) {
        self.tickets_created_total
            .inc_by(report.tickets_created as f64);
        self.comments_added_total
            .inc_by(report.comments_added as f64);
        self.issues_published_total
            .inc_by(report.issues_published as f64);
        self.runs_total.with_label_values(&["ok"]).inc();
    }

    pub fn record_failed_run(&self) {
        self.runs_total.with_label_values(&["failed"]).inc();
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Text exposition format
    pub fn encode_text(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::EncodingError(e.to_string()))
    }
}
