//! Message Conformance Agent Contracts
//!
//! Wire types leaving the agent: published issues and the run report.

mod issue_event;

pub use issue_event::*;

use chrono::{DateTime, Utc};
use conform_core::processor::{TopicReport, TopicStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Outcome of one topic, as reported
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicOutcome {
    pub topic_name: String,
    pub schema_tag: String,
    pub status: TopicStatus,
    pub findings: usize,
    pub blobs_validated: usize,
    pub messages_checked: usize,
    pub elapsed_ms: u64,
}

impl From<&TopicReport> for TopicOutcome {
    fn from(report: &TopicReport) -> Self {
        Self {
            topic_name: report.binding.topic_name.clone(),
            schema_tag: report.binding.schema_tag.clone(),
            status: report.status.clone(),
            findings: report.findings.len(),
            blobs_validated: report.blobs_validated,
            messages_checked: report.messages_checked,
            elapsed_ms: report.elapsed.as_millis() as u64,
        }
    }
}

/// Summary of one invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique run identifier
    pub run_id: Uuid,

    /// Start timestamp
    pub started_at: DateTime<Utc>,

    /// Completion timestamp
    pub completed_at: DateTime<Utc>,

    /// Duration in milliseconds
    pub duration_ms: u64,

    /// Per-topic outcomes in processing order
    pub topics: Vec<TopicOutcome>,

    /// Distinct findings by kind
    #[serde(default)]
    pub findings_by_kind: BTreeMap<String, usize>,

    pub tickets_created: usize,
    pub comments_added: usize,
    pub issues_published: usize,
}

impl RunReport {
    /// Empty report for a run starting now
    pub fn start(run_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            started_at: now,
            completed_at: now,
            duration_ms: 0,
            topics: Vec::new(),
            findings_by_kind: BTreeMap::new(),
            tickets_created: 0,
            comments_added: 0,
            issues_published: 0,
        }
    }

    /// Stamp the completion time
    pub fn finish(mut self) -> Self {
        self.completed_at = Utc::now();
        self.duration_ms = (self.completed_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64;
        self
    }

    pub fn findings_total(&self) -> usize {
        self.findings_by_kind.values().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_totals() {
        let mut report = RunReport::start(Uuid::new_v4());
        report.findings_by_kind.insert("message".to_string(), 2);
        report.findings_by_kind.insert("blob".to_string(), 1);
        let report = report.finish();

        assert_eq!(report.findings_total(), 3);
        assert!(report.completed_at >= report.started_at);
    }
}
