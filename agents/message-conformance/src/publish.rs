//! Issue publishing
//!
//! Each distinct issue of a run is published once as an [`IssueEvent`].

use async_trait::async_trait;
use std::collections::HashSet;
use uuid::Uuid;

use conform_core::findings::Finding;

use crate::client::ClientError;
use crate::contracts::{IssueEvent, IssueRecord};
use crate::tickets::render;

/// Publishes payloads to a topic
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish one payload, returning the message id
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<String, ClientError>;
}

/// Publishes the distinct issues of one run
pub struct IssuePublisher<'a> {
    publisher: &'a dyn EventPublisher,
    topic: String,
    run_id: Uuid,
}

impl<'a> IssuePublisher<'a> {
    pub fn new(publisher: &'a dyn EventPublisher, topic: impl Into<String>, run_id: Uuid) -> Self {
        Self {
            publisher,
            topic: topic.into(),
            run_id,
        }
    }

    /// Publish every distinct issue, returning how many were sent
    ///
    /// Stops at the first failure.
    pub async fn publish(&self, findings: &[Finding]) -> Result<usize, ClientError> {
        let mut seen: HashSet<IssueRecord> = HashSet::new();
        let mut published = 0;

        for finding in findings {
            let record = render::issue_record(finding);
            if !seen.insert(record.clone()) {
                continue;
            }
            let event = IssueEvent::new(record, self.run_id);
            let payload = serde_json::to_vec(&event)
                .map_err(|e| ClientError::Parse(format!("Could not serialize issue: {e}")))?;
            let message_id = self.publisher.publish(&self.topic, payload).await?;
            tracing::debug!(
                topic = %self.topic,
                message_id = %message_id,
                issue_topic = %event.issue.topic_name,
                "Published issue"
            );
            published += 1;
        }

        tracing::info!(topic = %self.topic, issues = published, "Published issues");
        Ok(published)
    }
}
