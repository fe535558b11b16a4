//! Issue events published for every distinct finding

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One distinct issue, as published
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IssueRecord {
    /// Ticket title the issue belongs to
    pub title: String,

    /// Ticket description
    pub description: String,

    /// Full comment text
    pub comment: String,

    /// Error part of the comment
    pub comment_error: String,

    /// Schema location part of the comment, empty for blob issues
    pub comment_schema_key: String,

    /// Schema tag
    pub schema: String,

    pub topic_name: String,

    /// History bucket holding the blob
    pub bucket: String,

    pub blob_name: String,
}

/// Where and when an event was produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub agent_id: String,
    pub agent_version: String,
    pub run_id: Uuid,
    pub published_at: DateTime<Utc>,
}

/// Payload published to the issues topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueEvent {
    pub issue: IssueRecord,
    pub provenance: Vec<Provenance>,
}

impl IssueEvent {
    /// Agent version constant
    pub const AGENT_VERSION: &'static str = env!("CARGO_PKG_VERSION");

    /// Agent identifier constant
    pub const AGENT_ID: &'static str = "message-conformance-agent";

    pub fn new(issue: IssueRecord, run_id: Uuid) -> Self {
        Self {
            issue,
            provenance: vec![Provenance {
                agent_id: Self::AGENT_ID.to_string(),
                agent_version: Self::AGENT_VERSION.to_string(),
                run_id,
                published_at: Utc::now(),
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_shape() {
        let issue = IssueRecord {
            title: "t".to_string(),
            description: "d".to_string(),
            comment: "c".to_string(),
            comment_error: "e".to_string(),
            comment_schema_key: String::new(),
            schema: "schemas/orders".to_string(),
            topic_name: "orders".to_string(),
            bucket: "orders-history-stg".to_string(),
            blob_name: "a.xz".to_string(),
        };
        let event = IssueEvent::new(issue, Uuid::nil());
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["issue"]["topic_name"], "orders");
        assert_eq!(value["provenance"][0]["agent_id"], IssueEvent::AGENT_ID);
        assert_eq!(value["provenance"][0]["run_id"], Uuid::nil().to_string());
    }
}
