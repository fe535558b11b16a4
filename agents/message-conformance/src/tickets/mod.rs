//! Ticket filing
//!
//! Every (topic, schema) pair with message or schema findings owns exactly
//! one ticket. The first run creates it; later runs add one comment per
//! error signature the ticket does not carry yet.

pub mod render;

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

use conform_core::findings::Finding;

use crate::client::ClientError;

/// Ticket filing errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TicketError {
    #[error("Ticket tracker error: {0}")]
    Tracker(#[from] ClientError),

    #[error("No sprint found on board {0}")]
    NoSprint(u64),
}

pub type Result<T> = std::result::Result<T, TicketError>;

/// A ticket found by a search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketSummary {
    pub key: String,
    pub title: String,
}

/// Issue tracker operations used for filing
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Ticketing: Send + Sync {
    async fn find_tickets(&self, query: &str) -> Result<Vec<TicketSummary>>;

    /// Create a bug, returning its key
    async fn create_ticket(&self, project: &str, title: &str, description: &str) -> Result<String>;

    async fn add_comment(&self, ticket: &str, body: &str) -> Result<()>;

    /// Comment bodies of a ticket, oldest first
    async fn list_comments(&self, ticket: &str) -> Result<Vec<String>>;

    /// Active sprint of a board, else its most recent one
    async fn current_sprint(&self, board: u64) -> Result<u64>;

    async fn add_to_sprint(&self, ticket: &str, sprint: u64) -> Result<()>;

    async fn add_to_epic(&self, ticket: &str, epic: &str) -> Result<()>;
}

/// Where new tickets go
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilingTarget {
    pub project: String,
    pub board: Option<u64>,
    pub epic: Option<String>,
}

/// Outcome of one filing pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilingReport {
    pub tickets_created: usize,
    pub comments_added: usize,
}

/// Files findings as tickets and comments
pub struct TicketFiler<'a> {
    tracker: &'a dyn Ticketing,
    target: FilingTarget,
}

impl<'a> TicketFiler<'a> {
    pub fn new(tracker: &'a dyn Ticketing, target: FilingTarget) -> Self {
        Self { tracker, target }
    }

    /// File every ticketed finding
    ///
    /// Tracker failures abort the pass. Sprint and epic placement of a
    /// new ticket are best effort.
    pub async fn file(&self, findings: &[Finding]) -> Result<FilingReport> {
        let mut by_title: BTreeMap<String, Vec<&Finding>> = BTreeMap::new();
        for finding in findings.iter().filter(|f| f.kind.is_ticketed()) {
            by_title
                .entry(render::ticket_title(&finding.topic_name, &finding.schema_tag))
                .or_default()
                .push(finding);
        }

        let mut report = FilingReport::default();
        for (title, group) in &by_title {
            let (ticket, known) = match self.existing_ticket(title).await? {
                Some(key) => {
                    let comments = self.tracker.list_comments(&key).await?;
                    let known: HashSet<String> =
                        render::parse_signatures(comments.iter().map(String::as_str))
                            .into_iter()
                            .collect();
                    (key, known)
                }
                None => {
                    let first = group[0];
                    let key = self
                        .tracker
                        .create_ticket(
                            &self.target.project,
                            title,
                            &render::description(&first.topic_name, &first.schema_tag),
                        )
                        .await?;
                    tracing::info!(ticket = %key, title = %title, "Created ticket");
                    report.tickets_created += 1;
                    self.place(&key).await;
                    (key, HashSet::new())
                }
            };

            report.comments_added += self.comment_new_errors(&ticket, group, known).await?;
        }

        Ok(report)
    }

    async fn existing_ticket(&self, title: &str) -> Result<Option<String>> {
        let query = render::search_query(&self.target.project, title);
        let tickets = self.tracker.find_tickets(&query).await?;
        Ok(tickets
            .into_iter()
            .find(|ticket| ticket.title == title)
            .map(|ticket| ticket.key))
    }

    async fn comment_new_errors(
        &self,
        ticket: &str,
        findings: &[&Finding],
        mut known: HashSet<String>,
    ) -> Result<usize> {
        let mut added = 0;
        for finding in findings {
            if !known.insert(render::short_signature(finding)) {
                continue;
            }
            self.tracker
                .add_comment(ticket, &render::comment(finding))
                .await?;
            added += 1;
        }
        if added > 0 {
            tracing::info!(ticket = %ticket, comments = added, "Commented new errors");
        }
        Ok(added)
    }

    async fn place(&self, ticket: &str) {
        if let Some(board) = self.target.board {
            let placed = match self.tracker.current_sprint(board).await {
                Ok(sprint) => self.tracker.add_to_sprint(ticket, sprint).await,
                Err(e) => Err(e),
            };
            if let Err(e) = placed {
                tracing::warn!(ticket = %ticket, board = board, error = %e, "Could not add ticket to sprint");
            }
        }
        if let Some(epic) = &self.target.epic {
            if let Err(e) = self.tracker.add_to_epic(ticket, epic).await {
                tracing::warn!(ticket = %ticket, epic = %epic, error = %e, "Could not add ticket to epic");
            }
        }
    }
}
