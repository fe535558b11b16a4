//! Issue tracker client
//!
//! Speaks the REST API v2 for issues and comments and the agile API for
//! sprints and epics. Every call goes through the retry policy.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{endpoint, ensure_success, ClientError, Result, RetryPolicy};
use crate::tickets::{self, TicketError, TicketSummary, Ticketing};

/// Page size for searches and comment listings
const PAGE_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    issues: Vec<IssueSummary>,
}

#[derive(Debug, Deserialize)]
struct IssueSummary {
    key: String,
    fields: SummaryFields,
}

#[derive(Debug, Deserialize)]
struct SummaryFields {
    #[serde(default)]
    summary: String,
}

#[derive(Debug, Deserialize)]
struct CreatedIssue {
    key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentPage {
    #[serde(default)]
    comments: Vec<CommentBody>,
    #[serde(default)]
    start_at: usize,
    #[serde(default)]
    total: usize,
}

#[derive(Debug, Deserialize)]
struct CommentBody {
    #[serde(default)]
    body: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SprintPage {
    #[serde(default)]
    values: Vec<Sprint>,
    #[serde(default = "default_last")]
    is_last: bool,
    #[serde(default)]
    start_at: usize,
}

fn default_last() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
struct Sprint {
    id: u64,
    #[serde(default)]
    state: String,
}

/// Issue tracker REST client
pub struct JiraClient {
    client: reqwest::Client,
    base_url: String,
    user: String,
    token: String,
    retry: RetryPolicy,
}

impl JiraClient {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        user: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            user: user.into(),
            token: token.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn url(&self, segments: &[&str]) -> Result<reqwest::Url> {
        endpoint(&self.base_url, segments)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: reqwest::Url,
        query: &[(&str, String)],
    ) -> Result<T> {
        let response = self
            .client
            .get(url)
            .query(query)
            .basic_auth(&self.user, Some(&self.token))
            .send()
            .await?;
        Ok(ensure_success(response).await?.json().await?)
    }

    async fn post_json(&self, url: reqwest::Url, body: &Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(url)
            .basic_auth(&self.user, Some(&self.token))
            .json(body)
            .send()
            .await?;
        ensure_success(response).await
    }

    async fn all_sprints(&self, board: u64) -> Result<Vec<Sprint>> {
        let url = self.url(&["rest", "agile", "1.0", "board", &board.to_string(), "sprint"])?;
        let mut sprints = Vec::new();
        let mut start_at = 0usize;
        loop {
            let page: SprintPage = self
                .get_json(
                    url.clone(),
                    &[
                        ("startAt", start_at.to_string()),
                        ("maxResults", PAGE_SIZE.to_string()),
                    ],
                )
                .await?;
            let count = page.values.len();
            sprints.extend(page.values);
            if page.is_last || count == 0 {
                return Ok(sprints);
            }
            start_at = page.start_at + count;
        }
    }
}

#[async_trait]
impl Ticketing for JiraClient {
    async fn find_tickets(&self, query: &str) -> tickets::Result<Vec<TicketSummary>> {
        let url = self.url(&["rest", "api", "2", "search"])?;
        let params = [
            ("jql", query.to_string()),
            ("fields", "summary".to_string()),
            ("maxResults", PAGE_SIZE.to_string()),
        ];
        let response: SearchResponse = self
            .retry
            .run("jira_search", || self.get_json(url.clone(), &params))
            .await?;

        Ok(response
            .issues
            .into_iter()
            .map(|issue| TicketSummary {
                key: issue.key,
                title: issue.fields.summary,
            })
            .collect())
    }

    async fn create_ticket(
        &self,
        project: &str,
        title: &str,
        description: &str,
    ) -> tickets::Result<String> {
        let url = self.url(&["rest", "api", "2", "issue"])?;
        let body = json!({
            "fields": {
                "project": {"key": project},
                "summary": title,
                "description": description,
                "issuetype": {"name": "Bug"}
            }
        });
        let created: CreatedIssue = self
            .retry
            .run("jira_create_issue", || async {
                Ok::<_, ClientError>(self.post_json(url.clone(), &body).await?.json().await?)
            })
            .await?;
        Ok(created.key)
    }

    async fn add_comment(&self, ticket: &str, body: &str) -> tickets::Result<()> {
        let url = self.url(&["rest", "api", "2", "issue", ticket, "comment"])?;
        let payload = json!({ "body": body });
        self.retry
            .run("jira_add_comment", || async {
                self.post_json(url.clone(), &payload).await.map(|_| ())
            })
            .await?;
        Ok(())
    }

    async fn list_comments(&self, ticket: &str) -> tickets::Result<Vec<String>> {
        let url = self.url(&["rest", "api", "2", "issue", ticket, "comment"])?;
        let mut bodies: Vec<String> = Vec::new();
        loop {
            let params = [
                ("startAt", bodies.len().to_string()),
                ("maxResults", PAGE_SIZE.to_string()),
            ];
            let page: CommentPage = self
                .retry
                .run("jira_list_comments", || self.get_json(url.clone(), &params))
                .await?;
            let count = page.comments.len();
            bodies.extend(page.comments.into_iter().map(|c| c.body));
            if count == 0 || page.start_at + count >= page.total {
                return Ok(bodies);
            }
        }
    }

    async fn current_sprint(&self, board: u64) -> tickets::Result<u64> {
        let sprints = self
            .retry
            .run("jira_sprints", || self.all_sprints(board))
            .await?;
        sprints
            .iter()
            .find(|sprint| sprint.state == "active")
            .or_else(|| sprints.last())
            .map(|sprint| sprint.id)
            .ok_or(TicketError::NoSprint(board))
    }

    async fn add_to_sprint(&self, ticket: &str, sprint: u64) -> tickets::Result<()> {
        let url = self.url(&["rest", "agile", "1.0", "sprint", &sprint.to_string(), "issue"])?;
        let body = json!({ "issues": [ticket] });
        self.retry
            .run("jira_add_to_sprint", || async {
                self.post_json(url.clone(), &body).await.map(|_| ())
            })
            .await?;
        Ok(())
    }

    async fn add_to_epic(&self, ticket: &str, epic: &str) -> tickets::Result<()> {
        let url = self.url(&["rest", "agile", "1.0", "epic", epic, "issue"])?;
        let body = json!({ "issues": [ticket] });
        self.retry
            .run("jira_add_to_epic", || async {
                self.post_json(url.clone(), &body).await.map(|_| ())
            })
            .await?;
        Ok(())
    }
}
