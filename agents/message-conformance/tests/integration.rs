//! End-to-end runs against in-memory collaborators

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

use conform_core::decompress::XZ_CONTENT_TYPE;
use conform_core::store::{BlobStore, InMemoryBlobStore};
use message_conformance::client::{ClientError, SecretSource};
use message_conformance::config::{Endpoints, JiraSettings, Settings};
use message_conformance::handler::{create_router, AppState};
use message_conformance::publish::EventPublisher;
use message_conformance::runner::{ConformanceRun, RunError, ServiceConnector};
use message_conformance::telemetry::RunMetrics;
use message_conformance::tickets::{self, TicketError, TicketSummary, Ticketing};
use message_conformance::IssueEvent;

const DAY: &str = "2024/01/01";
const HISTORY: &str = "orders-history-stg";

fn compress(text: &str) -> Vec<u8> {
    let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
    encoder.write_all(text.as_bytes()).unwrap();
    encoder.finish().unwrap()
}

fn catalog() -> Value {
    json!({
        "dataset": [{
            "distribution": [
                {
                    "format": "topic",
                    "title": "orders",
                    "describedBy": "schemas/orders",
                    "describedByType": "application/schema+json"
                },
                {
                    "format": "topic",
                    "title": "payments",
                    "describedBy": "schemas/missing",
                    "describedByType": "application/schema+json"
                }
            ]
        }]
    })
}

fn order_schema() -> Value {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "required": ["id"],
        "properties": {"id": {"type": "integer", "minimum": 0}}
    })
}

fn store() -> Arc<InMemoryBlobStore> {
    let store = Arc::new(InMemoryBlobStore::new());
    store.insert("catalogs", "sales.json", None, catalog().to_string());
    store.insert("schemas", "schemas_orders.json", None, order_schema().to_string());
    store.insert(
        HISTORY,
        &format!("{DAY}/a.xz"),
        Some(XZ_CONTENT_TYPE),
        compress(r#"[{"id": 1}, {"id": "x"}, {}, {"id": 2}]"#),
    );
    store.insert(
        HISTORY,
        &format!("{DAY}/b.xz"),
        Some(XZ_CONTENT_TYPE),
        b"definitely not xz".to_vec(),
    );
    store
}

struct StaticSecrets;

#[async_trait]
impl SecretSource for StaticSecrets {
    async fn get_secret(&self, project: &str, secret_id: &str) -> Result<String, ClientError> {
        if project == "ops" && secret_id == "jira-token" {
            Ok("api-token".to_string())
        } else {
            Err(ClientError::Server {
                status: 404,
                message: format!("{project}/{secret_id}"),
            })
        }
    }
}

#[derive(Default)]
struct RecordingPublisher {
    events: Mutex<Vec<IssueEvent>>,
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, _topic: &str, payload: Vec<u8>) -> Result<String, ClientError> {
        let event: IssueEvent =
            serde_json::from_slice(&payload).map_err(|e| ClientError::Parse(e.to_string()))?;
        let mut events = self.events.lock().unwrap();
        events.push(event);
        Ok(events.len().to_string())
    }
}

#[derive(Debug, Clone)]
struct FakeTicket {
    title: String,
    comments: Vec<String>,
    sprint: Option<u64>,
    epic: Option<String>,
}

/// Tracker keeping tickets in memory
#[derive(Default)]
struct FakeTracker {
    tickets: Mutex<BTreeMap<String, FakeTicket>>,
    down: bool,
}

impl FakeTracker {
    fn tickets(&self) -> BTreeMap<String, FakeTicket> {
        self.tickets.lock().unwrap().clone()
    }

    fn unavailable() -> TicketError {
        TicketError::Tracker(ClientError::Network("tracker down".to_string()))
    }
}

#[async_trait]
impl Ticketing for FakeTracker {
    async fn find_tickets(&self, query: &str) -> tickets::Result<Vec<TicketSummary>> {
        if self.down {
            return Err(Self::unavailable());
        }
        Ok(self
            .tickets
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, ticket)| query.contains(&ticket.title))
            .map(|(key, ticket)| TicketSummary {
                key: key.clone(),
                title: ticket.title.clone(),
            })
            .collect())
    }

    async fn create_ticket(&self, project: &str, title: &str, _description: &str) -> tickets::Result<String> {
        let mut tickets = self.tickets.lock().unwrap();
        let key = format!("{project}-{}", tickets.len() + 1);
        tickets.insert(
            key.clone(),
            FakeTicket {
                title: title.to_string(),
                comments: Vec::new(),
                sprint: None,
                epic: None,
            },
        );
        Ok(key)
    }

    async fn add_comment(&self, ticket: &str, body: &str) -> tickets::Result<()> {
        let mut tickets = self.tickets.lock().unwrap();
        let ticket = tickets.get_mut(ticket).ok_or_else(Self::unavailable)?;
        ticket.comments.push(body.to_string());
        Ok(())
    }

    async fn list_comments(&self, ticket: &str) -> tickets::Result<Vec<String>> {
        let tickets = self.tickets.lock().unwrap();
        Ok(tickets
            .get(ticket)
            .map(|t| t.comments.clone())
            .unwrap_or_default())
    }

    async fn current_sprint(&self, board: u64) -> tickets::Result<u64> {
        Ok(board * 100)
    }

    async fn add_to_sprint(&self, ticket: &str, sprint: u64) -> tickets::Result<()> {
        if let Some(ticket) = self.tickets.lock().unwrap().get_mut(ticket) {
            ticket.sprint = Some(sprint);
        }
        Ok(())
    }

    async fn add_to_epic(&self, ticket: &str, epic: &str) -> tickets::Result<()> {
        if let Some(ticket) = self.tickets.lock().unwrap().get_mut(ticket) {
            ticket.epic = Some(epic.to_string());
        }
        Ok(())
    }
}

struct FakeConnector {
    store: Arc<InMemoryBlobStore>,
    tracker: Arc<FakeTracker>,
    publisher: Arc<RecordingPublisher>,
    tokens_seen: Mutex<Vec<String>>,
}

impl FakeConnector {
    fn new(store: Arc<InMemoryBlobStore>, tracker: FakeTracker) -> Self {
        Self {
            store,
            tracker: Arc::new(tracker),
            publisher: Arc::new(RecordingPublisher::default()),
            tokens_seen: Mutex::new(Vec::new()),
        }
    }
}

impl ServiceConnector for FakeConnector {
    fn blob_store(&self) -> Arc<dyn BlobStore> {
        self.store.clone()
    }

    fn secrets(&self) -> Arc<dyn SecretSource> {
        Arc::new(StaticSecrets)
    }

    fn publisher(&self) -> Arc<dyn EventPublisher> {
        self.publisher.clone()
    }

    fn ticketing(&self, _jira: &JiraSettings, api_token: &str) -> Arc<dyn Ticketing> {
        self.tokens_seen.lock().unwrap().push(api_token.to_string());
        self.tracker.clone()
    }
}

fn settings() -> Settings {
    Settings {
        catalogs_bucket: "catalogs".to_string(),
        schemas_bucket: "schemas".to_string(),
        timeout: Duration::from_secs(540),
        max_response_bytes: None,
        project_id: Some("ops".to_string()),
        jira: Some(JiraSettings {
            project: "DAT".to_string(),
            board: Some(7),
            epic: Some("DAT-EPIC".to_string()),
            server: "https://tracker.example.com".to_string(),
            user: "bot".to_string(),
            secret_id: "jira-token".to_string(),
            secret_project: "ops".to_string(),
        }),
        topic_name: Some("schema-issues".to_string()),
        access_token: None,
        endpoints: Endpoints::default(),
    }
}

fn run(connector: Arc<FakeConnector>, settings: Settings) -> ConformanceRun {
    let metrics = Arc::new(RunMetrics::new().unwrap());
    ConformanceRun::new(settings, connector, metrics).with_history_prefix(DAY)
}

#[tokio::test]
async fn test_repeated_runs_file_each_error_once() {
    let store = store();
    let connector = Arc::new(FakeConnector::new(store.clone(), FakeTracker::default()));

    // First run creates the ticket with one comment per distinct error
    let report = run(connector.clone(), settings()).execute().await.unwrap();
    assert_eq!(report.topics.len(), 2);
    assert_eq!(report.findings_by_kind.get("message"), Some(&2));
    assert_eq!(report.findings_by_kind.get("blob"), Some(&1));
    assert_eq!(report.tickets_created, 1);
    assert_eq!(report.comments_added, 2);
    assert_eq!(report.issues_published, 3);

    let tickets = connector.tracker.tickets();
    assert_eq!(tickets.len(), 1);
    let ticket = &tickets["DAT-1"];
    assert_eq!(
        ticket.title,
        "Messages not conform schema: topic 'orders' schema 'schemas/orders'"
    );
    assert_eq!(ticket.sprint, Some(700));
    assert_eq!(ticket.epic.as_deref(), Some("DAT-EPIC"));
    assert_eq!(connector.tokens_seen.lock().unwrap().as_slice(), ["api-token"]);

    // Same archives again: nothing new to say
    let report = run(connector.clone(), settings()).execute().await.unwrap();
    assert_eq!(report.tickets_created, 0);
    assert_eq!(report.comments_added, 0);

    // A new archive repeating a known error and adding a new one
    store.insert(
        HISTORY,
        &format!("{DAY}/c.xz"),
        Some(XZ_CONTENT_TYPE),
        compress(r#"[{"id": "y"}, {"id": -1}]"#),
    );
    let report = run(connector.clone(), settings()).execute().await.unwrap();
    assert_eq!(report.tickets_created, 0);
    assert_eq!(report.comments_added, 1);
    assert_eq!(connector.tracker.tickets()["DAT-1"].comments.len(), 3);

    let events = connector.publisher.events.lock().unwrap();
    assert!(events
        .iter()
        .any(|e| e.issue.title.starts_with("Blob could not be parsed")));
    assert!(events.iter().all(|e| e.issue.topic_name == "orders"));
}

#[tokio::test]
async fn test_without_tracker_findings_are_only_published() {
    let connector = Arc::new(FakeConnector::new(store(), FakeTracker::default()));
    let mut settings = settings();
    settings.jira = None;

    let report = run(connector.clone(), settings).execute().await.unwrap();
    assert_eq!(report.tickets_created, 0);
    assert_eq!(report.issues_published, 3);
    assert!(connector.tracker.tickets().is_empty());
    assert!(connector.tokens_seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_tracker_failure_fails_the_run() {
    let tracker = FakeTracker {
        down: true,
        ..FakeTracker::default()
    };
    let connector = Arc::new(FakeConnector::new(store(), tracker));

    let err = run(connector.clone(), settings()).execute().await.unwrap_err();
    assert!(matches!(err, RunError::Filing(_)));
    assert!(connector.publisher.events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_secret_fails_the_run() {
    let connector = Arc::new(FakeConnector::new(store(), FakeTracker::default()));
    let mut settings = settings();
    if let Some(jira) = settings.jira.as_mut() {
        jira.secret_id = "other".to_string();
    }

    let err = run(connector, settings).execute().await.unwrap_err();
    assert!(matches!(err, RunError::Secrets(_)));
}

#[tokio::test]
async fn test_handler_runs_once_per_post() {
    let connector = Arc::new(FakeConnector::new(store(), FakeTracker::default()));
    let metrics = Arc::new(RunMetrics::new().unwrap());
    let configured = ConformanceRun::new(settings(), connector.clone(), metrics.clone())
        .with_history_prefix(DAY);
    let router = create_router(Arc::new(AppState::new(Ok(configured), metrics.clone())));

    let response = router
        .clone()
        .oneshot(Request::post("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(connector.tracker.tickets().len(), 1);

    let text = metrics.encode_text().unwrap();
    assert!(text.contains("message_conformance_runs_total{result=\"ok\"} 1"));
    assert!(text.contains("message_conformance_topics_processed_total{status=\"schema_unavailable\"} 1"));
    assert!(text.contains("message_conformance_tickets_created_total 1"));
}

#[tokio::test]
async fn test_handler_reports_failed_run() {
    let tracker = FakeTracker {
        down: true,
        ..FakeTracker::default()
    };
    let connector = Arc::new(FakeConnector::new(store(), tracker));
    let metrics = Arc::new(RunMetrics::new().unwrap());
    let configured = ConformanceRun::new(settings(), connector, metrics.clone()).with_history_prefix(DAY);
    let router = create_router(Arc::new(AppState::new(Ok(configured), metrics)));

    let response = router
        .oneshot(Request::post("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
