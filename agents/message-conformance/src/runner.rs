//! One invocation, end to end
//!
//! Discovery, validation, ticket filing and issue publishing, in that
//! order. Validation problems never fail a run; missing configuration,
//! ticket filing and publishing failures do.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use conform_core::budget::BudgetAllocator;
use conform_core::processor::{ProcessorSettings, RunSummary, TopicProcessor};
use conform_core::resolver::SchemaResolver;
use conform_core::store::{BlobStore, BucketSchemaSource};

use crate::catalog::CatalogScanner;
use crate::client::{
    http_client, AccessTokenSource, ClientError, GcsBlobStore, JiraClient, PubSubPublisher,
    SecretManagerClient, SecretSource,
};
use crate::config::{JiraSettings, Settings, SettingsError};
use crate::contracts::{RunReport, TopicOutcome};
use crate::publish::{EventPublisher, IssuePublisher};
use crate::telemetry::RunMetrics;
use crate::tickets::{FilingTarget, TicketError, TicketFiler, Ticketing};

/// Timeout of a single HTTP request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Run failures
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Configuration error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Could not set up service clients: {0}")]
    Setup(ClientError),

    #[error("Could not read tracker credentials: {0}")]
    Secrets(ClientError),

    #[error("Ticket filing failed: {0}")]
    Filing(#[from] TicketError),

    #[error("Issue publishing failed: {0}")]
    Publish(ClientError),
}

/// Builds the collaborators of a run
pub trait ServiceConnector: Send + Sync {
    fn blob_store(&self) -> Arc<dyn BlobStore>;

    fn secrets(&self) -> Arc<dyn SecretSource>;

    fn publisher(&self) -> Arc<dyn EventPublisher>;

    /// Tracker client authenticated with `api_token`
    fn ticketing(&self, jira: &JiraSettings, api_token: &str) -> Arc<dyn Ticketing>;
}

/// Collaborators talking to the real services
pub struct HttpConnector {
    client: reqwest::Client,
    store: Arc<GcsBlobStore>,
    secrets: Arc<SecretManagerClient>,
    publisher: Arc<PubSubPublisher>,
}

impl HttpConnector {
    pub fn from_settings(settings: &Settings) -> Result<Self, ClientError> {
        let client = http_client(REQUEST_TIMEOUT)?;
        let tokens = Arc::new(match &settings.access_token {
            Some(token) => AccessTokenSource::fixed(token.clone()),
            None => AccessTokenSource::metadata_server(client.clone()),
        });
        let endpoints = &settings.endpoints;

        Ok(Self {
            store: Arc::new(GcsBlobStore::new(
                client.clone(),
                endpoints.storage.clone(),
                tokens.clone(),
            )),
            secrets: Arc::new(SecretManagerClient::new(
                client.clone(),
                endpoints.secrets.clone(),
                tokens.clone(),
            )),
            publisher: Arc::new(PubSubPublisher::new(
                client.clone(),
                endpoints.pubsub.clone(),
                tokens,
            )),
            client,
        })
    }
}

impl ServiceConnector for HttpConnector {
    fn blob_store(&self) -> Arc<dyn BlobStore> {
        self.store.clone()
    }

    fn secrets(&self) -> Arc<dyn SecretSource> {
        self.secrets.clone()
    }

    fn publisher(&self) -> Arc<dyn EventPublisher> {
        self.publisher.clone()
    }

    fn ticketing(&self, jira: &JiraSettings, api_token: &str) -> Arc<dyn Ticketing> {
        Arc::new(JiraClient::new(
            self.client.clone(),
            jira.server.clone(),
            jira.user.clone(),
            api_token,
        ))
    }
}

/// A configured invocation
pub struct ConformanceRun {
    settings: Settings,
    connector: Arc<dyn ServiceConnector>,
    metrics: Arc<RunMetrics>,
    history_prefix: Option<String>,
}

impl ConformanceRun {
    pub fn new(
        settings: Settings,
        connector: Arc<dyn ServiceConnector>,
        metrics: Arc<RunMetrics>,
    ) -> Self {
        Self {
            settings,
            connector,
            metrics,
            history_prefix: None,
        }
    }

    /// Connect to the real services
    pub fn connect(settings: Settings, metrics: Arc<RunMetrics>) -> Result<Self, RunError> {
        let connector = HttpConnector::from_settings(&settings).map_err(RunError::Setup)?;
        Ok(Self::new(settings, Arc::new(connector), metrics))
    }

    /// Validate the archives under `prefix` instead of yesterday's
    pub fn with_history_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.history_prefix = Some(prefix.into());
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub async fn execute(&self) -> Result<RunReport, RunError> {
        let result = self.execute_inner().await;
        match &result {
            Ok(report) => self.metrics.record_run(report),
            Err(e) => {
                tracing::error!(error = %e, "Run failed");
                self.metrics.record_failed_run();
            }
        }
        result
    }

    async fn execute_inner(&self) -> Result<RunReport, RunError> {
        let mut report = RunReport::start(Uuid::new_v4());
        tracing::info!(run_id = %report.run_id, "Starting conformance run");

        let store = self.connector.blob_store();
        let bindings = CatalogScanner::new(store.clone(), &self.settings.catalogs_bucket)
            .scan()
            .await;

        let resolver = SchemaResolver::new(Arc::new(BucketSchemaSource::new(
            store.clone(),
            &self.settings.schemas_bucket,
        )));
        let allocator = BudgetAllocator::new(self.settings.timeout, bindings.len())
            .with_byte_quota(self.settings.max_response_bytes);
        let mut processor_settings = ProcessorSettings::yesterday();
        if let Some(prefix) = &self.history_prefix {
            processor_settings = processor_settings.with_history_prefix(prefix.clone());
        }

        let RunSummary { topics, findings } =
            TopicProcessor::new(store, resolver, processor_settings, allocator)
                .run(&bindings)
                .await;

        let mut findings_by_kind = BTreeMap::new();
        for finding in findings.iter() {
            *findings_by_kind
                .entry(finding.kind.as_str().to_string())
                .or_insert(0) += 1;
        }
        for topic in &topics {
            self.metrics.record_topic(topic);
        }
        report.topics = topics.iter().map(TopicOutcome::from).collect();
        report.findings_by_kind = findings_by_kind;
        let findings = findings.into_vec();

        match &self.settings.jira {
            Some(jira) => {
                let api_token = self
                    .connector
                    .secrets()
                    .get_secret(&jira.secret_project, &jira.secret_id)
                    .await
                    .map_err(RunError::Secrets)?;
                let tracker = self.connector.ticketing(jira, &api_token);
                let target = FilingTarget {
                    project: jira.project.clone(),
                    board: jira.board,
                    epic: jira.epic.clone(),
                };
                let filed = TicketFiler::new(tracker.as_ref(), target)
                    .file(&findings)
                    .await?;
                report.tickets_created = filed.tickets_created;
                report.comments_added = filed.comments_added;
            }
            None => {
                tracing::info!(
                    findings = findings.len(),
                    "Ticket filing is not configured, findings are only logged"
                );
            }
        }

        if let Some(topic) = self.settings.topic_path() {
            let publisher = self.connector.publisher();
            report.issues_published = IssuePublisher::new(publisher.as_ref(), topic, report.run_id)
                .publish(&findings)
                .await
                .map_err(RunError::Publish)?;
        }

        let report = report.finish();
        tracing::info!(
            run_id = %report.run_id,
            topics = report.topics.len(),
            findings = report.findings_total(),
            tickets_created = report.tickets_created,
            comments_added = report.comments_added,
            issues_published = report.issues_published,
            duration_ms = report.duration_ms,
            "Conformance run finished"
        );
        Ok(report)
    }
}
