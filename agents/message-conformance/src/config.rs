//! Environment configuration
//!
//! Settings are read once per invocation. Empty values count as unset.

use std::time::Duration;
use thiserror::Error;

use conform_core::budget::DEFAULT_TOTAL_TIMEOUT;

pub const DEFAULT_STORAGE_API_URL: &str = "https://storage.googleapis.com";
pub const DEFAULT_SECRETS_API_URL: &str = "https://secretmanager.googleapis.com";
pub const DEFAULT_PUBSUB_API_URL: &str = "https://pubsub.googleapis.com";

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettingsError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {var}: {value}")]
    Invalid { var: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, SettingsError>;

/// Issue tracker settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JiraSettings {
    /// Project key new tickets are created in
    pub project: String,
    /// Scrum board whose sprint receives new tickets
    pub board: Option<u64>,
    /// Epic new tickets are linked to
    pub epic: Option<String>,
    pub server: String,
    pub user: String,
    /// Secret holding the API token
    pub secret_id: String,
    /// Project owning the secret
    pub secret_project: String,
}

/// Service endpoints, overridable for emulators
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub storage: String,
    pub secrets: String,
    pub pubsub: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            storage: DEFAULT_STORAGE_API_URL.to_string(),
            secrets: DEFAULT_SECRETS_API_URL.to_string(),
            pubsub: DEFAULT_PUBSUB_API_URL.to_string(),
        }
    }
}

/// Settings of one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub catalogs_bucket: String,
    pub schemas_bucket: String,
    /// Total time for one invocation
    pub timeout: Duration,
    /// Quota on decompressed bytes for one invocation
    pub max_response_bytes: Option<u64>,
    pub project_id: Option<String>,
    /// Ticket filing, `None` when not fully configured
    pub jira: Option<JiraSettings>,
    /// Topic receiving published issues
    pub topic_name: Option<String>,
    /// Fixed bearer token, the metadata server is asked otherwise
    pub access_token: Option<String>,
    pub endpoints: Endpoints,
}

impl Settings {
    /// Load from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from any key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let require = |key: &'static str| get(key).ok_or(SettingsError::Missing(key));

        let catalogs_bucket = require("DATA_CATALOGS_BUCKET_NAME")?;
        let schemas_bucket = require("SCHEMAS_BUCKET_NAME")?;

        let timeout = match get("TIMEOUT") {
            Some(value) => Duration::from_secs(parse_number("TIMEOUT", &value)?),
            None => DEFAULT_TOTAL_TIMEOUT,
        };

        let max_response_bytes = get("MAX_RESPONSE_SIZE_MB")
            .map(|value| parse_number("MAX_RESPONSE_SIZE_MB", &value))
            .transpose()?
            .map(|mb| mb.saturating_mul(1024 * 1024));

        let project_id = get("PROJECT_ID");

        let jira = match (
            get("JIRA_PROJECT"),
            get("JIRA_SERVER"),
            get("JIRA_USER"),
            get("JIRA_SECRET_ID"),
        ) {
            (Some(project), Some(server), Some(user), Some(secret_id)) => Some(JiraSettings {
                project,
                board: get("JIRA_BOARD")
                    .map(|value| parse_number("JIRA_BOARD", &value))
                    .transpose()?,
                epic: get("JIRA_EPIC"),
                server: server.trim_end_matches('/').to_string(),
                user,
                secret_id,
                secret_project: project_id.clone().ok_or(SettingsError::Missing("PROJECT_ID"))?,
            }),
            _ => None,
        };

        let defaults = Endpoints::default();
        let endpoints = Endpoints {
            storage: get("STORAGE_API_URL").unwrap_or(defaults.storage),
            secrets: get("SECRETS_API_URL").unwrap_or(defaults.secrets),
            pubsub: get("PUBSUB_API_URL").unwrap_or(defaults.pubsub),
        };

        Ok(Self {
            catalogs_bucket,
            schemas_bucket,
            timeout,
            max_response_bytes,
            project_id,
            jira,
            topic_name: get("TOPIC_NAME"),
            access_token: get("GCP_ACCESS_TOKEN"),
            endpoints,
        })
    }

    /// Fully qualified issues topic
    ///
    /// A bare topic name is qualified with the project id.
    pub fn topic_path(&self) -> Option<String> {
        let topic = self.topic_name.as_deref()?;
        if topic.starts_with("projects/") {
            return Some(topic.to_string());
        }
        match &self.project_id {
            Some(project) => Some(format!("projects/{project}/topics/{topic}")),
            None => {
                tracing::warn!(topic = %topic, "Issues topic is not qualified and PROJECT_ID is unset");
                None
            }
        }
    }
}

fn parse_number(var: &'static str, value: &str) -> Result<u64> {
    value.trim().parse().map_err(|_| SettingsError::Invalid {
        var,
        value: value.to_string(),
    })
}
