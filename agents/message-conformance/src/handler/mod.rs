//! HTTP handler for the Message Conformance Agent
//!
//! Edge entry point for scheduled invocations. `POST /` runs one
//! validation pass and answers `OK` or `Bad Request`.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;

use crate::config::Settings;
use crate::contracts::IssueEvent;
use crate::runner::{ConformanceRun, RunError};
use crate::telemetry::RunMetrics;

/// Application state
pub struct AppState {
    /// The configured run, or why it could not be configured
    pub run: Result<ConformanceRun, RunError>,
    pub metrics: Arc<RunMetrics>,
    run_lock: Mutex<()>,
}

impl AppState {
    pub fn new(run: Result<ConformanceRun, RunError>, metrics: Arc<RunMetrics>) -> Self {
        Self {
            run,
            metrics,
            run_lock: Mutex::new(()),
        }
    }

    /// Configure from the process environment
    pub fn from_env(metrics: Arc<RunMetrics>) -> Self {
        let run = Settings::from_env()
            .map_err(RunError::from)
            .and_then(|settings| ConformanceRun::connect(settings, metrics.clone()));
        if let Err(e) = &run {
            tracing::error!(error = %e, "Agent is not configured, every run will be rejected");
        }
        Self::new(run, metrics)
    }
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", post(run_once))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub agent_id: String,
    pub agent_version: String,
    pub configured: bool,
}

/// Health check endpoint
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        agent_id: IssueEvent::AGENT_ID.to_string(),
        agent_version: IssueEvent::AGENT_VERSION.to_string(),
        configured: state.run.is_ok(),
    })
}

/// Prometheus scrape endpoint
async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.encode_text() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Could not encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Run one validation pass
async fn run_once(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let run = match &state.run {
        Ok(run) => run,
        Err(e) => {
            tracing::error!(error = %e, "Rejecting run");
            state.metrics.record_failed_run();
            return (StatusCode::BAD_REQUEST, "Bad Request");
        }
    };

    let _guard = state.run_lock.lock().await;
    match run.execute().await {
        Ok(_) => (StatusCode::NO_CONTENT, "OK"),
        Err(_) => (StatusCode::BAD_REQUEST, "Bad Request"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SettingsError;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn unconfigured() -> Arc<AppState> {
        let metrics = Arc::new(RunMetrics::new().unwrap());
        Arc::new(AppState::new(
            Err(RunError::Settings(SettingsError::Missing(
                "DATA_CATALOGS_BUCKET_NAME",
            ))),
            metrics,
        ))
    }

    #[tokio::test]
    async fn test_health() {
        let response = create_router(unconfigured())
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(health["agent_id"], IssueEvent::AGENT_ID);
        assert_eq!(health["configured"], false);
    }

    #[tokio::test]
    async fn test_unconfigured_run_is_bad_request() {
        let state = unconfigured();
        let response = create_router(state.clone())
            .oneshot(Request::post("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let text = state.metrics.encode_text().unwrap();
        assert!(text.contains("runs_total{result=\"failed\"} 1"));
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let response = create_router(unconfigured())
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
