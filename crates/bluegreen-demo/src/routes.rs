//! HTTP handlers.
//!
//! Every response is JSON and carries the configured environment, so a
//! caller going through the main service can tell which side answered.

use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::IntoResponse;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::debug;

use crate::config::DemoConfig;

/// Shared state for handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<DemoConfig>,
    pub started_at: DateTime<Utc>,
    started: Instant,
}

impl AppState {
    pub fn new(config: DemoConfig) -> Self {
        Self {
            config: Arc::new(config),
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: String,
    pub environment: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub status: &'static str,
    pub version: String,
    pub environment: String,
}

#[derive(Debug, Serialize)]
pub struct RootResponse {
    pub message: String,
    pub version: String,
    pub environment: String,
    pub hostname: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct InfoResponse {
    pub name: String,
    pub version: String,
    pub environment: String,
    pub description: &'static str,
    pub uptime_seconds: u64,
    pub started_at: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    environment: String,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    debug!(path = "/health", "request");
    Json(HealthResponse {
        status: "healthy",
        version: state.config.version.clone(),
        environment: state.config.environment.clone(),
        timestamp: timestamp(),
    })
}

/// GET /ready
pub async fn ready(State(state): State<AppState>) -> Json<ReadyResponse> {
    debug!(path = "/ready", "request");
    Json(ReadyResponse {
        status: "ready",
        version: state.config.version.clone(),
        environment: state.config.environment.clone(),
    })
}

/// GET /
pub async fn root(State(state): State<AppState>) -> Json<RootResponse> {
    debug!(path = "/", "request");
    let config = &state.config;
    Json(RootResponse {
        message: format!("Hello from the {} environment", config.environment),
        version: config.version.clone(),
        environment: config.environment.clone(),
        hostname: config.hostname().to_string(),
        timestamp: timestamp(),
    })
}

/// GET /api/info
pub async fn info(State(state): State<AppState>) -> Json<InfoResponse> {
    debug!(path = "/api/info", "request");
    Json(InfoResponse {
        name: state.config.app_name.clone(),
        version: state.config.version.clone(),
        environment: state.config.environment.clone(),
        description: "Blue/green deployment demo service",
        uptime_seconds: state.uptime_seconds(),
        started_at: state
            .started_at
            .to_rfc3339_opts(SecondsFormat::Millis, true),
    })
}

/// GET /error, always 500. Used to exercise failure paths.
pub async fn error(State(state): State<AppState>) -> impl IntoResponse {
    debug!(path = "/error", "request");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: "simulated failure".to_string(),
            environment: state.config.environment.clone(),
        }),
    )
}

pub async fn not_found(State(state): State<AppState>, uri: Uri) -> impl IntoResponse {
    debug!(path = %uri.path(), "no route");
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: format!("no route for {}", uri.path()),
            environment: state.config.environment.clone(),
        }),
    )
}
