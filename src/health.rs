// Health and status HTTP server (axum).
//
// GET /health reports engine, ingestion and webhook state and answers 503
// while the engine isn't running. POST /test-webhook fires the test
// envelope through the real sink.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::engine::Engine;
use crate::webhook::payload::{format_timestamp, BOT_NAME, VERSION};

/// Static facts about the deployment shown by the status routes.
#[derive(Debug, Clone)]
pub struct AppInfo {
    pub log_level: String,
    pub environment: String,
    pub polling_interval: Duration,
}

impl AppInfo {
    pub fn from_config(config: &Config) -> Self {
        Self {
            log_level: config.log_level.clone(),
            environment: config.environment.clone(),
            polling_interval: config.polling_interval,
        }
    }
}

#[derive(Clone)]
pub struct HealthState {
    pub engine: Arc<Engine>,
    pub info: Arc<AppInfo>,
    pub started: Instant,
}

impl HealthState {
    pub fn new(engine: Arc<Engine>, info: AppInfo) -> Self {
        Self {
            engine,
            info: Arc::new(info),
            started: Instant::now(),
        }
    }
}

/// Serve until `shutdown` is cancelled.
pub async fn run_server(state: HealthState, port: u16, shutdown: CancellationToken) -> Result<()> {
    let app = build_router(state);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind health server to {addr}"))?;
    info!("Health server listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("Health server failed")?;
    Ok(())
}

pub fn build_router(state: HealthState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/test-webhook", post(test_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<HealthState>) -> impl IntoResponse {
    let status = state.engine.status();
    let (code, label) = if status.running {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    };

    let body = json!({
        "status": label,
        "timestamp": format_timestamp(Utc::now()),
        "version": VERSION,
        "uptime_secs": state.started.elapsed().as_secs(),
        "ingestion": status.ingestion,
        "webhook": status.webhook,
        "config": {
            "target_user": status.target_user,
            "log_level": state.info.log_level,
            "environment": state.info.environment,
            "mode": status.mode,
        }
    });

    (code, Json(body))
}

async fn index(State(state): State<HealthState>) -> impl IntoResponse {
    let engine = &state.engine;
    let status = if engine.is_running() { "running" } else { "stopped" };
    Json(json!({
        "name": BOT_NAME,
        "version": VERSION,
        "description": "Twitter mention detection bot",
        "status": status,
        "target_user": engine.target_user(),
        "mode": engine.mode(),
        "polling_interval_minutes": state.info.polling_interval.as_secs_f64() / 60.0,
    }))
}

async fn test_webhook(State(state): State<HealthState>) -> impl IntoResponse {
    info!("Manual webhook test requested");
    let result = state.engine.send_test().await;
    let message = if result.success {
        "Test webhook sent successfully"
    } else {
        "Test webhook failed"
    };

    Json(json!({
        "success": result.success,
        "message": message,
        "details": result,
    }))
}
