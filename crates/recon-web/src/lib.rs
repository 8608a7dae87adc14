//! HTTP trigger surface for the sync jobs.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use recon_core::{JobId, SyncMode};
use recon_sync::{JobRegistry, SyncError};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "recon-web";

#[derive(Clone)]
pub struct AppState {
    pub registry: JobRegistry,
}

impl AppState {
    pub fn new(registry: JobRegistry) -> Self {
        Self { registry }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/jobs", get(jobs_handler))
        .route("/jobs/{job}/full", post(full_sync_handler))
        .route("/jobs/{job}/delta", post(delta_sync_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "serving sync triggers");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

pub fn port_from_env() -> u16 {
    std::env::var("RECON_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000)
}

async fn health_handler() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}

async fn jobs_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(state.registry.statuses().await).into_response()
}

async fn full_sync_handler(
    State(state): State<Arc<AppState>>,
    Path(job): Path<String>,
) -> Response {
    trigger(&state, &job, SyncMode::Full).await
}

async fn delta_sync_handler(
    State(state): State<Arc<AppState>>,
    Path(job): Path<String>,
) -> Response {
    trigger(&state, &job, SyncMode::Delta).await
}

async fn trigger(state: &AppState, job: &str, mode: SyncMode) -> Response {
    let job: JobId = match job.parse() {
        Ok(job) => job,
        Err(err) => return error_response(StatusCode::NOT_FOUND, err.to_string()),
    };
    let orchestrator = match state.registry.get(job) {
        Ok(orchestrator) => orchestrator.clone(),
        Err(err) => return sync_error_response(err),
    };
    // Runs are never cancelled mid-way: a client that goes away only loses the response.
    let run = tokio::spawn(async move { orchestrator.run(mode).await });
    match run.await {
        Ok(Ok(stats)) => Json(stats).into_response(),
        Ok(Err(err)) => sync_error_response(err),
        Err(err) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("{job} sync task ended abnormally: {err}"),
        ),
    }
}

fn sync_error_response(err: SyncError) -> Response {
    let status = match &err {
        SyncError::AlreadyRunning { .. } => StatusCode::CONFLICT,
        SyncError::UnknownJob(_) => StatusCode::NOT_FOUND,
        SyncError::Fetch { .. } => StatusCode::BAD_GATEWAY,
        SyncError::Checkpoint { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status != StatusCode::CONFLICT {
        warn!(error = %err, "sync trigger failed");
    }
    error_response(status, err.to_string())
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}
