use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::ws;
use crate::config::ScanConfig;
use crate::errors::JobError;
use crate::orchestrator::{JobConfig, PhaseSelection, ScanOrchestrator};
use crate::registry::JobRegistry;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub registry: JobRegistry,
    pub config: ScanConfig,
}

pub type SharedState = Arc<AppState>;

// ── Request / response payloads ───────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartScanRequest {
    pub project_paths: Vec<PathBuf>,
    #[serde(default)]
    pub selections: HashMap<PathBuf, PhaseSelection>,
    #[serde(default)]
    pub job_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartScanResponse {
    pub job_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputResponse {
    pub job_id: String,
    pub lines: Vec<String>,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    JobNotFound { job_id: String, hints: Vec<String> },
    BadRequest(String),
    Conflict(String),
    Internal(String),
}

impl ApiError {
    pub fn job_not_found(job_id: &str, state: &AppState) -> Self {
        let retention = state.registry.policy().retention.as_secs();
        ApiError::JobNotFound {
            job_id: job_id.to_string(),
            hints: vec![
                "Check the jobId returned by POST /api/scan".to_string(),
                format!(
                    "The job may have expired: finished jobs are kept for {} seconds",
                    retention
                ),
                "Jobs live in server memory and do not survive a restart".to_string(),
            ],
        }
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::EmptyProjectList => ApiError::BadRequest(err.to_string()),
            JobError::InvalidTransition { .. } | JobError::AlreadyRunning(_) => {
                ApiError::Conflict(err.to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::JobNotFound { job_id, hints } => (
                StatusCode::NOT_FOUND,
                serde_json::json!({
                    "error": format!("Job '{}' not found", job_id),
                    "jobId": job_id,
                    "hints": hints,
                }),
            ),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, serde_json::json!({"error": msg})),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, serde_json::json!({"error": msg})),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({"error": msg}),
            ),
        };
        (status, Json(body)).into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/scan", post(start_scan))
        .route("/api/scan/{id}", get(get_scan))
        .route("/api/scan/{id}/output", get(get_output))
        .route("/api/scan/{id}/cancel", post(cancel_scan))
        .route("/api/scan/{id}/stream", get(ws::stream_handler))
        .route("/health", get(health_check))
}

fn lookup(state: &AppState, id: &str) -> Result<Arc<ScanOrchestrator>, ApiError> {
    state
        .registry
        .get(id)
        .ok_or_else(|| ApiError::job_not_found(id, state))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn start_scan(
    State(state): State<SharedState>,
    Json(req): Json<StartScanRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let job_id = req
        .job_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let mut config = JobConfig::new(job_id.clone(), req.project_paths)?;
    for (project, selection) in req.selections {
        config = config.with_selection(project, selection);
    }
    let projects = config.projects().len();

    let job = Arc::new(ScanOrchestrator::new(config, state.config.phases()));
    state
        .registry
        .register_unless_active(job_id.clone(), Arc::clone(&job))?;
    job.start()?;
    info!(job_id = %job_id, projects, "scan job accepted");

    Ok((StatusCode::ACCEPTED, Json(StartScanResponse { job_id })))
}

async fn get_scan(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = lookup(&state, &id)?;
    Ok(Json(job.snapshot()))
}

async fn get_output(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = lookup(&state, &id)?;
    Ok(Json(OutputResponse {
        job_id: id,
        lines: job.output(),
    }))
}

async fn cancel_scan(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = lookup(&state, &id)?;
    let snapshot = job.cancel()?;
    Ok(Json(snapshot))
}
