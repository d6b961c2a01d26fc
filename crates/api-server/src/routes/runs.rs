//! Run control-plane endpoints

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use agent_runner::AgentInfo;
use conductor_core::run::{Event, Run, RunStatus, RunSummary, ToolCallRecord};

use super::{error, runner_error, storage_error, RouteError};
use crate::state::AppState;

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StartRunRequest {
    pub agent_id: String,
    pub prompt: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResumeRunRequest {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Only events strictly after this RFC 3339 timestamp
    #[serde(default)]
    pub after: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct StartRunResponse {
    pub run_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct ControlResponse {
    pub run_id: Uuid,
    pub status: String,
}

impl ControlResponse {
    fn new(run_id: Uuid, status: impl Into<String>) -> Json<Self> {
        Json(Self {
            run_id,
            status: status.into(),
        })
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/agents
async fn list_agents(State(state): State<AppState>) -> Json<Vec<AgentInfo>> {
    Json(state.agents().list())
}

/// POST /api/runs - start a run in the background
async fn start_run(
    State(state): State<AppState>,
    Json(req): Json<StartRunRequest>,
) -> Result<(StatusCode, Json<StartRunResponse>), RouteError> {
    if req.prompt.trim().is_empty() {
        return Err(error(StatusCode::BAD_REQUEST, "prompt must not be empty"));
    }

    let started = state
        .orchestrator()
        .start_run(&req.agent_id, req.prompt)
        .await
        .map_err(runner_error)?;

    info!("Accepted run {} for agent {}", started.run_id, req.agent_id);
    Ok((
        StatusCode::ACCEPTED,
        Json(StartRunResponse {
            run_id: started.run_id,
        }),
    ))
}

/// GET /api/runs - newest first
async fn list_runs(State(state): State<AppState>) -> Result<Json<Vec<RunSummary>>, RouteError> {
    let runs = state.storage().list_runs().await.map_err(storage_error)?;
    Ok(Json(runs.iter().map(RunSummary::from).collect()))
}

async fn load_run(state: &AppState, run_id: Uuid) -> Result<Run, RouteError> {
    state
        .storage()
        .get_run(run_id)
        .await
        .map_err(storage_error)?
        .ok_or_else(|| error(StatusCode::NOT_FOUND, format!("Run {} not found", run_id)))
}

/// GET /api/runs/{id}
async fn get_run(State(state): State<AppState>, Path(run_id): Path<Uuid>) -> Result<Json<Run>, RouteError> {
    Ok(Json(load_run(&state, run_id).await?))
}

/// GET /api/runs/{id}/events
async fn get_events(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<Event>>, RouteError> {
    load_run(&state, run_id).await?;
    let events = state
        .storage()
        .get_events(run_id, query.after)
        .await
        .map_err(storage_error)?;
    Ok(Json(events))
}

/// GET /api/runs/{id}/tool-calls
async fn get_tool_calls(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<Vec<ToolCallRecord>>, RouteError> {
    load_run(&state, run_id).await?;
    let events = state
        .storage()
        .get_events(run_id, None)
        .await
        .map_err(storage_error)?;
    Ok(Json(ToolCallRecord::pair(&events)))
}

/// POST /api/runs/{id}/stop
async fn stop_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<ControlResponse>, RouteError> {
    state.orchestrator().stop_run(run_id).await.map_err(runner_error)?;
    Ok(ControlResponse::new(run_id, "stopping"))
}

/// POST /api/runs/{id}/pause
async fn pause_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<ControlResponse>, RouteError> {
    state.orchestrator().pause_run(run_id).await.map_err(runner_error)?;
    Ok(ControlResponse::new(run_id, RunStatus::Paused.as_str()))
}

/// POST /api/runs/{id}/resume
async fn resume_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    body: Bytes,
) -> Result<Json<ControlResponse>, RouteError> {
    let req: ResumeRunRequest = if body.is_empty() {
        ResumeRunRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| error(StatusCode::BAD_REQUEST, format!("Invalid resume body: {}", e)))?
    };
    let message = req.message;
    state
        .orchestrator()
        .resume_run(run_id, message)
        .await
        .map_err(runner_error)?;
    Ok(ControlResponse::new(run_id, RunStatus::Running.as_str()))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/agents", get(list_agents))
        .route("/api/runs", get(list_runs).post(start_run))
        .route("/api/runs/{id}", get(get_run))
        .route("/api/runs/{id}/events", get(get_events))
        .route("/api/runs/{id}/tool-calls", get(get_tool_calls))
        .route("/api/runs/{id}/stop", post(stop_run))
        .route("/api/runs/{id}/pause", post(pause_run))
        .route("/api/runs/{id}/resume", post(resume_run))
}
