//! Route handlers

pub mod health;
pub mod runs;

use axum::{http::StatusCode, routing::get, Json, Router};
use serde::Serialize;

use agent_runner::RunnerError;

use crate::hub::ws_handler;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub type RouteError = (StatusCode, Json<ErrorResponse>);

pub fn error(status: StatusCode, message: impl Into<String>) -> RouteError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

impl From<RunnerError> for ErrorResponse {
    fn from(err: RunnerError) -> Self {
        Self {
            error: err.to_string(),
        }
    }
}

/// Map a runner error onto an HTTP status
pub fn runner_error(err: RunnerError) -> RouteError {
    let status = match &err {
        RunnerError::AgentNotFound { .. } | RunnerError::RunNotFound { .. } => StatusCode::NOT_FOUND,
        RunnerError::RunNotActive { .. } => StatusCode::CONFLICT,
        RunnerError::PendingQueueFull { .. } => StatusCode::TOO_MANY_REQUESTS,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(err.into()))
}

pub fn storage_error(err: conductor_core::Error) -> RouteError {
    match err {
        conductor_core::Error::RunNotFound(id) => {
            error(StatusCode::NOT_FOUND, format!("Run {} not found", id))
        }
        other => error(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
    }
}

/// Every HTTP and WebSocket route
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(runs::router())
        .route("/ws", get(ws_handler))
        .with_state(state)
}
