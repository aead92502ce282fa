//! Error types for the lifecycle controller, the orchestrator and API responses

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Result alias used across the crate's domain operations
pub type SwitchboardResult<T> = Result<T, SwitchboardError>;

/// Failures of the inference call itself
#[derive(Debug, Error)]
pub enum BackendError {
    /// Backend answered with a non-2xx status
    #[error("Backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// Connection refused, timeout, undecodable body
    #[error("Backend request failed: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum SwitchboardError {
    #[error("Queue not empty or model switch required; use async")]
    Admission,

    #[error("Unknown model: {model}")]
    UnknownModel { model: String },

    #[error("Timed out after {waited_secs}s waiting for the model switch lock")]
    LockTimeout { waited_secs: u64 },

    #[error("Backend readiness timeout for {model} after {timeout_secs}s. Logs:\n{logs}")]
    ReadinessTimeout {
        model: String,
        timeout_secs: u64,
        logs: String,
    },

    #[error("Failed to launch backend for {model}: {message}")]
    Launch { model: String, message: String },

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    #[error("Job is not finished: {id}")]
    JobNotFinished { id: String },

    #[error("Drain mode enabled")]
    DrainMode,

    #[error("{0}")]
    Unauthorized(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("{0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl SwitchboardError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            SwitchboardError::Admission => StatusCode::CONFLICT,
            SwitchboardError::UnknownModel { .. } => StatusCode::BAD_REQUEST,
            SwitchboardError::LockTimeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
            SwitchboardError::ReadinessTimeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
            SwitchboardError::Launch { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            SwitchboardError::Backend(BackendError::Status { status, .. }) => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            SwitchboardError::Backend(BackendError::Transport(_)) => StatusCode::BAD_GATEWAY,
            SwitchboardError::JobNotFound { .. } => StatusCode::NOT_FOUND,
            SwitchboardError::JobNotFinished { .. } => StatusCode::CONFLICT,
            SwitchboardError::DrainMode => StatusCode::CONFLICT,
            SwitchboardError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            SwitchboardError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            SwitchboardError::BadRequest(_) => StatusCode::BAD_REQUEST,
            SwitchboardError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for SwitchboardError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let message = match &self {
            SwitchboardError::Internal(err) => {
                tracing::error!(error = %err, "Internal error");
                "Internal server error".to_string()
            }
            // Upstream error bodies pass through untouched
            SwitchboardError::Backend(BackendError::Status { body, .. }) => body.clone(),
            other => other.to_string(),
        };

        let body = Json(ErrorResponse {
            error: message,
            timestamp: chrono::Utc::now(),
        });

        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    timestamp: chrono::DateTime<chrono::Utc>,
}
