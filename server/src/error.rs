//! Error type shared by the sync handlers.
//!
//! Every failure leaves the server as `{"error": ..., "details": ...}`.
//! Refusals that concern a single pushed change are not errors: they travel
//! back as a `rejected` result inside a successful push response.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Request-level validation failure, e.g. an unknown table in a pull
    #[error(transparent)]
    Engine(#[from] tillsync_engine::Error),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Push batch of {size} changes exceeds the limit of {max}")]
    BatchTooLarge { size: usize, max: usize },

    #[error("Unauthorized: {0}")]
    Unauthorized(&'static str),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Engine(e) if e.is_validation() => StatusCode::BAD_REQUEST,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::BatchTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Database(_) | AppError::Engine(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error, details) = match &self {
            AppError::Database(e) => {
                tracing::error!(error = ?e, "database error");
                ("Database error".to_string(), None)
            }
            AppError::Engine(e) if status.is_server_error() => {
                tracing::error!(error = %e, "engine error");
                ("Internal server error".to_string(), None)
            }
            AppError::Engine(e) => (e.to_string(), None),
            AppError::BadRequest(msg) => (msg.clone(), None),
            AppError::BatchTooLarge { .. } => ("Batch too large".to_string(), Some(self.to_string())),
            AppError::Unauthorized(reason) => ("Unauthorized".to_string(), Some(reason.to_string())),
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                ("Internal server error".to_string(), Some(msg.clone()))
            }
        };

        (status, Json(ErrorResponse { error, details })).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;
