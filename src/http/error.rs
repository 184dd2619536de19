//! HTTP error handling and response types.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::workflow::WorkflowError;

/// API error response body. Mirrors the success envelope so clients can
/// always check `success` first and read `message` uniformly; `error`
/// carries the machine-readable code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub success: bool,
    /// Human-readable error message
    pub message: String,
    /// Error code for programmatic handling
    pub error: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            error: code.into(),
        }
    }
}

/// Application error type for HTTP handlers.
#[derive(Debug)]
pub enum AppError {
    /// Invalid request (validation error)
    BadRequest(String),
    /// No valid session
    Unauthenticated(String),
    /// Session present but role missing
    Forbidden(String),
    /// Resource not found
    NotFound(String),
    /// Lost against the current state of the record
    Conflict(String),
    /// Internal server error
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, ApiError::new("BAD_REQUEST", msg))
            }
            AppError::Unauthenticated(msg) => (
                StatusCode::UNAUTHORIZED,
                ApiError::new("UNAUTHENTICATED", msg),
            ),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, ApiError::new("FORBIDDEN", msg)),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, ApiError::new("NOT_FOUND", msg)),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, ApiError::new("CONFLICT", msg)),
            AppError::Internal(msg) => {
                // Storage details stay in the logs, not in the response.
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError::new("INTERNAL_ERROR", "Internal server error"),
                )
            }
        };

        (status, Json(error)).into_response()
    }
}

impl From<WorkflowError> for AppError {
    fn from(err: WorkflowError) -> Self {
        match err {
            WorkflowError::Validation(msg) => AppError::BadRequest(msg),
            WorkflowError::NotFound(msg) => AppError::NotFound(msg),
            WorkflowError::Conflict(msg) => AppError::Conflict(msg),
            WorkflowError::Forbidden { .. } => AppError::Forbidden(err.to_string()),
            WorkflowError::Denied(msg) => AppError::Forbidden(msg),
            WorkflowError::Repository(e) => AppError::Internal(e.to_string()),
        }
    }
}

impl From<crate::db::repository::RepositoryError> for AppError {
    fn from(err: crate::db::repository::RepositoryError) -> Self {
        AppError::from(WorkflowError::from(err))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}
