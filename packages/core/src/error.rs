use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::trial::{StoreError, TrialError};

/// Unified application error.
///
/// Every layer's error converts into this at the HTTP boundary, where it is
/// rendered as `{ "error": "..." }` with a matching status code.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TrialError> for AppError {
    fn from(err: TrialError) -> Self {
        match err {
            TrialError::InvalidInput(msg) => AppError::BadRequest(msg),
            e @ TrialError::AlreadyActive { .. } => AppError::Conflict(e.to_string()),
            e @ TrialError::InvalidDuration { .. } => AppError::Config(e.to_string()),
            TrialError::Store(e) => AppError::Store(e),
        }
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Config(_)
            | AppError::Store(_)
            | AppError::Database(_)
            | AppError::Metrics(_)
            | AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{}", self);
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
