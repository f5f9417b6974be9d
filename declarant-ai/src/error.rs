//! Error types for declarant-ai HTTP handlers
//!
//! Every error renders as `{"error": {"code", "message"}}` with a matching
//! status code.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::{BatchError, ExportError, NormalizeError, SpreadsheetError};

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409), e.g. row already classified or batch already finished
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Upload over the classifiable row cap (413)
    #[error("{0}")]
    BatchTooLarge(String),

    /// Upload over the file size cap (413)
    #[error("{0}")]
    FileTooLarge(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Generic error
    #[error(transparent)]
    Other(#[from] anyhow::Error),

    /// declarant-common error not covered by a specific status
    #[error("Common error: {0}")]
    Common(declarant_common::Error),
}

impl From<declarant_common::Error> for ApiError {
    fn from(err: declarant_common::Error) -> Self {
        use declarant_common::Error;
        match err {
            Error::NotFound(msg) => ApiError::NotFound(msg),
            Error::Conflict(msg) => ApiError::Conflict(msg),
            Error::InvalidInput(msg) | Error::Config(msg) => ApiError::BadRequest(msg),
            other => ApiError::Common(other),
        }
    }
}

impl From<SpreadsheetError> for ApiError {
    fn from(err: SpreadsheetError) -> Self {
        match err {
            SpreadsheetError::FileTooLarge { .. } => ApiError::FileTooLarge(err.to_string()),
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}

impl From<NormalizeError> for ApiError {
    fn from(err: NormalizeError) -> Self {
        match err {
            NormalizeError::BatchTooLarge { .. } => ApiError::BatchTooLarge(err.to_string()),
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}

impl From<BatchError> for ApiError {
    fn from(err: BatchError) -> Self {
        match err {
            BatchError::Spreadsheet(e) => e.into(),
            BatchError::Normalize(e) => e.into(),
            BatchError::StoreWrite(e) => ApiError::Internal(format!("Result store write failed: {}", e)),
        }
    }
}

impl From<ExportError> for ApiError {
    fn from(err: ExportError) -> Self {
        match err {
            ExportError::UnsupportedFormat(_) => ApiError::BadRequest(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::BatchTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, "BATCH_TOO_LARGE", msg),
            ApiError::FileTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, "FILE_TOO_LARGE", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Other(ref err) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", err.to_string()),
            ApiError::Common(ref err) => (StatusCode::INTERNAL_SERVER_ERROR, "COMMON_ERROR", err.to_string()),
        };

        if status.is_server_error() {
            tracing::error!(code = error_code, "{}", message);
        }

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
