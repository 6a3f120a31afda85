//! Error handling module
//!
//! Provides unified error types and handling for the entire application.
//! Errors carry a taxonomy tag and a machine-readable reason; rendering
//! them into sentences is left to the presentation layer.

use crate::snapshot::models::{FindingId, SnapshotId};
use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};

/// Application-wide error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AppError {
    #[error("snapshot {0} not found")]
    SnapshotNotFound(SnapshotId),

    #[error("finding {0} not found")]
    FindingNotFound(FindingId),

    #[error("file {0} not found in range")]
    FileNotFound(String),

    #[error("range selects no snapshots")]
    EmptyRange,

    #[error("unknown metric: {0}")]
    UnknownMetric(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("insufficient data: {required} samples required, {available} available")]
    InsufficientData { required: usize, available: usize },

    #[error("comparison too large: {elements} elements exceeds limit of {limit}")]
    ComparisonTooLarge { elements: usize, limit: usize },

    #[error("a snapshot already exists at {0}")]
    DuplicateTimestamp(DateTime<Utc>),

    #[error("snapshot store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Error taxonomy tag exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NotFound,
    InvalidInput,
    InsufficientData,
    ComparisonTooLarge,
    DuplicateTimestamp,
    StoreUnavailable,
    Internal,
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::SnapshotNotFound(_)
            | AppError::FindingNotFound(_)
            | AppError::FileNotFound(_)
            | AppError::EmptyRange => ErrorKind::NotFound,
            AppError::UnknownMetric(_) | AppError::InvalidInput(_) => ErrorKind::InvalidInput,
            AppError::InsufficientData { .. } => ErrorKind::InsufficientData,
            AppError::ComparisonTooLarge { .. } => ErrorKind::ComparisonTooLarge,
            AppError::DuplicateTimestamp(_) => ErrorKind::DuplicateTimestamp,
            AppError::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            AppError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Machine-readable reason token
    pub fn reason(&self) -> &'static str {
        match self {
            AppError::SnapshotNotFound(_) => "snapshot_not_found",
            AppError::FindingNotFound(_) => "finding_not_found",
            AppError::FileNotFound(_) => "file_not_found",
            AppError::EmptyRange => "empty_range",
            AppError::UnknownMetric(_) => "unknown_metric",
            AppError::InvalidInput(_) => "invalid_input",
            AppError::InsufficientData { .. } => "insufficient_data",
            AppError::ComparisonTooLarge { .. } => "comparison_too_large",
            AppError::DuplicateTimestamp(_) => "duplicate_timestamp",
            AppError::StoreUnavailable(_) => "store_unavailable",
            AppError::Internal(_) => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::InsufficientData => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::ComparisonTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorKind::DuplicateTimestamp => StatusCode::CONFLICT,
            ErrorKind::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Structured details for the response body
    fn detail(&self) -> Option<serde_json::Value> {
        match self {
            AppError::SnapshotNotFound(id) => Some(serde_json::json!({ "snapshotId": id })),
            AppError::FindingNotFound(id) => Some(serde_json::json!({ "findingId": id })),
            AppError::FileNotFound(path) => Some(serde_json::json!({ "path": path })),
            AppError::UnknownMetric(name) => Some(serde_json::json!({ "metric": name })),
            AppError::InvalidInput(field) => Some(serde_json::json!({ "field": field })),
            AppError::InsufficientData { required, available } => Some(serde_json::json!({
                "required": required,
                "available": available,
            })),
            AppError::ComparisonTooLarge { elements, limit } => Some(serde_json::json!({
                "elements": elements,
                "limit": limit,
            })),
            AppError::DuplicateTimestamp(ts) => Some(serde_json::json!({ "timestamp": ts })),
            AppError::StoreUnavailable(_) | AppError::Internal(_) | AppError::EmptyRange => None,
        }
    }
}

impl From<tokio_postgres::Error> for AppError {
    fn from(e: tokio_postgres::Error) -> Self {
        AppError::StoreUnavailable(e.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for AppError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        AppError::StoreUnavailable(e.to_string())
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        debug!("Rejected request body: {}", rejection.body_text());
        AppError::InvalidInput("body".to_string())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        debug!("Rejected path parameters: {}", rejection.body_text());
        AppError::InvalidInput("path".to_string())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        debug!("Rejected query string: {}", rejection.body_text());
        AppError::InvalidInput("query".to_string())
    }
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub code: ErrorKind,
    pub reason: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::StoreUnavailable(msg) => error!("Snapshot store unavailable: {}", msg),
            AppError::Internal(msg) => error!("Internal error: {}", msg),
            _ => {}
        }

        let body = Json(ErrorResponse {
            success: false,
            code: self.kind(),
            reason: self.reason(),
            detail: self.detail(),
        });

        (self.status(), body).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, AppError>;

/// Helper function to create a validation error
pub fn validation_error(msg: impl Into<String>) -> AppError {
    AppError::InvalidInput(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_family_shares_kind() {
        assert_eq!(AppError::SnapshotNotFound(SnapshotId(3)).kind(), ErrorKind::NotFound);
        assert_eq!(AppError::EmptyRange.kind(), ErrorKind::NotFound);
        assert_eq!(AppError::UnknownMetric("x".into()).kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_status_codes() {
        let resp = AppError::SnapshotNotFound(SnapshotId(1)).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = AppError::InsufficientData { required: 3, available: 2 }.into_response();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let resp = AppError::DuplicateTimestamp(Utc::now()).into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = AppError::FileNotFound("core.py".into()).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
