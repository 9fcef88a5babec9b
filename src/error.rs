//! Error handling module
//!
//! Provides unified error types and handling for the entire application.

use crate::store::StoreError;
use crate::transfer::validation::ValidationReport;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Transaction {transaction_id} rolled back: {reason}")]
    TransactionFailure {
        transaction_id: String,
        reason: String,
    },

    /// The governance log row itself could not be written
    #[error("Governance log write failed: {reason}")]
    GovernanceWrite {
        transaction_id: Option<String>,
        reason: String,
    },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Upload rejected: {} issue(s)", .0.total_issues)]
    ValidationFailed(ValidationReport),

    #[error("Malformed bundle: {0}")]
    MalformedBundle(String),

    #[error("Integrity check failed: expected hash {expected}, computed {actual}")]
    IntegrityCheckFailed { expected: String, actual: String },

    #[error("Backup failed: {0}")]
    BackupFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Itemized upload issues (`issues`, `totalIssues`)
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationReport>,
}

impl AppError {
    /// Stable machine-readable code, also written to failure log entries
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Store(StoreError::InvalidTransactionState(_)) => "INVALID_TRANSACTION_STATE",
            AppError::Store(StoreError::Pool(_)) => "POOL_EXHAUSTED",
            AppError::Store(_) => "DATABASE_ERROR",
            AppError::TransactionFailure { .. } => "TRANSACTION_FAILURE",
            AppError::GovernanceWrite { .. } => "GOVERNANCE_WRITE_FAILED",
            AppError::Parse(_) => "PARSE_ERROR",
            AppError::Validation(_) | AppError::ValidationFailed(_) => "VALIDATION_ERROR",
            AppError::MalformedBundle(_) => "MALFORMED_BUNDLE",
            AppError::IntegrityCheckFailed { .. } => "INTEGRITY_CHECK_FAILED",
            AppError::BackupFailed(_) => "BACKUP_FAILED",
            AppError::Io(_) => "IO_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Store(StoreError::Pool(_)) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Store(StoreError::UnknownColumn { .. }) => StatusCode::BAD_REQUEST,
            AppError::Store(_)
            | AppError::TransactionFailure { .. }
            | AppError::GovernanceWrite { .. }
            | AppError::BackupFailed(_)
            | AppError::Io(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Parse(_)
            | AppError::Validation(_)
            | AppError::ValidationFailed(_)
            | AppError::MalformedBundle(_)
            | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::IntegrityCheckFailed { .. } => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        let (message, details, validation) = match self {
            AppError::Store(e) => {
                error!("Store error: {:?}", e);
                ("A database error occurred".to_string(), Some(e.to_string()), None)
            }
            AppError::TransactionFailure {
                transaction_id,
                reason,
            } => {
                error!("Transaction {} failed: {}", transaction_id, reason);
                (
                    "The operation was rolled back".to_string(),
                    Some(format!("transaction {}: {}", transaction_id, reason)),
                    None,
                )
            }
            AppError::GovernanceWrite {
                transaction_id,
                reason,
            } => {
                error!("Governance log write failed: {}", reason);
                let message = match &transaction_id {
                    Some(tx) => format!("Audit record could not be written; transaction {} was rolled back", tx),
                    None => "Audit record could not be written".to_string(),
                };
                (message, Some(reason), None)
            }
            AppError::BackupFailed(msg) => {
                error!("Backup failed: {}", msg);
                ("Pre-write backup failed; nothing was changed".to_string(), Some(msg), None)
            }
            AppError::Io(e) => {
                error!("I/O error: {:?}", e);
                ("A file system error occurred".to_string(), Some(e.to_string()), None)
            }
            AppError::Internal(msg) => {
                error!("Internal error: {}", msg);
                ("An internal error occurred".to_string(), Some(msg), None)
            }
            AppError::ValidationFailed(report) => (
                format!("Upload rejected: {} validation issue(s)", report.total_issues),
                None,
                Some(report),
            ),
            AppError::IntegrityCheckFailed { expected, actual } => (
                "Bundle hash does not match its tables".to_string(),
                Some(format!("expected {}, computed {}", expected, actual)),
                None,
            ),
            AppError::Parse(msg)
            | AppError::Validation(msg)
            | AppError::MalformedBundle(msg)
            | AppError::NotFound(msg)
            | AppError::BadRequest(msg) => (msg, None, None),
        };

        let body = Json(ErrorResponse {
            success: false,
            message,
            error: details,
            code: Some(code.to_string()),
            validation,
        });

        (status, body).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, AppError>;

/// Helper function to create a validation error
pub fn validation_error(msg: impl Into<String>) -> AppError {
    AppError::Validation(msg.into())
}

/// Helper function to create a not found error
pub fn not_found_error(msg: impl Into<String>) -> AppError {
    AppError::NotFound(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let err = AppError::IntegrityCheckFailed {
            expected: "a".into(),
            actual: "b".into(),
        };
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.code(), "INTEGRITY_CHECK_FAILED");

        let err = AppError::Store(StoreError::InvalidTransactionState("closed".into()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code(), "INVALID_TRANSACTION_STATE");

        assert_eq!(not_found_error("x").status(), StatusCode::NOT_FOUND);
        assert_eq!(validation_error("x").status(), StatusCode::BAD_REQUEST);
    }
}
