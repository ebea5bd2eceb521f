//! Typed errors and HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Catalog, settings, hook-definition and schema bootstrap errors. Raised at
/// startup only.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing reference: {kind} '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("duplicate type: {0}")]
    DuplicateType(String),
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
    #[error("hook already registered for type {0}")]
    DuplicateHook(String),
    #[error("config load: {0}")]
    Load(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
}

/// Errors surfaced by the resource store. Storage failures never cross this
/// boundary raw: they are logged with context where they happen and returned
/// as [`StoreError::Internal`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("referential integrity violation: {0}")]
    ReferentialIntegrity(String),
    #[error("rejected by {resource_type} intent: {reason}")]
    HookRejected { resource_type: String, reason: String },
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),
    #[error("internal error")]
    Internal,
}

impl StoreError {
    /// Stable machine-readable code, also used as the HTTP error code.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::BadRequest(_) => "bad_request",
            StoreError::NotFound(_) => "not_found",
            StoreError::Conflict(_) => "conflict",
            StoreError::ReferentialIntegrity(_) => "referential_integrity_violation",
            StoreError::HookRejected { .. } => "hook_rejected",
            StoreError::DeadlineExceeded(_) => "deadline_exceeded",
            StoreError::Internal => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            StoreError::BadRequest(_) => StatusCode::BAD_REQUEST,
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::Conflict(_) | StoreError::ReferentialIntegrity(_) => StatusCode::CONFLICT,
            StoreError::HookRejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            StoreError::DeadlineExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
            StoreError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Context attached to a storage failure before it is sanitized.
#[derive(Clone, Copy, Debug)]
pub(crate) struct OpContext<'a> {
    pub operation: &'static str,
    pub resource_type: &'a str,
    pub id: &'a str,
}

impl<'a> OpContext<'a> {
    pub fn new(operation: &'static str, resource_type: &'a str, id: &'a str) -> Self {
        OpContext {
            operation,
            resource_type,
            id,
        }
    }

    /// Classify a sqlx error. Constraint violations become caller-facing
    /// conflicts; anything else is logged here and sanitized to `Internal`.
    pub fn db(self, err: sqlx::Error) -> StoreError {
        if let Some(db_err) = err.as_database_error() {
            match db_err.kind() {
                sqlx::error::ErrorKind::UniqueViolation => {
                    return StoreError::Conflict(format!(
                        "{} {} already exists",
                        self.resource_type, self.id
                    ));
                }
                sqlx::error::ErrorKind::ForeignKeyViolation => {
                    return StoreError::Conflict(format!(
                        "{} {}: referenced resource does not exist",
                        self.resource_type, self.id
                    ));
                }
                _ => {}
            }
        }
        self.internal(&err)
    }

    /// Log a failure with its operation context and return `Internal`.
    pub fn internal(self, err: &dyn std::fmt::Display) -> StoreError {
        tracing::error!(
            operation = self.operation,
            resource_type = self.resource_type,
            id = self.id,
            error = %err,
            "store failure"
        );
        StoreError::Internal
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorBody {
    pub fn new(code: &str, message: String) -> Self {
        ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message,
                details: None,
            },
        }
    }
}

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody::new(self.code(), self.to_string());
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_display_is_sanitized() {
        let err = OpContext::new("create", "project", "abc").internal(&"relation \"x\" does not exist");
        assert_eq!(err, StoreError::Internal);
        assert_eq!(err.to_string(), "internal error");
    }

    #[test]
    fn non_database_errors_are_internal() {
        let err = OpContext::new("list", "project", "").db(sqlx::Error::PoolTimedOut);
        assert_eq!(err, StoreError::Internal);
    }

    #[test]
    fn status_mapping() {
        assert_eq!(StoreError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            StoreError::ReferentialIntegrity("x".into()).status(),
            StatusCode::CONFLICT
        );
        let rejected = StoreError::HookRejected {
            resource_type: "youtube".into(),
            reason: "no".into(),
        };
        assert_eq!(rejected.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(rejected.code(), "hook_rejected");
    }
}
