//! Per-request error taxonomy.
//!
//! Handlers and middleware return [`ApiError`]. A [`RouteError`] reaches the
//! client exactly as declared; anything else is reported as
//! `500 internal_error` carrying only its top-level message.

use std::fmt;

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::breaker::{BreakerError, CircuitOpenError};

/// Message used when an internal error has nothing to say.
const GENERIC_INTERNAL_MESSAGE: &str = "Internal server error";

/// Stable error codes surfaced in the error envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    ValidationFailed,
    WorkspaceScopeDenied,
    RateLimited,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::BadRequest => "bad_request",
            ErrorCode::Unauthorized => "unauthorized",
            ErrorCode::Forbidden => "forbidden",
            ErrorCode::NotFound => "not_found",
            ErrorCode::MethodNotAllowed => "method_not_allowed",
            ErrorCode::ValidationFailed => "validation_failed",
            ErrorCode::WorkspaceScopeDenied => "workspace_scope_denied",
            ErrorCode::RateLimited => "rate_limited",
            ErrorCode::InternalError => "internal_error",
        }
    }

    /// The status normally paired with this code.
    pub fn default_status(&self) -> u16 {
        match self {
            ErrorCode::BadRequest | ErrorCode::ValidationFailed => 400,
            ErrorCode::Unauthorized => 401,
            ErrorCode::Forbidden | ErrorCode::WorkspaceScopeDenied => 403,
            ErrorCode::NotFound => 404,
            ErrorCode::MethodNotAllowed => 405,
            ErrorCode::RateLimited => 429,
            ErrorCode::InternalError => 500,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed, client-visible failure.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{code}: {message}")]
pub struct RouteError {
    pub status: u16,
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<Value>,
}

impl RouteError {
    pub fn new(status: u16, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Error with the code's default status.
    pub fn from_code(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(code.default_status(), code, message)
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::from_code(ErrorCode::BadRequest, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::from_code(ErrorCode::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::from_code(ErrorCode::Forbidden, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::from_code(ErrorCode::NotFound, message)
    }

    pub fn method_not_allowed(message: impl Into<String>) -> Self {
        Self::from_code(ErrorCode::MethodNotAllowed, message)
    }

    pub fn workspace_scope_denied(message: impl Into<String>) -> Self {
        Self::from_code(ErrorCode::WorkspaceScopeDenied, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::from_code(ErrorCode::RateLimited, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::from_code(ErrorCode::InternalError, message)
    }

    /// `400 validation_failed` with the issues under `details.issues`.
    pub fn validation_failed<T: Serialize>(issues: &[T]) -> Self {
        let issues = serde_json::to_value(issues).unwrap_or(Value::Array(Vec::new()));
        Self::from_code(ErrorCode::ValidationFailed, "Request body failed validation")
            .with_details(json!({ "issues": issues }))
    }
}

/// `503` so callers can tell a tripped dependency from a bug.
impl From<CircuitOpenError> for RouteError {
    fn from(err: CircuitOpenError) -> Self {
        RouteError::new(
            503,
            ErrorCode::InternalError,
            format!("Dependency '{}' is temporarily unavailable", err.key),
        )
        .with_details(json!({
            "key": err.key,
            "nextRetryAt": err.next_retry_at_iso,
        }))
    }
}

/// Error type returned by handlers and middleware.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Reported to the client verbatim
    #[error(transparent)]
    Route(#[from] RouteError),

    /// Reported as `500 internal_error`
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<CircuitOpenError> for ApiError {
    fn from(err: CircuitOpenError) -> Self {
        ApiError::Route(err.into())
    }
}

impl<E> From<BreakerError<E>> for ApiError
where
    E: Into<ApiError>,
{
    fn from(err: BreakerError<E>) -> Self {
        match err {
            BreakerError::Open(open) => open.into(),
            BreakerError::Inner(inner) => inner.into(),
        }
    }
}

impl ApiError {
    /// Collapse into the error that will be shown to the client.
    pub fn into_route_error(self) -> RouteError {
        match self {
            ApiError::Route(err) => err,
            ApiError::Internal(err) => {
                let message = err.to_string();
                if message.trim().is_empty() {
                    RouteError::internal(GENERIC_INTERNAL_MESSAGE)
                } else {
                    RouteError::internal(message)
                }
            }
        }
    }
}
