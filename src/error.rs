//! Error types for Portico setup and configuration.
//!
//! Per-request failures are not represented here; see
//! [`RouteError`](crate::gateway::RouteError) for those.

use thiserror::Error;

/// Main error type for Portico operations.
#[derive(Error, Debug)]
pub enum PorticoError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A route with the same method and normalized path is already registered
    #[error("Duplicate route: {method} {path}")]
    DuplicateRoute {
        /// HTTP method of the rejected route
        method: String,
        /// Normalized path of the rejected route
        path: String,
    },

    /// A route definition that cannot be registered
    #[error("Invalid route: {0}")]
    InvalidRoute(String),

    /// JSON (de)serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<::config::ConfigError> for PorticoError {
    fn from(err: ::config::ConfigError) -> Self {
        PorticoError::Config(err.to_string())
    }
}

/// Result type alias for Portico operations.
pub type Result<T> = std::result::Result<T, PorticoError>;
