//! Error types for dashscrape.
//!
//! Library crates use [`DashscrapeError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all dashscrape operations.
#[derive(Debug, thiserror::Error)]
pub enum DashscrapeError {
    /// The query response's selector/row-schema shape cannot be interpreted.
    #[error("schema error: {message}")]
    Schema { message: String },

    /// Encoded data violates a structural invariant of the response format.
    #[error("data integrity error: {message}")]
    DataIntegrity { message: String },

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error talking to the query endpoint.
    #[error("network error: {message}")]
    Network { message: String, transient: bool },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// CSV reading or writing error.
    #[error("csv error: {0}")]
    Csv(String),

    /// Data validation error (missing column, name collision, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DashscrapeError>;

impl DashscrapeError {
    /// Create a schema error from any displayable message.
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema {
            message: msg.into(),
        }
    }

    /// Create a data integrity error from any displayable message.
    pub fn data_integrity(msg: impl Into<String>) -> Self {
        Self::DataIntegrity {
            message: msg.into(),
        }
    }

    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a non-retryable network error.
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network {
            message: msg.into(),
            transient: false,
        }
    }

    /// Create a network error worth retrying (connect failure, 429, 5xx).
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Network {
            message: msg.into(),
            transient: true,
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether retrying the same operation could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { transient: true, .. })
    }
}
