//! Error types for Magpie.
//!
//! Library crates use [`MagpieError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all Magpie operations.
#[derive(Debug, thiserror::Error)]
pub enum MagpieError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error against the scraper service or a media host.
    #[error("network error: {0}")]
    Network(String),

    /// AI provider error (request, transport, or response shape).
    #[error("provider error: {0}")]
    Provider(String),

    /// Response parsing error (model output, service payloads).
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (empty category, malformed record, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Repository sync error (git subprocess failures).
    #[error("sync error: {0}")]
    Sync(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, MagpieError>;

impl MagpieError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = MagpieError::config("missing scraper base_url");
        assert_eq!(err.to_string(), "config error: missing scraper base_url");

        let err = MagpieError::validation("item_name empty after sanitization");
        assert!(err.to_string().contains("item_name empty"));
    }
}
