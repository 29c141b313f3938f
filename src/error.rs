//! Error handling module
//!
//! Provides the unified error type for the lineage engine.
//! "No data" outcomes (unreachable nodes, missing paths) are NOT errors here;
//! they are explicit results on the operations themselves.

use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Engine-wide error type
#[derive(Error, Debug)]
pub enum LineageError {
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Invalid depth: {0} (must be at least 1)")]
    InvalidDepth(u32),

    #[error("Invalid node key: {0}")]
    InvalidNodeKey(String),

    #[error("Unsupported discovery source: {0}")]
    UnsupportedDiscoverySource(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Serializable error summary, used where failures are reported as data
/// (discovery run reports, CLI output)
#[derive(Debug, Clone, Serialize)]
pub struct ErrorSummary {
    pub code: String,
    pub message: String,
}

impl LineageError {
    /// Stable machine-readable code for this error
    pub fn code(&self) -> &'static str {
        match self {
            LineageError::Database(_) => "DATABASE_ERROR",
            LineageError::Pool(_) => "POOL_EXHAUSTED",
            LineageError::NodeNotFound(_) => "NODE_NOT_FOUND",
            LineageError::InvalidDepth(_) => "INVALID_DEPTH",
            LineageError::InvalidNodeKey(_) => "INVALID_NODE_KEY",
            LineageError::UnsupportedDiscoverySource(_) => "UNSUPPORTED_DISCOVERY_SOURCE",
            LineageError::NotFound(_) => "NOT_FOUND",
            LineageError::Validation(_) => "VALIDATION_ERROR",
            LineageError::Config(_) => "CONFIG_ERROR",
            LineageError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// True when the caller supplied malformed input or referenced
    /// something that does not exist
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            LineageError::NodeNotFound(_)
                | LineageError::InvalidDepth(_)
                | LineageError::InvalidNodeKey(_)
                | LineageError::UnsupportedDiscoverySource(_)
                | LineageError::NotFound(_)
                | LineageError::Validation(_)
        )
    }

    /// Convert into a serializable summary, logging infrastructure failures
    pub fn summarize(&self) -> ErrorSummary {
        if !self.is_client_error() {
            error!("{} error: {}", self.code(), self);
        }
        ErrorSummary {
            code: self.code().to_string(),
            message: self.to_string(),
        }
    }
}

/// Result type alias for engine operations
pub type LineageResult<T> = Result<T, LineageError>;

/// Helper function to create a validation error
pub fn validation_error(msg: impl Into<String>) -> LineageError {
    LineageError::Validation(msg.into())
}

/// Helper function to create a not found error
pub fn not_found_error(msg: impl Into<String>) -> LineageError {
    LineageError::NotFound(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_are_classified() {
        assert!(LineageError::InvalidDepth(0).is_client_error());
        assert!(LineageError::NodeNotFound("a:b:c".into()).is_client_error());
        assert!(!LineageError::Internal("boom".into()).is_client_error());
    }

    #[test]
    fn test_summary_carries_code() {
        let summary = LineageError::UnsupportedDiscoverySource("api_call".into()).summarize();
        assert_eq!(summary.code, "UNSUPPORTED_DISCOVERY_SOURCE");
        assert!(summary.message.contains("api_call"));
    }
}
