//! ragstack Core - Errors, operation outcomes, and configuration
//!
//! This crate defines the shared vocabulary of the ragstack workspace:
//! - The error taxonomy returned at every public operation boundary
//! - [`Outcome`], which separates "not performed for an expected reason"
//!   from failures
//! - Configuration management (environment and TOML)

pub mod config;

pub use config::{
    AppConfig, ConfigError, EmbeddingConfig, LoggingConfig, ProbeConfig, WeaviateConfig,
    DEFAULT_EMBEDDING_MODEL,
};

use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for ragstack operations
#[derive(Error, Debug)]
pub enum RagstackError {
    /// The readiness probe failed; nothing was sent to the service.
    #[error("{service} is unreachable")]
    ConnectionUnavailable { service: String },

    /// Rejected before any network call.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Embedding service error: {0}")]
    UpstreamEmbedding(String),

    #[error("Database error: {0}")]
    UpstreamDatabase(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RagstackError {
    /// Shorthand for an unreachable vector database
    pub fn database_unreachable() -> Self {
        Self::ConnectionUnavailable {
            service: "weaviate".to_string(),
        }
    }

    /// Whether the failure happened before anything reached the network
    pub fn is_rejected_locally(&self) -> bool {
        matches!(self, Self::InvalidArgument(_) | Self::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, RagstackError>;

/// Reject an empty (or whitespace-only) required string argument
pub fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(RagstackError::InvalidArgument(format!(
            "{field} must not be empty"
        )));
    }
    Ok(())
}

// ============================================================================
// Operation Outcomes
// ============================================================================

/// Why an operation was skipped without touching the database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// A collection with that name already exists and was left untouched
    AlreadyExists,
    /// The named collection does not exist
    NotFound,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyExists => write!(f, "already exists"),
            Self::NotFound => write!(f, "not found"),
        }
    }
}

/// Result of an operation that completed without error.
///
/// `Skipped` means the operation did not happen because of an expected
/// condition; nothing was changed. Failures are reported through
/// [`RagstackError`] instead.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Done(T),
    Skipped(SkipReason),
}

impl<T> Outcome<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped(_))
    }

    /// The value of a completed operation
    pub fn done(self) -> Option<T> {
        match self {
            Self::Done(value) => Some(value),
            Self::Skipped(_) => None,
        }
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            Self::Done(_) => None,
            Self::Skipped(reason) => Some(*reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_accessors() {
        let done: Outcome<u32> = Outcome::Done(3);
        assert!(done.is_done());
        assert_eq!(done.skip_reason(), None);
        assert_eq!(done.done(), Some(3));

        let skipped: Outcome<u32> = Outcome::Skipped(SkipReason::AlreadyExists);
        assert!(skipped.is_skipped());
        assert_eq!(skipped.skip_reason(), Some(SkipReason::AlreadyExists));
        assert_eq!(skipped.done(), None);
    }

    #[test]
    fn test_require_non_empty() {
        assert!(require_non_empty("name", "docs").is_ok());

        let err = require_non_empty("name", "   ").unwrap_err();
        assert!(matches!(err, RagstackError::InvalidArgument(_)));
        assert!(err.is_rejected_locally());
        assert_eq!(err.to_string(), "Invalid argument: name must not be empty");
    }

    #[test]
    fn test_database_unreachable_message() {
        let err = RagstackError::database_unreachable();
        assert_eq!(err.to_string(), "weaviate is unreachable");
        assert!(!err.is_rejected_locally());
    }
}
