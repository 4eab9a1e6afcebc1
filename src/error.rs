//! Error types for the Engram retrieval engine
//!
//! This module provides comprehensive error handling using thiserror for
//! structured error definitions and anyhow for error propagation.
//!
//! Pure ranking and formatting code never constructs these errors at runtime;
//! it clamps or drops instead. I/O failures bubble to the request boundary.

use thiserror::Error;

/// Main error type for Engram operations
#[derive(Error, Debug)]
pub enum EngramError {
    /// Database operation failed
    #[error("Database error: {0}")]
    Database(String),

    /// Embedding generation failed (transient or permanent provider failure)
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Vector index operation failed
    #[error("Vector store error: {0}")]
    VectorStore(String),

    /// Memory not found
    #[error("Memory not found: {0}")]
    MemoryNotFound(String),

    /// Entity not found in the knowledge graph
    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    /// Malformed configuration, out-of-range weights, unknown template, etc.
    /// Surfaced to the caller and never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A retrieval channel failed and the route does not allow degradation
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    /// Request cancelled or deadline exceeded
    #[error("Retrieval timed out after {0}ms")]
    Timeout(u64),

    /// Benchmark quality gate violation (benchmark tool only, never raised
    /// by build_context)
    #[error("Quality gate failure: {0}")]
    Gate(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias for Engram operations
pub type Result<T> = std::result::Result<T, EngramError>;

impl From<rusqlite::Error> for EngramError {
    fn from(err: rusqlite::Error) -> Self {
        EngramError::Database(err.to_string())
    }
}

/// Convert anyhow::Error to EngramError
impl From<anyhow::Error> for EngramError {
    fn from(err: anyhow::Error) -> Self {
        EngramError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngramError::MemoryNotFound("test-id".to_string());
        assert_eq!(err.to_string(), "Memory not found: test-id");
    }

    #[test]
    fn test_validation_error_display() {
        let err = EngramError::Validation("weights must be finite".to_string());
        assert_eq!(err.to_string(), "Validation error: weights must be finite");
    }

    #[test]
    fn test_sqlite_error_conversion() {
        let sqlite_err = rusqlite::Error::QueryReturnedNoRows;
        let err: EngramError = sqlite_err.into();
        assert!(matches!(err, EngramError::Database(_)));
    }
}
