//! Error types for learngraph-core

use thiserror::Error;

/// Errors that can occur in the knowledge graph
#[derive(Debug, Error)]
pub enum GraphError {
    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Node, edge or delta not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Imported data was produced by an incompatible schema
    #[error("Schema mismatch: expected {expected}, found {found}")]
    SchemaMismatch { expected: String, found: String },

    /// Invalid input (unknown node type, malformed event, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Builder error
    #[error("Builder error: {0}")]
    Builder(#[from] crate::node::NodeBuilderError),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl GraphError {
    /// Create a not found error
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    /// Create a schema mismatch error
    pub fn schema_mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

/// Result type for graph operations
pub type Result<T> = std::result::Result<T, GraphError>;
