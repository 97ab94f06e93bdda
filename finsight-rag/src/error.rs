//! Error types for the `finsight-rag` crate.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while chunking, embedding, indexing or retrieving.
///
/// Several conditions that look like failures are deliberately *not* errors:
/// a filing without recognizable section headers falls back to flat chunking,
/// an already indexed document is reported as
/// [`IndexOutcome::AlreadyIndexed`](crate::indexer::IndexOutcome::AlreadyIndexed),
/// and a query that matches nothing returns an empty list.
#[derive(Debug, Error)]
pub enum RagError {
    /// Text to embed was empty or whitespace only. Raised before any provider call.
    #[error("Cannot embed empty text")]
    EmptyInput,

    /// An error occurred during embedding generation.
    #[error("Embedding error ({provider}): {message}")]
    EmbeddingError {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// An error occurred in the vector index backend.
    #[error("Vector store error ({backend}): {message}")]
    VectorStoreError {
        /// The vector index backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// Chunking produced nothing usable for a document.
    #[error("Chunking error: {0}")]
    ChunkingError(String),

    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// An error in indexing or retrieval orchestration.
    #[error("Pipeline error: {0}")]
    PipelineError(String),

    /// A bounded call did not complete in time.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// The operation that was abandoned.
        operation: String,
        /// The deadline that was exceeded.
        after: Duration,
    },
}

impl RagError {
    /// Build a [`RagError::Timeout`] for the named operation.
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout { operation: operation.into(), after }
    }
}

/// A convenience result type for RAG operations.
pub type Result<T> = std::result::Result<T, RagError>;
