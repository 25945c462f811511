//! Error types for the `adk-retrieval` crate.

use thiserror::Error;

/// Errors that can occur while ingesting documents or answering queries.
#[derive(Debug, Error)]
pub enum RagError {
    /// A configuration value was rejected before any state change.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// No extractor understands the file's format.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The file could be identified but its text could not be read.
    #[error("Extraction error ({source_id}): {message}")]
    ExtractionError {
        /// The file or document the extractor was reading.
        source_id: String,
        /// A description of the failure.
        message: String,
    },

    /// An error occurred during document chunking.
    #[error("Chunking error: {0}")]
    ChunkingError(String),

    /// An error occurred during embedding generation.
    #[error("Embedding error ({provider}): {message}")]
    EmbeddingError {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// An error occurred in the semantic index backend.
    #[error("Vector store error ({backend}): {message}")]
    VectorStoreError {
        /// The backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// An error occurred while scoring query/candidate pairs.
    #[error("Reranker error ({reranker}): {message}")]
    RerankerError {
        /// The reranker that produced the error.
        reranker: String,
        /// A description of the failure.
        message: String,
    },

    /// The lexical and semantic indexes no longer reference the same chunks.
    ///
    /// Once raised, the manager refuses to serve queries until the indexes
    /// are repaired.
    #[error("Index divergence: {0}")]
    IndexDivergence(String),

    /// The requested document is not part of the corpus.
    #[error("Document not found: {0}")]
    NotFound(String),

    /// An error in ingestion or query orchestration.
    #[error("Pipeline error: {0}")]
    PipelineError(String),
}

impl RagError {
    /// Whether this error is isolated to a single document during batch ingestion.
    ///
    /// Configuration errors and index divergence abort a batch; everything
    /// else is recorded as a per-document failure.
    pub fn is_document_scoped(&self) -> bool {
        !matches!(self, RagError::ConfigError(_) | RagError::IndexDivergence(_))
    }
}

/// A convenience result type for retrieval operations.
pub type Result<T> = std::result::Result<T, RagError>;
