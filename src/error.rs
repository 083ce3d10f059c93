//! Error types for the localrag pipeline.
//!
//! Each pipeline stage fails with its own `PipelineError` variant so callers
//! can react per stage: parse failures are reported and skipped, backend
//! failures carry a retryable flag for the ingestion retry loop, and store
//! failures are retried during ingestion but surfaced immediately on the
//! query path.

use thiserror::Error;

use crate::models::RetrievalResult;

/// Per-stage pipeline errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The source document could not be read or parsed. Not retried.
    #[error("failed to load {source_ref}: {reason}")]
    DocumentParse { source_ref: String, reason: String },

    /// The embedding backend failed. `retryable` distinguishes transient
    /// failures (rate limits, server errors, network) from permanent ones.
    #[error("embedding backend '{provider}' failed: {reason}")]
    EmbeddingBackend {
        provider: String,
        reason: String,
        retryable: bool,
    },

    /// The generation backend failed. The caller may retry generation alone;
    /// retrieval output is preserved in [`AskError`].
    #[error("generation backend '{provider}' failed: {reason}")]
    GenerationBackend { provider: String, reason: String },

    /// The store rejected or could not serve a request.
    #[error("store unavailable: {reason}")]
    StoreUnavailable { reason: String },
}

impl PipelineError {
    /// Whether the ingestion path may retry the failed call.
    pub fn retryable(&self) -> bool {
        match self {
            PipelineError::EmbeddingBackend { retryable, .. } => *retryable,
            PipelineError::StoreUnavailable { .. } => true,
            PipelineError::DocumentParse { .. } | PipelineError::GenerationBackend { .. } => false,
        }
    }
}

/// Ingestion failure carrying resume state.
///
/// Every chunk id in `committed` is durably stored; re-running ingestion for
/// the same source skips those by content hash and picks up at
/// `failed_position`.
#[derive(Debug, Error)]
#[error("ingestion of document {document_id} halted at position {failed_position}")]
pub struct IngestError {
    pub document_id: String,
    pub failed_position: i64,
    pub committed: Vec<String>,
    #[source]
    pub source: PipelineError,
}

/// Generation failure on the query path.
///
/// Retrieval already succeeded; `retrieval` holds its intact output so the
/// caller can retry generation without re-running the search.
#[derive(Debug, Error)]
#[error("answer generation failed")]
pub struct AskError {
    pub retrieval: RetrievalResult,
    #[source]
    pub source: PipelineError,
}
