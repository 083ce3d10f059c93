//! Storage abstraction for localrag.
//!
//! The [`ChunkStore`] trait defines every operation the ingestion and query
//! paths need, enabling pluggable backends: [`sqlite::SqliteStore`] for
//! durable storage and [`memory::MemoryStore`] for tests and ephemeral runs.
//!
//! Implementations must be `Send + Sync` and serialize conflicting writes to
//! the same chunk id (last write wins) while permitting concurrent reads.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::StorageConfig;
use crate::embedding::Metric;
use crate::error::PipelineError;
use crate::models::{Chunk, Document, ScoredChunk, SearchFilters, StoreStats};

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert_document`](ChunkStore::upsert_document) | Insert or update a document record |
/// | [`document_by_source`](ChunkStore::document_by_source) | Look up a document by its source path/URL |
/// | [`upsert_chunk`](ChunkStore::upsert_chunk) | Insert or replace a chunk by id |
/// | [`chunk_hashes`](ChunkStore::chunk_hashes) | Stored content hashes for resume/staleness checks |
/// | [`prune_chunks`](ChunkStore::prune_chunks) | Drop a document's chunks outside a keep set |
/// | [`vector_search`](ChunkStore::vector_search) | Similarity search over stored embeddings |
/// | [`keyword_search`](ChunkStore::keyword_search) | Ranked keyword search over chunk text |
/// | [`stats`](ChunkStore::stats) | Store-wide counts |
///
/// # Result ordering
///
/// Both search methods return at most `k` results ordered by score
/// descending; equal scores resolve by insertion sequence ascending, so the
/// earlier-inserted chunk wins. Returned chunks never carry embedding
/// vectors or image payloads.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Insert or update a document record. Updates keep the original
    /// `created_at`.
    async fn upsert_document(&self, doc: &Document) -> Result<(), PipelineError>;

    /// Look up a document by its canonical source string.
    async fn document_by_source(&self, source: &str)
        -> Result<Option<Document>, PipelineError>;

    /// Insert or replace a chunk, keyed by chunk id.
    ///
    /// Idempotent: re-upserting an id replaces the stored entry while
    /// preserving its original insertion sequence.
    async fn upsert_chunk(&self, chunk: &Chunk) -> Result<(), PipelineError>;

    /// Map of chunk id to stored content hash for one document.
    async fn chunk_hashes(
        &self,
        document_id: &str,
    ) -> Result<HashMap<String, String>, PipelineError>;

    /// Remove the document's chunks whose ids are not in `keep_ids`.
    /// Returns the number removed.
    async fn prune_chunks(
        &self,
        document_id: &str,
        keep_ids: &[String],
    ) -> Result<u64, PipelineError>;

    /// Nearest chunks to `query` by the store's configured metric.
    async fn vector_search(
        &self,
        query: &[f32],
        k: i64,
        filters: &SearchFilters,
    ) -> Result<Vec<ScoredChunk>, PipelineError>;

    /// Ranked keyword match over chunk text.
    async fn keyword_search(
        &self,
        query: &str,
        k: i64,
        filters: &SearchFilters,
    ) -> Result<Vec<ScoredChunk>, PipelineError>;

    /// Store-wide document and chunk counts.
    async fn stats(&self) -> Result<StoreStats, PipelineError>;
}

/// Instantiate the storage backend named in the configuration, once at
/// startup.
///
/// The embedding model and dimensionality are recorded by durable backends
/// so a later open with a different embedding setup fails fast instead of
/// mixing incompatible vectors.
pub async fn create_store(
    storage: &StorageConfig,
    metric: Metric,
    embedding_model: &str,
    embedding_dims: usize,
) -> anyhow::Result<Arc<dyn ChunkStore>> {
    match storage.backend.as_str() {
        "sqlite" => Ok(Arc::new(
            sqlite::SqliteStore::open(storage, metric, embedding_model, embedding_dims).await?,
        )),
        "memory" => Ok(Arc::new(memory::MemoryStore::new(metric))),
        other => anyhow::bail!("Unknown storage backend: {}", other),
    }
}

/// Sort candidates into final result order: score descending, insertion
/// sequence ascending, truncated to `k`.
pub(crate) fn order_results(mut results: Vec<ScoredChunk>, k: i64) -> Vec<ScoredChunk> {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.seq.cmp(&b.seq))
    });
    results.truncate(k.max(0) as usize);
    results
}

/// Strip the payload fields search results never carry.
pub(crate) fn result_chunk(mut chunk: Chunk) -> Chunk {
    chunk.embedding = None;
    chunk.image_data = None;
    chunk
}
