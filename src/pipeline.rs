//! End-to-end orchestration: ingest sources, retrieve, and answer.
//!
//! The pipeline owns one store, one embedder, and one generator, all
//! resolved from configuration at startup. Ingestion is resumable: chunk
//! writes are committed one at a time in position order, so a failed run
//! reports exactly which chunk ids made it in and where to pick up.
//!
//! Transient backend failures during ingestion are retried with bounded
//! exponential backoff. Query-path failures are never retried; they
//! surface to the caller immediately.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::chunker::chunk_document;
use crate::config::{
    ChunkingConfig, Config, EmbeddingConfig, GenerationConfig, RetrievalConfig,
};
use crate::embedding::{create_embedder, Embedder, Metric};
use crate::error::{AskError, IngestError, PipelineError};
use crate::generate::{self, create_generator, Generator};
use crate::loader::load_source;
use crate::models::{
    Answer, Chunk, ContentType, Document, IngestReport, RetrievalResult, SearchFilters,
    StoreStats,
};
use crate::retrieve::SearchMode;
use crate::store::{create_store, ChunkStore};

/// Timeout for fetching URL sources during ingestion.
const FETCH_TIMEOUT_SECS: u64 = 30;

pub struct Pipeline {
    store: Arc<dyn ChunkStore>,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    chunking: ChunkingConfig,
    embedding: EmbeddingConfig,
    retrieval: RetrievalConfig,
    generation: GenerationConfig,
}

impl Pipeline {
    /// Assemble a pipeline from already-constructed components.
    pub fn new(
        store: Arc<dyn ChunkStore>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            embedder,
            generator,
            chunking: config.chunking.clone(),
            embedding: config.embedding.clone(),
            retrieval: config.retrieval.clone(),
            generation: config.generation.clone(),
        }
    }

    /// Resolve every backend named in the configuration and open the store.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let generator = create_generator(&config.generation)?;
        let metric = Metric::parse(&config.retrieval.metric).ok_or_else(|| {
            anyhow::anyhow!(
                "Unknown similarity metric: {}. Use cosine or dot.",
                config.retrieval.metric
            )
        })?;
        let store = create_store(
            &config.storage,
            metric,
            embedder.model_name(),
            embedder.dims(),
        )
        .await?;
        Ok(Self::new(store, embedder, generator, config))
    }

    /// Ingest one source (file path or URL) into the store.
    ///
    /// Re-ingesting a known source replaces its chunks: unchanged chunks
    /// are detected by content hash and skipped, changed ones are
    /// re-embedded and overwritten in place, and chunks no longer produced
    /// are pruned. A source whose bytes are identical to the stored
    /// version is skipped entirely.
    pub async fn ingest_source(
        &self,
        source: &str,
        hint: Option<ContentType>,
    ) -> Result<IngestReport, IngestError> {
        let fallback_id = uuid::Uuid::new_v4().to_string();

        let existing = self
            .with_backoff(|| self.store.document_by_source(source))
            .await
            .map_err(|e| halt(&fallback_id, 0, Vec::new(), e))?;
        let document_id = existing
            .as_ref()
            .map(|d| d.id.clone())
            .unwrap_or(fallback_id);

        let loaded = load_source(source, hint, FETCH_TIMEOUT_SECS)
            .await
            .map_err(|e| halt(&document_id, 0, Vec::new(), e))?;

        if let Some(doc) = &existing {
            if doc.dedup_hash == loaded.dedup_hash {
                tracing::info!(source, document_id = %doc.id, "source unchanged, skipping");
                return Ok(IngestReport {
                    document_id: doc.id.clone(),
                    source: source.to_string(),
                    unchanged: true,
                    chunks_total: 0,
                    embedded: 0,
                    skipped: 0,
                    pruned: 0,
                });
            }
        }

        let chunks = chunk_document(&document_id, &loaded.regions, &self.chunking);
        tracing::info!(
            source,
            document_id = %document_id,
            chunks = chunks.len(),
            "chunked document"
        );

        // The fresh dedup hash is recorded only after every chunk commits,
        // so an interrupted run is never mistaken for an up-to-date one.
        let existing_hash = existing
            .as_ref()
            .map(|d| d.dedup_hash.clone())
            .unwrap_or_default();
        let now = chrono::Utc::now().timestamp();
        let mut doc = Document {
            id: document_id.clone(),
            source: source.to_string(),
            title: loaded.title.clone(),
            content_type: loaded.content_type,
            dedup_hash: existing_hash,
            created_at: now,
            updated_at: now,
        };
        self.with_backoff(|| self.store.upsert_document(&doc))
            .await
            .map_err(|e| halt(&document_id, 0, Vec::new(), e))?;

        let stored_hashes = self
            .with_backoff(|| self.store.chunk_hashes(&document_id))
            .await
            .map_err(|e| halt(&document_id, 0, Vec::new(), e))?;

        let keep_ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
        let mut committed: Vec<String> = Vec::new();
        let mut pending: Vec<&Chunk> = Vec::new();
        let mut skipped = 0usize;

        for chunk in &chunks {
            if stored_hashes.get(&chunk.id) == Some(&chunk.hash) {
                skipped += 1;
                committed.push(chunk.id.clone());
            } else {
                pending.push(chunk);
            }
        }

        let mut embedded = 0usize;
        for batch in pending.chunks(self.embedding.batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let vectors = self
                .with_backoff(|| self.embedder.embed(&texts))
                .await
                .map_err(|e| halt(&document_id, batch[0].position, committed.clone(), e))?;

            for (chunk, vector) in batch.iter().zip(vectors) {
                let mut stored = (*chunk).clone();
                stored.embedding = Some(vector);
                self.with_backoff(|| self.store.upsert_chunk(&stored))
                    .await
                    .map_err(|e| halt(&document_id, stored.position, committed.clone(), e))?;
                committed.push(stored.id.clone());
                embedded += 1;
            }
            tracing::debug!(
                document_id = %document_id,
                batch = batch.len(),
                embedded,
                "committed embedding batch"
            );
        }

        let pruned = self
            .with_backoff(|| self.store.prune_chunks(&document_id, &keep_ids))
            .await
            .map_err(|e| halt(&document_id, chunks.len() as i64, committed.clone(), e))?;

        doc.dedup_hash = loaded.dedup_hash.clone();
        self.with_backoff(|| self.store.upsert_document(&doc))
            .await
            .map_err(|e| halt(&document_id, chunks.len() as i64, committed.clone(), e))?;

        Ok(IngestReport {
            document_id,
            source: source.to_string(),
            unchanged: false,
            chunks_total: chunks.len(),
            embedded,
            skipped,
            pruned: pruned as usize,
        })
    }

    /// Run retrieval only.
    pub async fn retrieve(
        &self,
        query: &str,
        mode: SearchMode,
        k: i64,
        filters: &SearchFilters,
    ) -> Result<RetrievalResult, PipelineError> {
        crate::retrieve::retrieve(
            self.store.as_ref(),
            self.embedder.as_ref(),
            &self.retrieval,
            query,
            mode,
            k,
            filters,
        )
        .await
    }

    /// Retrieve context for `question` and generate an answer over it.
    ///
    /// On failure the error carries whatever retrieval produced, so
    /// callers can still show the evidence that was found.
    pub async fn ask(
        &self,
        question: &str,
        mode: SearchMode,
        k: i64,
        filters: &SearchFilters,
    ) -> Result<(RetrievalResult, Answer), AskError> {
        let retrieval = self
            .retrieve(question, mode, k, filters)
            .await
            .map_err(|e| AskError {
                retrieval: RetrievalResult::default(),
                source: e,
            })?;

        let answer = generate::answer(
            self.generator.as_ref(),
            question,
            &retrieval,
            self.generation.max_context_chars,
        )
        .await
        .map_err(|e| AskError {
            retrieval: retrieval.clone(),
            source: e,
        })?;

        Ok((retrieval, answer))
    }

    pub async fn stats(&self) -> Result<StoreStats, PipelineError> {
        self.store.stats().await
    }

    pub fn default_mode(&self) -> SearchMode {
        SearchMode::parse(&self.retrieval.mode).unwrap_or(SearchMode::Hybrid)
    }

    pub fn default_top_k(&self) -> i64 {
        self.retrieval.top_k
    }

    /// Retry `op` on transient failures with bounded exponential backoff.
    ///
    /// The operation runs at most `1 + max_retries` times. Permanent
    /// failures are returned immediately.
    async fn with_backoff<T, F, Fut>(&self, mut op: F) -> Result<T, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.retryable() && attempt < self.embedding.max_retries => {
                    attempt += 1;
                    let delay = backoff_delay(self.embedding.backoff_ms, attempt);
                    tracing::warn!(
                        attempt,
                        max_retries = self.embedding.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn halt(
    document_id: &str,
    failed_position: i64,
    committed: Vec<String>,
    source: PipelineError,
) -> IngestError {
    IngestError {
        document_id: document_id.to_string(),
        failed_position,
        committed,
        source,
    }
}

/// Delay before retry `attempt` (1-based): `backoff_ms * 2^(attempt-1)`,
/// with the exponent capped so configured ceilings stay bounded.
fn backoff_delay(backoff_ms: u64, attempt: u32) -> Duration {
    let shift = (attempt.saturating_sub(1)).min(6);
    Duration::from_millis(backoff_ms << shift)
}
