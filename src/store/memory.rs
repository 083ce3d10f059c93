//! In-memory [`ChunkStore`] implementation for tests and ephemeral runs.
//!
//! Uses `HashMap`s behind a `std::sync::RwLock`. Vector search is
//! brute-force over all stored embeddings; keyword search counts matching
//! query terms per chunk (no FTS index).

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::embedding::Metric;
use crate::error::PipelineError;
use crate::models::{Chunk, Document, ScoredChunk, SearchFilters, StoreStats};

use super::{order_results, result_chunk, ChunkStore};

struct StoredChunk {
    chunk: Chunk,
    seq: i64,
}

struct Inner {
    docs: HashMap<String, Document>,
    chunks: HashMap<String, StoredChunk>,
    next_seq: i64,
}

/// In-memory store; insertion order is tracked with an explicit sequence
/// counter so tie-breaking matches the durable backend.
pub struct MemoryStore {
    metric: Metric,
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new(metric: Metric) -> Self {
        Self {
            metric,
            inner: RwLock::new(Inner {
                docs: HashMap::new(),
                chunks: HashMap::new(),
                next_seq: 0,
            }),
        }
    }
}

#[async_trait]
impl ChunkStore for MemoryStore {
    async fn upsert_document(&self, doc: &Document) -> Result<(), PipelineError> {
        let mut inner = self.inner.write().unwrap();
        let entry = inner
            .docs
            .entry(doc.id.clone())
            .or_insert_with(|| doc.clone());
        let created_at = entry.created_at;
        *entry = doc.clone();
        entry.created_at = created_at;
        Ok(())
    }

    async fn document_by_source(
        &self,
        source: &str,
    ) -> Result<Option<Document>, PipelineError> {
        let inner = self.inner.read().unwrap();
        Ok(inner.docs.values().find(|d| d.source == source).cloned())
    }

    async fn upsert_chunk(&self, chunk: &Chunk) -> Result<(), PipelineError> {
        let mut guard = self.inner.write().unwrap();
        let inner = &mut *guard;
        match inner.chunks.entry(chunk.id.clone()) {
            Entry::Occupied(mut o) => {
                o.get_mut().chunk = chunk.clone();
            }
            Entry::Vacant(v) => {
                v.insert(StoredChunk {
                    chunk: chunk.clone(),
                    seq: inner.next_seq,
                });
                inner.next_seq += 1;
            }
        }
        Ok(())
    }

    async fn chunk_hashes(
        &self,
        document_id: &str,
    ) -> Result<HashMap<String, String>, PipelineError> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .chunks
            .values()
            .filter(|sc| sc.chunk.document_id == document_id)
            .map(|sc| (sc.chunk.id.clone(), sc.chunk.hash.clone()))
            .collect())
    }

    async fn prune_chunks(
        &self,
        document_id: &str,
        keep_ids: &[String],
    ) -> Result<u64, PipelineError> {
        let mut inner = self.inner.write().unwrap();
        let before = inner.chunks.len();
        inner.chunks.retain(|id, sc| {
            sc.chunk.document_id != document_id || keep_ids.iter().any(|k| k == id)
        });
        Ok((before - inner.chunks.len()) as u64)
    }

    async fn vector_search(
        &self,
        query: &[f32],
        k: i64,
        filters: &SearchFilters,
    ) -> Result<Vec<ScoredChunk>, PipelineError> {
        let inner = self.inner.read().unwrap();
        let candidates: Vec<ScoredChunk> = inner
            .chunks
            .values()
            .filter(|sc| filters.matches(&sc.chunk.document_id, sc.chunk.modality))
            .filter_map(|sc| {
                let embedding = sc.chunk.embedding.as_ref()?;
                Some(ScoredChunk {
                    score: self.metric.score(query, embedding) as f64,
                    chunk: result_chunk(sc.chunk.clone()),
                    seq: sc.seq,
                })
            })
            .collect();
        Ok(order_results(candidates, k))
    }

    async fn keyword_search(
        &self,
        query: &str,
        k: i64,
        filters: &SearchFilters,
    ) -> Result<Vec<ScoredChunk>, PipelineError> {
        let query_lower = query.to_lowercase();
        let terms: Vec<&str> = query_lower.split_whitespace().collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let inner = self.inner.read().unwrap();
        let candidates: Vec<ScoredChunk> = inner
            .chunks
            .values()
            .filter(|sc| filters.matches(&sc.chunk.document_id, sc.chunk.modality))
            .filter_map(|sc| {
                let text_lower = sc.chunk.content.to_lowercase();
                let matches = terms.iter().filter(|t| text_lower.contains(*t)).count();
                if matches == 0 {
                    return None;
                }
                Some(ScoredChunk {
                    score: matches as f64,
                    chunk: result_chunk(sc.chunk.clone()),
                    seq: sc.seq,
                })
            })
            .collect();
        Ok(order_results(candidates, k))
    }

    async fn stats(&self) -> Result<StoreStats, PipelineError> {
        let inner = self.inner.read().unwrap();
        let text_chunks = inner
            .chunks
            .values()
            .filter(|sc| sc.chunk.modality == crate::models::Modality::Text)
            .count() as i64;
        Ok(StoreStats {
            documents: inner.docs.len() as i64,
            chunks: inner.chunks.len() as i64,
            text_chunks,
            image_chunks: inner.chunks.len() as i64 - text_chunks,
        })
    }
}
