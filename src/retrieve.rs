//! Retrieval over the chunk store: keyword, semantic, and hybrid modes.
//!
//! Hybrid retrieval runs both channels, min-max normalizes each channel's
//! scores to `[0, 1]`, and fuses them per chunk:
//!
//! ```text
//! score = (1 - alpha) * keyword + alpha * vector
//! ```
//!
//! `alpha` comes from the retrieval configuration; keyword mode pins it to
//! `0.0` and semantic mode to `1.0`, so every mode flows through the same
//! fusion step. Final results are sorted by fused score with insertion
//! order breaking ties, then truncated to `k`.

use std::collections::HashMap;

use crate::config::RetrievalConfig;
use crate::embedding::{embed_query, Embedder};
use crate::error::PipelineError;
use crate::models::{RetrievalResult, ScoredChunk, SearchFilters};
use crate::store::{order_results, ChunkStore};

/// Which retrieval channels to consult.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Keyword,
    Semantic,
    Hybrid,
}

impl SearchMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "keyword" => Some(SearchMode::Keyword),
            "semantic" => Some(SearchMode::Semantic),
            "hybrid" => Some(SearchMode::Hybrid),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Keyword => "keyword",
            SearchMode::Semantic => "semantic",
            SearchMode::Hybrid => "hybrid",
        }
    }
}

/// Run a query against the store and return at most `k` fused results.
///
/// Keyword mode never touches the embedder; the query is only embedded when
/// a vector channel is in play.
pub async fn retrieve(
    store: &dyn ChunkStore,
    embedder: &dyn Embedder,
    config: &RetrievalConfig,
    query: &str,
    mode: SearchMode,
    k: i64,
    filters: &SearchFilters,
) -> Result<RetrievalResult, PipelineError> {
    let candidate_k = config.candidate_k.max(k);

    // Collect candidates from each channel
    let keyword_candidates = if matches!(mode, SearchMode::Keyword | SearchMode::Hybrid) {
        store.keyword_search(query, candidate_k, filters).await?
    } else {
        Vec::new()
    };

    let vector_candidates = if matches!(mode, SearchMode::Semantic | SearchMode::Hybrid) {
        let query_vec = embed_query(embedder, query).await?;
        store.vector_search(&query_vec, candidate_k, filters).await?
    } else {
        Vec::new()
    };

    tracing::debug!(
        mode = mode.as_str(),
        keyword = keyword_candidates.len(),
        vector = vector_candidates.len(),
        "collected retrieval candidates"
    );

    if keyword_candidates.is_empty() && vector_candidates.is_empty() {
        return Ok(RetrievalResult::default());
    }

    // Normalize scores per channel
    let norm_keyword = normalize_scores(&keyword_candidates);
    let norm_vector = normalize_scores(&vector_candidates);

    let kw_map: HashMap<&str, f64> = norm_keyword
        .iter()
        .map(|(c, s)| (c.chunk.id.as_str(), *s))
        .collect();
    let vec_map: HashMap<&str, f64> = norm_vector
        .iter()
        .map(|(c, s)| (c.chunk.id.as_str(), *s))
        .collect();

    // Merge all unique chunk candidates
    let mut all_chunks: HashMap<String, &ScoredChunk> = HashMap::new();
    for c in &keyword_candidates {
        all_chunks.entry(c.chunk.id.clone()).or_insert(c);
    }
    for c in &vector_candidates {
        all_chunks.entry(c.chunk.id.clone()).or_insert(c);
    }

    let effective_alpha = match mode {
        SearchMode::Keyword => 0.0,
        SearchMode::Semantic => 1.0,
        SearchMode::Hybrid => config.hybrid_alpha,
    };

    let fused: Vec<ScoredChunk> = all_chunks
        .iter()
        .map(|(id, cand)| {
            let kw = kw_map.get(id.as_str()).copied().unwrap_or(0.0);
            let vs = vec_map.get(id.as_str()).copied().unwrap_or(0.0);
            ScoredChunk {
                chunk: cand.chunk.clone(),
                score: (1.0 - effective_alpha) * kw + effective_alpha * vs,
                seq: cand.seq,
            }
        })
        .collect();

    Ok(RetrievalResult {
        items: order_results(fused, k),
    })
}

/// Min-max normalize raw channel scores to `[0, 1]`.
///
/// A channel whose scores are all equal maps everything to `1.0` so a
/// single-candidate channel still contributes full weight.
fn normalize_scores(candidates: &[ScoredChunk]) -> Vec<(&ScoredChunk, f64)> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let s_min = candidates
        .iter()
        .map(|c| c.score)
        .fold(f64::INFINITY, f64::min);
    let s_max = candidates
        .iter()
        .map(|c| c.score)
        .fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|c| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (c.score - s_min) / (s_max - s_min)
            };
            (c, norm)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingConfig;
    use crate::embedding::{HashedEmbedder, Metric};
    use crate::models::{Chunk, Modality};
    use crate::store::memory::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn scored(id: &str, score: f64, seq: i64) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                id: id.to_string(),
                document_id: "d".to_string(),
                position: seq,
                modality: Modality::Text,
                content: String::new(),
                image_ref: None,
                image_data: None,
                page: None,
                token_estimate: 0,
                hash: String::new(),
                embedding: None,
            },
            score,
            seq,
        }
    }

    fn hashed_embedder(dims: usize) -> HashedEmbedder {
        let config = EmbeddingConfig {
            provider: "hashed".to_string(),
            dims,
            ..EmbeddingConfig::default()
        };
        HashedEmbedder::new(&config)
    }

    fn retrieval_config() -> RetrievalConfig {
        RetrievalConfig::default()
    }

    async fn seed(store: &MemoryStore, id: &str, content: &str, embedding: Vec<f32>) {
        store
            .upsert_chunk(&Chunk {
                id: id.to_string(),
                document_id: "d".to_string(),
                position: 0,
                modality: Modality::Text,
                content: content.to_string(),
                image_ref: None,
                image_data: None,
                page: None,
                token_estimate: 1,
                hash: id.to_string(),
                embedding: Some(embedding),
            })
            .await
            .unwrap();
    }

    struct CountingEmbedder {
        inner: HashedEmbedder,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        fn provider(&self) -> &'static str {
            "hashed"
        }
        fn model_name(&self) -> &str {
            self.inner.model_name()
        }
        fn dims(&self) -> usize {
            self.inner.dims()
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.embed(texts).await
        }
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!(SearchMode::parse("keyword"), Some(SearchMode::Keyword));
        assert_eq!(SearchMode::parse("semantic"), Some(SearchMode::Semantic));
        assert_eq!(SearchMode::parse("hybrid"), Some(SearchMode::Hybrid));
        assert_eq!(SearchMode::parse("fuzzy"), None);
    }

    #[test]
    fn test_normalize_empty() {
        let result = normalize_scores(&[]);
        assert!(result.is_empty());
    }

    #[test]
    fn test_normalize_single() {
        let candidates = vec![scored("c1", 5.0, 0)];
        let result = normalize_scores(&candidates);
        assert_eq!(result.len(), 1);
        assert!((result[0].1 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_range() {
        let candidates = vec![
            scored("c1", 10.0, 0),
            scored("c2", 5.0, 1),
            scored("c3", 0.0, 2),
        ];
        let result = normalize_scores(&candidates);
        assert!((result[0].1 - 1.0).abs() < 1e-9);
        assert!((result[1].1 - 0.5).abs() < 1e-9);
        assert!((result[2].1 - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_all_equal() {
        let candidates = vec![scored("c1", 3.0, 0), scored("c2", 3.0, 1)];
        let result = normalize_scores(&candidates);
        for (_, score) in &result {
            assert!((*score - 1.0).abs() < 1e-9);
        }
    }

    #[tokio::test]
    async fn test_keyword_mode_never_embeds() {
        let store = MemoryStore::new(Metric::Cosine);
        seed(&store, "d:0", "alpha beta", vec![1.0, 0.0]).await;
        let embedder = CountingEmbedder {
            inner: hashed_embedder(2),
            calls: AtomicUsize::new(0),
        };

        let result = retrieve(
            &store,
            &embedder,
            &retrieval_config(),
            "alpha",
            SearchMode::Keyword,
            5,
            &SearchFilters::default(),
        )
        .await
        .unwrap();

        assert_eq!(result.items.len(), 1);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_hybrid_merges_both_channels() {
        let store = MemoryStore::new(Metric::Cosine);
        let embedder = hashed_embedder(16);
        // One chunk only a keyword channel can find, one only vectors can.
        let query_vec = embed_query(&embedder, "alpha").await.unwrap();
        let far_vec = embed_query(&embedder, "completely unrelated").await.unwrap();
        seed(&store, "d:0", "alpha beta", far_vec).await;
        seed(&store, "d:1", "no shared words here", query_vec).await;

        let result = retrieve(
            &store,
            &embedder,
            &retrieval_config(),
            "alpha",
            SearchMode::Hybrid,
            5,
            &SearchFilters::default(),
        )
        .await
        .unwrap();
        let ids = result.chunk_ids();
        assert!(ids.contains(&"d:0".to_string()));
        assert!(ids.contains(&"d:1".to_string()));

        let keyword_only = retrieve(
            &store,
            &embedder,
            &retrieval_config(),
            "alpha",
            SearchMode::Keyword,
            5,
            &SearchFilters::default(),
        )
        .await
        .unwrap();
        assert_eq!(keyword_only.chunk_ids(), vec!["d:0".to_string()]);
    }

    #[tokio::test]
    async fn test_semantic_ranks_matching_vector_first() {
        let store = MemoryStore::new(Metric::Cosine);
        let embedder = hashed_embedder(16);
        let near = embed_query(&embedder, "how does retrieval work").await.unwrap();
        let far = embed_query(&embedder, "grocery list").await.unwrap();
        seed(&store, "d:0", "far away", far).await;
        seed(&store, "d:1", "close match", near).await;

        let result = retrieve(
            &store,
            &embedder,
            &retrieval_config(),
            "how does retrieval work",
            SearchMode::Semantic,
            5,
            &SearchFilters::default(),
        )
        .await
        .unwrap();
        assert_eq!(result.items[0].chunk.id, "d:1");
        assert!((result.items[0].score - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_result_count_bounded_by_k() {
        let store = MemoryStore::new(Metric::Cosine);
        let embedder = hashed_embedder(2);
        for i in 0..5 {
            seed(&store, &format!("d:{i}"), "common term", vec![1.0, 0.0]).await;
        }
        let result = retrieve(
            &store,
            &embedder,
            &retrieval_config(),
            "common",
            SearchMode::Keyword,
            2,
            &SearchFilters::default(),
        )
        .await
        .unwrap();
        assert_eq!(result.items.len(), 2);
    }
}
