//! Embedding backend abstraction and implementations.
//!
//! Defines the [`Embedder`] trait and concrete implementations:
//! - **[`OllamaEmbedder`]** — calls a local Ollama server, one request per text.
//! - **[`OpenAiEmbedder`]** — calls the OpenAI embeddings API with batching.
//! - **[`HashedEmbedder`]** — deterministic offline vectors derived from a
//!   SHA-256 of the input; no network, used for fixtures and smoke tests.
//!
//! Also provides vector utilities for store-side similarity:
//! - [`cosine_similarity`] / [`dot_product`] — score two embedding vectors
//! - [`vec_to_blob`] / [`blob_to_vec`] — convert between `Vec<f32>` and the
//!   little-endian byte form stored in SQLite BLOB columns
//!
//! # Backend Selection
//!
//! Use [`create_embedder`] to instantiate the backend named in the
//! configuration, once at startup:
//!
//! ```rust,no_run
//! # use localrag::config::EmbeddingConfig;
//! # use localrag::embedding::create_embedder;
//! let mut config = EmbeddingConfig::default();
//! config.provider = "hashed".to_string();
//! let embedder = create_embedder(&config).unwrap();
//! assert_eq!(embedder.dims(), 768);
//! ```
//!
//! # Failure Classification
//!
//! Backends never retry internally; they classify each failure so the
//! ingestion path can apply its own bounded backoff:
//! - HTTP 429 (rate limited), 5xx (server error), network errors → retryable
//! - other HTTP 4xx, malformed responses, dimension mismatches → permanent

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::PipelineError;

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

/// Trait for embedding backends.
///
/// Implementations are pure mappings: identical input and configuration
/// produce identical vectors, and no state is kept beyond a cached HTTP
/// client.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Backend name as configured (`"ollama"`, `"openai"`, `"hashed"`).
    fn provider(&self) -> &'static str;
    /// Model identifier recorded in the store's meta table.
    fn model_name(&self) -> &str;
    /// Dimensionality every returned vector carries.
    fn dims(&self) -> usize;
    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError>;
}

/// Embed a single query text.
///
/// Convenience wrapper around [`Embedder::embed`] for the query path.
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>, PipelineError> {
    let results = embedder.embed(&[text.to_string()]).await?;
    results.into_iter().next().ok_or_else(|| {
        backend_err(embedder.provider(), "empty embedding response", false)
    })
}

/// Instantiate the embedding backend named in the configuration.
///
/// | Config value | Backend |
/// |--------------|---------|
/// | `"ollama"`   | [`OllamaEmbedder`] |
/// | `"openai"`   | [`OpenAiEmbedder`] |
/// | `"hashed"`   | [`HashedEmbedder`] |
pub fn create_embedder(config: &EmbeddingConfig) -> anyhow::Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
        "hashed" => Ok(Arc::new(HashedEmbedder::new(config))),
        other => anyhow::bail!("Unknown embedding provider: {}", other),
    }
}

fn backend_err(
    provider: &'static str,
    reason: impl std::fmt::Display,
    retryable: bool,
) -> PipelineError {
    PipelineError::EmbeddingBackend {
        provider: provider.to_string(),
        reason: reason.to_string(),
        retryable,
    }
}

/// Classify an HTTP failure status: rate limits and server errors are worth
/// retrying, other client errors are not.
fn status_retryable(status: reqwest::StatusCode) -> bool {
    status.as_u16() == 429 || status.is_server_error()
}

fn check_dims(
    provider: &'static str,
    dims: usize,
    vectors: &[Vec<f32>],
) -> Result<(), PipelineError> {
    for v in vectors {
        if v.len() != dims {
            return Err(backend_err(
                provider,
                format!("returned {} dims, expected {}", v.len(), dims),
                false,
            ));
        }
    }
    Ok(())
}

// ============ Ollama ============

/// Embedding backend for a local Ollama server.
///
/// Calls `POST {base_url}/api/embeddings` once per input text; the endpoint
/// does not batch.
pub struct OllamaEmbedder {
    model: String,
    dims: usize,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OllamaEmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct OllamaEmbeddingResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model: config.model.clone(),
            dims: config.dims,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, PipelineError> {
        let url = format!("{}/api/embeddings", self.base_url);
        let body = OllamaEmbeddingRequest {
            model: &self.model,
            prompt: text,
        };
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| backend_err("ollama", e, true))?;
        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(backend_err(
                "ollama",
                format!("HTTP {status}: {body_text}"),
                status_retryable(status),
            ));
        }
        let parsed: OllamaEmbeddingResponse = resp
            .json()
            .await
            .map_err(|e| backend_err("ollama", e, false))?;
        Ok(parsed.embedding)
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn provider(&self) -> &'static str {
        "ollama"
    }
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed_one(text).await?);
        }
        check_dims("ollama", self.dims, &out)?;
        Ok(out)
    }
}

// ============ OpenAI ============

/// Embedding backend for the OpenAI embeddings API.
///
/// Sends the whole batch in one `POST /v1/embeddings` call and restores
/// input order from the response indices.
pub struct OpenAiEmbedder {
    model: String,
    dims: usize,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OpenAiEmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct OpenAiEmbeddingsResponse {
    data: Vec<OpenAiEmbeddingRow>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingRow {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            anyhow::anyhow!(
                "embedding API key missing; set {} in the environment",
                config.api_key_env
            )
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model: config.model.clone(),
            dims: config.dims,
            api_key,
            client,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn provider(&self) -> &'static str {
        "openai"
    }
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        let body = OpenAiEmbeddingsRequest {
            model: &self.model,
            input: texts,
        };
        let resp = self
            .client
            .post(OPENAI_EMBEDDINGS_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| backend_err("openai", e, true))?;
        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(backend_err(
                "openai",
                format!("HTTP {status}: {body_text}"),
                status_retryable(status),
            ));
        }
        let mut parsed: OpenAiEmbeddingsResponse = resp
            .json()
            .await
            .map_err(|e| backend_err("openai", e, false))?;
        parsed.data.sort_by_key(|row| row.index);
        if parsed.data.len() != texts.len() {
            return Err(backend_err(
                "openai",
                format!("returned {} vectors for {} inputs", parsed.data.len(), texts.len()),
                false,
            ));
        }
        let out: Vec<Vec<f32>> = parsed.data.into_iter().map(|row| row.embedding).collect();
        check_dims("openai", self.dims, &out)?;
        Ok(out)
    }
}

// ============ Hashed ============

/// Deterministic offline embedding backend.
///
/// Expands a SHA-256 of the input into `dims` floats and normalizes the
/// result to unit length, so cosine and dot metrics agree and identical
/// texts always score 1.0 against each other. Carries no semantic signal;
/// intended for tests and air-gapped smoke runs.
pub struct HashedEmbedder {
    model: String,
    dims: usize,
}

impl HashedEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Self {
        Self {
            model: config.model.clone(),
            dims: config.dims,
        }
    }
}

#[async_trait]
impl Embedder for HashedEmbedder {
    fn provider(&self) -> &'static str {
        "hashed"
    }
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        Ok(texts
            .iter()
            .map(|t| hashed_vector(t, self.dims))
            .collect())
    }
}

/// Derive a unit-length vector of `dims` floats from the input text.
fn hashed_vector(text: &str, dims: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(dims);
    let mut counter: u32 = 0;
    'fill: loop {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hasher.update(counter.to_le_bytes());
        let digest = hasher.finalize();
        for chunk in digest.chunks_exact(4) {
            let bits = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            out.push((bits as f32 / u32::MAX as f32) * 2.0 - 1.0);
            if out.len() == dims {
                break 'fill;
            }
        }
        counter += 1;
    }
    let norm = out.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in &mut out {
            *v /= norm;
        }
    }
    out
}

// ============ Vector utilities ============

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// Each `f32` is stored as 4 bytes in little-endian order, producing a BLOB
/// of `vec.len() × 4` bytes.
///
/// # Example
///
/// ```rust
/// use localrag::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![0.5f32, -1.25, 2.0];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
///
/// Reverses [`vec_to_blob`]: reads 4-byte little-endian `f32` values.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Similarity metric applied by the stores during vector search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Cosine,
    Dot,
}

impl Metric {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cosine" => Some(Metric::Cosine),
            "dot" => Some(Metric::Dot),
            _ => None,
        }
    }

    pub fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::Cosine => cosine_similarity(a, b),
            Metric::Dot => dot_product(a, b),
        }
    }
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Dot product of two embedding vectors; `0.0` for empty or mismatched
/// lengths.
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
