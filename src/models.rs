//! Core data models used throughout localrag.
//!
//! These types represent the documents, chunks, and answers that flow through
//! the ingestion and query pipelines. Documents and chunks are created during
//! ingestion and replaced wholesale on re-ingestion, never mutated in place;
//! retrieval results and answers are per-request values.

/// Content type of a source document, detected from an explicit hint or the
/// file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Text,
    Markdown,
    Pdf,
    Image,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Markdown => "markdown",
            ContentType::Pdf => "pdf",
            ContentType::Image => "image",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" | "txt" | "plain" => Some(ContentType::Text),
            "markdown" | "md" => Some(ContentType::Markdown),
            "pdf" => Some(ContentType::Pdf),
            "image" | "img" => Some(ContentType::Image),
            _ => None,
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "txt" | "text" | "log" | "csv" => Some(ContentType::Text),
            "md" | "markdown" => Some(ContentType::Markdown),
            "pdf" => Some(ContentType::Pdf),
            "png" | "jpg" | "jpeg" | "gif" | "webp" => Some(ContentType::Image),
            _ => None,
        }
    }
}

/// Modality of a chunk: plain text or an image region (caption + reference).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modality {
    Text,
    Image,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Text => "text",
            Modality::Image => "image",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Modality::Text),
            "image" => Some(Modality::Image),
            _ => None,
        }
    }
}

/// A source artifact (file or URL) registered in the store.
///
/// The id is a UUID assigned on first ingestion and stable across
/// re-ingestions of the same source. `dedup_hash` is a SHA-256 of the raw
/// bytes so an unchanged source can be skipped without re-chunking.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub source: String,
    pub title: Option<String>,
    pub content_type: ContentType,
    pub dedup_hash: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// An ordered content region extracted from a document before chunking.
#[derive(Debug, Clone)]
pub enum Region {
    Text {
        text: String,
        page: Option<i64>,
    },
    Image {
        reference: String,
        caption: Option<String>,
        data_base64: Option<String>,
        page: Option<i64>,
    },
}

/// The atomic retrievable unit.
///
/// Chunk ids are derived from the owning document and the chunk's position
/// (`"{document_id}:{position}"`), so re-ingesting a document overwrites its
/// chunks by id instead of accumulating duplicates. For image chunks,
/// `content` holds the caption or alt text used for embedding and keyword
/// match. The embedding is populated by the pipeline before the chunk is
/// persisted and matches the configured dimension.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub position: i64,
    pub modality: Modality,
    pub content: String,
    pub image_ref: Option<String>,
    pub image_data: Option<String>,
    pub page: Option<i64>,
    pub token_estimate: i64,
    pub hash: String,
    pub embedding: Option<Vec<f32>>,
}

/// A retrieved chunk with its similarity score and the store insertion
/// sequence used to break ties (earlier-inserted wins).
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f64,
    pub seq: i64,
}

/// Ordered retrieval output; scores are non-increasing by rank.
#[derive(Debug, Clone, Default)]
pub struct RetrievalResult {
    pub items: Vec<ScoredChunk>,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn chunk_ids(&self) -> Vec<String> {
        self.items.iter().map(|s| s.chunk.id.clone()).collect()
    }
}

/// Generator output: the answer text plus the ids of the chunks whose content
/// was placed in the prompt. Citations are never inferred from the model's
/// text; an answer produced without context carries an empty list.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub citations: Vec<String>,
    pub model: String,
}

/// Per-source ingestion summary.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub document_id: String,
    pub source: String,
    pub unchanged: bool,
    pub chunks_total: usize,
    pub embedded: usize,
    pub skipped: usize,
    pub pruned: usize,
}

/// Store-wide counts reported by `lrag stats`.
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub documents: i64,
    pub chunks: i64,
    pub text_chunks: i64,
    pub image_chunks: i64,
}

/// Optional narrowing applied to search: restrict to a set of documents
/// and/or a single modality.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub document_ids: Option<Vec<String>>,
    pub modality: Option<Modality>,
}

impl SearchFilters {
    pub fn matches(&self, document_id: &str, modality: Modality) -> bool {
        if let Some(ids) = &self.document_ids {
            if !ids.iter().any(|id| id == document_id) {
                return false;
            }
        }
        if let Some(m) = self.modality {
            if m != modality {
                return false;
            }
        }
        true
    }
}
