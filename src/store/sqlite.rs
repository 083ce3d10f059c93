//! Durable [`ChunkStore`] backed by SQLite.
//!
//! Chunks live in one table with their embedding as a little-endian f32
//! BLOB; keyword search goes through an FTS5 index kept in sync inside the
//! same transaction as each chunk write. Vector search is a brute-force
//! scan with the similarity computed in Rust.
//!
//! The `meta` table records the embedding model and dimensionality at first
//! open; a later open with a different embedding setup fails fast so
//! incompatible vectors never mix.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use crate::config::StorageConfig;
use crate::embedding::{blob_to_vec, vec_to_blob, Metric};
use crate::error::PipelineError;
use crate::models::{Chunk, ContentType, Document, Modality, ScoredChunk, SearchFilters, StoreStats};

use super::{order_results, ChunkStore};

pub struct SqliteStore {
    pool: SqlitePool,
    metric: Metric,
}

impl SqliteStore {
    /// Open (creating if missing) the database at the configured path, run
    /// migrations, and verify the recorded embedding setup.
    pub async fn open(
        storage: &StorageConfig,
        metric: Metric,
        embedding_model: &str,
        embedding_dims: usize,
    ) -> anyhow::Result<Self> {
        let pool = connect(&storage.path).await?;
        migrate(&pool).await?;
        check_meta(&pool, embedding_model, embedding_dims).await?;
        Ok(Self { pool, metric })
    }
}

async fn connect(db_path: &Path) -> anyhow::Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            source TEXT NOT NULL UNIQUE,
            title TEXT,
            content_type TEXT NOT NULL DEFAULT 'text',
            dedup_hash TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            modality TEXT NOT NULL DEFAULT 'text',
            content TEXT NOT NULL,
            image_ref TEXT,
            image_data TEXT,
            page INTEGER,
            token_estimate INTEGER NOT NULL,
            hash TEXT NOT NULL,
            embedding BLOB,
            UNIQUE(document_id, position),
            FOREIGN KEY (document_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunks_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE chunks_fts USING fts5(
                chunk_id UNINDEXED,
                document_id UNINDEXED,
                content
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_source ON documents(source)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Verify (or record) the embedding model and dimensionality this store was
/// built with.
async fn check_meta(pool: &SqlitePool, model: &str, dims: usize) -> anyhow::Result<()> {
    let stored_model: Option<String> =
        sqlx::query_scalar("SELECT value FROM meta WHERE key = 'embedding_model'")
            .fetch_optional(pool)
            .await?;
    let stored_dims: Option<String> =
        sqlx::query_scalar("SELECT value FROM meta WHERE key = 'embedding_dims'")
            .fetch_optional(pool)
            .await?;

    if let Some(m) = &stored_model {
        if m != model {
            anyhow::bail!(
                "store was built with embedding model '{}', configuration says '{}'; \
                 re-ingest into a fresh database to switch models",
                m,
                model
            );
        }
    }
    if let Some(d) = &stored_dims {
        if d != &dims.to_string() {
            anyhow::bail!(
                "store was built with {} embedding dims, configuration says {}; \
                 re-ingest into a fresh database to switch dimensions",
                d,
                dims
            );
        }
    }

    for (key, value) in [
        ("embedding_model", model.to_string()),
        ("embedding_dims", dims.to_string()),
    ] {
        sqlx::query(
            "INSERT INTO meta (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(pool)
        .await?;
    }
    Ok(())
}

fn store_err(e: impl std::fmt::Display) -> PipelineError {
    PipelineError::StoreUnavailable {
        reason: e.to_string(),
    }
}

/// Build an FTS5 MATCH expression from free text: phrase-quote each term
/// and OR them together, so natural-language questions never trip FTS
/// syntax.
fn fts_query(query: &str) -> String {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{t}\""))
        .collect::<Vec<_>>()
        .join(" OR ")
}

fn row_chunk(row: &SqliteRow) -> (Chunk, i64) {
    let modality: String = row.get("modality");
    let chunk = Chunk {
        id: row.get("id"),
        document_id: row.get("document_id"),
        position: row.get("position"),
        modality: Modality::parse(&modality).unwrap_or(Modality::Text),
        content: row.get("content"),
        image_ref: row.get("image_ref"),
        image_data: None,
        page: row.get("page"),
        token_estimate: row.get("token_estimate"),
        hash: row.get("hash"),
        embedding: None,
    };
    (chunk, row.get("seq"))
}

#[async_trait]
impl ChunkStore for SqliteStore {
    async fn upsert_document(&self, doc: &Document) -> Result<(), PipelineError> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, source, title, content_type, dedup_hash, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                source = excluded.source,
                title = excluded.title,
                content_type = excluded.content_type,
                dedup_hash = excluded.dedup_hash,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.source)
        .bind(&doc.title)
        .bind(doc.content_type.as_str())
        .bind(&doc.dedup_hash)
        .bind(doc.created_at)
        .bind(doc.updated_at)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn document_by_source(
        &self,
        source: &str,
    ) -> Result<Option<Document>, PipelineError> {
        let row = sqlx::query(
            "SELECT id, source, title, content_type, dedup_hash, created_at, updated_at \
             FROM documents WHERE source = ?",
        )
        .bind(source)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(row.map(|row| {
            let content_type: String = row.get("content_type");
            Document {
                id: row.get("id"),
                source: row.get("source"),
                title: row.get("title"),
                content_type: ContentType::parse(&content_type).unwrap_or(ContentType::Text),
                dedup_hash: row.get("dedup_hash"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            }
        }))
    }

    async fn upsert_chunk(&self, chunk: &Chunk) -> Result<(), PipelineError> {
        let blob = chunk.embedding.as_ref().map(|v| vec_to_blob(v));
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        // ON CONFLICT DO UPDATE keeps the existing rowid, which is the
        // insertion sequence used for tie-breaking.
        sqlx::query(
            r#"
            INSERT INTO chunks (id, document_id, position, modality, content,
                                image_ref, image_data, page, token_estimate, hash, embedding)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                document_id = excluded.document_id,
                position = excluded.position,
                modality = excluded.modality,
                content = excluded.content,
                image_ref = excluded.image_ref,
                image_data = excluded.image_data,
                page = excluded.page,
                token_estimate = excluded.token_estimate,
                hash = excluded.hash,
                embedding = excluded.embedding
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk.position)
        .bind(chunk.modality.as_str())
        .bind(&chunk.content)
        .bind(&chunk.image_ref)
        .bind(&chunk.image_data)
        .bind(chunk.page)
        .bind(chunk.token_estimate)
        .bind(&chunk.hash)
        .bind(blob)
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        sqlx::query("DELETE FROM chunks_fts WHERE chunk_id = ?")
            .bind(&chunk.id)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        sqlx::query("INSERT INTO chunks_fts (chunk_id, document_id, content) VALUES (?, ?, ?)")
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(&chunk.content)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;

        tx.commit().await.map_err(store_err)?;
        Ok(())
    }

    async fn chunk_hashes(
        &self,
        document_id: &str,
    ) -> Result<HashMap<String, String>, PipelineError> {
        let rows = sqlx::query("SELECT id, hash FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(rows
            .iter()
            .map(|row| (row.get("id"), row.get("hash")))
            .collect())
    }

    async fn prune_chunks(
        &self,
        document_id: &str,
        keep_ids: &[String],
    ) -> Result<u64, PipelineError> {
        let stored: Vec<String> = sqlx::query_scalar("SELECT id FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        let stale: Vec<&String> = stored
            .iter()
            .filter(|id| !keep_ids.iter().any(|k| k == *id))
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.map_err(store_err)?;
        for id in &stale {
            sqlx::query("DELETE FROM chunks_fts WHERE chunk_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
            sqlx::query("DELETE FROM chunks WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
        }
        tx.commit().await.map_err(store_err)?;
        Ok(stale.len() as u64)
    }

    async fn vector_search(
        &self,
        query: &[f32],
        k: i64,
        filters: &SearchFilters,
    ) -> Result<Vec<ScoredChunk>, PipelineError> {
        // Fetch all vectors and compute similarity in Rust
        let rows = sqlx::query(
            r#"
            SELECT rowid AS seq, id, document_id, position, modality, content,
                   image_ref, page, token_estimate, hash, embedding
            FROM chunks
            WHERE embedding IS NOT NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        let candidates: Vec<ScoredChunk> = rows
            .iter()
            .filter_map(|row| {
                let (chunk, seq) = row_chunk(row);
                if !filters.matches(&chunk.document_id, chunk.modality) {
                    return None;
                }
                let blob: Vec<u8> = row.get("embedding");
                let vec = blob_to_vec(&blob);
                Some(ScoredChunk {
                    score: self.metric.score(query, &vec) as f64,
                    chunk,
                    seq,
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
        let match_expr = fts_query(query);
        if match_expr.is_empty() {
            return Ok(Vec::new());
        }

        // Filters are applied after the query, so a SQL LIMIT could starve
        // them of eligible rows. Negative LIMIT means unbounded in SQLite.
        let limit = if filters.document_ids.is_none() && filters.modality.is_none() {
            k
        } else {
            -1
        };

        let rows = sqlx::query(
            r#"
            SELECT c.rowid AS seq, c.id, c.document_id, c.position, c.modality,
                   c.content, c.image_ref, c.page, c.token_estimate, c.hash,
                   f.rank AS rank
            FROM chunks_fts f
            JOIN chunks c ON c.id = f.chunk_id
            WHERE chunks_fts MATCH ?
            ORDER BY rank
            LIMIT ?
            "#,
        )
        .bind(&match_expr)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        let candidates: Vec<ScoredChunk> = rows
            .iter()
            .filter_map(|row| {
                let (chunk, seq) = row_chunk(row);
                if !filters.matches(&chunk.document_id, chunk.modality) {
                    return None;
                }
                let rank: f64 = row.get("rank");
                Some(ScoredChunk {
                    score: -rank, // negate so higher = better
                    chunk,
                    seq,
                })
            })
            .collect();

        Ok(order_results(candidates, k))
    }

    async fn stats(&self) -> Result<StoreStats, PipelineError> {
        let documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;
        let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;
        let text_chunks: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE modality = 'text'")
                .fetch_one(&self.pool)
                .await
                .map_err(store_err)?;
        let image_chunks: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE modality = 'image'")
                .fetch_one(&self.pool)
                .await
                .map_err(store_err)?;
        Ok(StoreStats {
            documents,
            chunks,
            text_chunks,
            image_chunks,
        })
    }
}
