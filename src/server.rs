//! JSON HTTP surface over the pipeline.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/ingest` | Ingest one source (file path or URL) |
//! | `POST` | `/query`  | Retrieve context and generate an answer |
//!
//! # Error Contract
//!
//! All error responses share one schema:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `backend_error` (502), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser-based
//! clients can call the API directly.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::error::{AskError, IngestError, PipelineError};
use crate::models::{ContentType, Modality, SearchFilters};
use crate::pipeline::Pipeline;
use crate::retrieve::SearchMode;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
}

/// Start the HTTP server on the address configured in `[server].bind`.
///
/// Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pipeline = Arc::new(Pipeline::from_config(config).await?);
    let state = AppState { pipeline };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/ingest", post(handle_ingest))
        .route("/query", post(handle_query))
        .layer(cors)
        .with_state(state);

    println!("Server listening on http://{}", config.server.bind);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

/// Map a pipeline failure to the HTTP contract: malformed input is the
/// caller's fault, backend trouble is a gateway problem, and store trouble
/// is ours.
fn classify(e: &PipelineError) -> AppError {
    let (status, code) = match e {
        PipelineError::DocumentParse { .. } => (StatusCode::BAD_REQUEST, "bad_request"),
        PipelineError::EmbeddingBackend { .. } | PipelineError::GenerationBackend { .. } => {
            (StatusCode::BAD_GATEWAY, "backend_error")
        }
        PipelineError::StoreUnavailable { .. } => {
            (StatusCode::INTERNAL_SERVER_ERROR, "internal")
        }
    };
    AppError {
        status,
        code: code.to_string(),
        message: e.to_string(),
    }
}

fn ingest_error(e: IngestError) -> AppError {
    let mut app = classify(&e.source);
    app.message = format!("{e}: {}", e.source);
    app
}

fn ask_error(e: AskError) -> AppError {
    classify(&e.source)
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /ingest ============

#[derive(Deserialize)]
struct IngestRequest {
    source: String,
    content_type: Option<String>,
}

#[derive(Serialize)]
struct IngestResponse {
    document_id: String,
    source: String,
    unchanged: bool,
    chunks_total: usize,
    embedded: usize,
    skipped: usize,
    pruned: usize,
}

async fn handle_ingest(
    State(state): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<IngestResponse>, AppError> {
    if req.source.trim().is_empty() {
        return Err(bad_request("source must not be empty"));
    }
    let hint = match &req.content_type {
        Some(s) => Some(
            ContentType::parse(s)
                .ok_or_else(|| bad_request(format!("unknown content type: {s}")))?,
        ),
        None => None,
    };

    let report = state
        .pipeline
        .ingest_source(&req.source, hint)
        .await
        .map_err(ingest_error)?;

    Ok(Json(IngestResponse {
        document_id: report.document_id,
        source: report.source,
        unchanged: report.unchanged,
        chunks_total: report.chunks_total,
        embedded: report.embedded,
        skipped: report.skipped,
        pruned: report.pruned,
    }))
}

// ============ POST /query ============

#[derive(Deserialize)]
struct QueryRequest {
    question: String,
    mode: Option<String>,
    top_k: Option<i64>,
    document_ids: Option<Vec<String>>,
    modality: Option<String>,
}

#[derive(Serialize)]
struct QueryResponse {
    answer: String,
    citations: Vec<String>,
    model: String,
    results: Vec<QueryResultItem>,
}

#[derive(Serialize)]
struct QueryResultItem {
    chunk_id: String,
    document_id: String,
    position: i64,
    modality: String,
    page: Option<i64>,
    score: f64,
    snippet: String,
}

async fn handle_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    if req.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }
    let mode = match &req.mode {
        Some(s) => SearchMode::parse(s).ok_or_else(|| {
            bad_request(format!(
                "unknown search mode: {s}. Use keyword, semantic, or hybrid."
            ))
        })?,
        None => state.pipeline.default_mode(),
    };
    let top_k = req.top_k.unwrap_or_else(|| state.pipeline.default_top_k());
    if top_k < 1 {
        return Err(bad_request("top_k must be at least 1"));
    }
    let modality = match &req.modality {
        Some(s) => Some(
            Modality::parse(s).ok_or_else(|| bad_request(format!("unknown modality: {s}")))?,
        ),
        None => None,
    };
    let filters = SearchFilters {
        document_ids: req.document_ids.clone(),
        modality,
    };

    let (retrieval, answer) = state
        .pipeline
        .ask(&req.question, mode, top_k, &filters)
        .await
        .map_err(ask_error)?;

    let results = retrieval
        .items
        .iter()
        .map(|item| QueryResultItem {
            chunk_id: item.chunk.id.clone(),
            document_id: item.chunk.document_id.clone(),
            position: item.chunk.position,
            modality: item.chunk.modality.as_str().to_string(),
            page: item.chunk.page,
            score: item.score,
            snippet: snippet_of(&item.chunk.content, 240),
        })
        .collect();

    Ok(Json(QueryResponse {
        answer: answer.text,
        citations: answer.citations,
        model: answer.model,
        results,
    }))
}

fn snippet_of(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &content[..idx]),
        None => content.to_string(),
    }
}
