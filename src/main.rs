//! # localrag CLI (`lrag`)
//!
//! The `lrag` binary is the primary interface for localrag. It provides
//! commands for database initialization, source ingestion, retrieval,
//! grounded question answering, and starting the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! lrag --config ./config/lrag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `lrag init` | Write a starter config and create the SQLite database |
//! | `lrag ingest <SOURCE>...` | Ingest files, directories, or URLs |
//! | `lrag search "<query>"` | Search indexed chunks |
//! | `lrag ask "<question>"` | Retrieve context and generate a cited answer |
//! | `lrag stats` | Show store counts |
//! | `lrag serve` | Start the JSON HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize config and database
//! lrag init --config ./config/lrag.toml
//!
//! # Ingest a directory of notes and one PDF
//! lrag ingest ./notes ./papers/attention.pdf
//!
//! # Hybrid search with a modality filter
//! lrag search "transformer architecture" --mode hybrid --modality text
//!
//! # Ask a question against everything ingested
//! lrag ask "what does the attention paper conclude?"
//!
//! # Start the HTTP server
//! lrag serve
//! ```

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use localrag::chunker;
use localrag::config::{self, Config};
use localrag::loader;
use localrag::models::{ContentType, Modality, SearchFilters};
use localrag::pipeline::Pipeline;
use localrag::retrieve::SearchMode;
use localrag::server;

/// localrag CLI — local-first retrieval-augmented generation.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. `lrag init` writes a commented starter config to that path.
#[derive(Parser)]
#[command(
    name = "lrag",
    about = "localrag — local-first retrieval-augmented generation over your own documents",
    version,
    long_about = "localrag ingests text, Markdown, PDF, and image sources into a SQLite store, \
    retrieves relevant chunks by keyword, semantic, or hybrid search, and generates answers \
    grounded in exactly the chunks the model was shown."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/lrag.toml`. Storage, chunking, embedding,
    /// retrieval, generation, and server settings are read from this file.
    #[arg(long, global = true, default_value = "./config/lrag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration and database.
    ///
    /// Writes a commented starter config to the `--config` path if none
    /// exists, then creates the SQLite database and schema. This command
    /// is idempotent — running it multiple times is safe.
    Init,

    /// Ingest sources into the store.
    ///
    /// Each source may be a file, a directory (walked recursively with
    /// `.git`, `target`, and `node_modules` excluded), or an http(s) URL.
    /// Re-ingesting a known source replaces its chunks; unchanged sources
    /// are skipped by content hash.
    Ingest {
        /// Files, directories, or http(s) URLs.
        #[arg(required = true)]
        sources: Vec<String>,

        /// Content type override: `text`, `markdown`, `pdf`, or `image`.
        /// By default the type is inferred from the file extension.
        #[arg(long = "type")]
        content_type: Option<String>,

        /// Additional exclude glob for directory walks (repeatable).
        #[arg(long)]
        exclude: Vec<String>,

        /// Show source and chunk counts without writing to the database.
        #[arg(long)]
        dry_run: bool,
    },

    /// Search indexed chunks.
    ///
    /// Returns ranked chunks with scores and excerpts. Semantic and hybrid
    /// modes embed the query with the configured embedding backend.
    Search {
        /// The search query string.
        query: String,

        /// Search mode: `keyword` (FTS5), `semantic` (vector), or `hybrid`
        /// (weighted fusion). Defaults to `[retrieval].mode` from config.
        #[arg(long)]
        mode: Option<String>,

        /// Maximum number of results to return.
        #[arg(long)]
        limit: Option<i64>,

        /// Restrict results to a document id (repeatable).
        #[arg(long = "doc")]
        doc: Vec<String>,

        /// Restrict results to one modality: `text` or `image`.
        #[arg(long)]
        modality: Option<String>,

        /// Print results as JSON instead of the human-readable listing.
        #[arg(long)]
        json: bool,
    },

    /// Ask a question and print a cited answer.
    ///
    /// Retrieves context with the same options as `search`, assembles a
    /// grounding prompt, and prints the generated answer followed by the
    /// chunk ids that were placed in the prompt.
    Ask {
        /// The question to answer.
        question: String,

        /// Search mode: `keyword`, `semantic`, or `hybrid`.
        #[arg(long)]
        mode: Option<String>,

        /// Maximum number of context chunks to retrieve.
        #[arg(long)]
        limit: Option<i64>,

        /// Restrict retrieval to a document id (repeatable).
        #[arg(long = "doc")]
        doc: Vec<String>,

        /// Restrict retrieval to one modality: `text` or `image`.
        #[arg(long)]
        modality: Option<String>,
    },

    /// Show store statistics.
    Stats,

    /// Start the JSON HTTP server.
    ///
    /// Binds to the address configured in `[server].bind` and exposes
    /// `/health`, `/ingest`, and `/query`.
    Serve,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "localrag=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    // Init must work before a config file exists; it writes one.
    if matches!(cli.command, Commands::Init) {
        return run_init(&cli.config).await;
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => unreachable!(),
        Commands::Ingest {
            sources,
            content_type,
            exclude,
            dry_run,
        } => {
            run_ingest(&cfg, &sources, content_type.as_deref(), &exclude, dry_run).await?;
        }
        Commands::Search {
            query,
            mode,
            limit,
            doc,
            modality,
            json,
        } => {
            run_search(&cfg, &query, mode.as_deref(), limit, doc, modality.as_deref(), json)
                .await?;
        }
        Commands::Ask {
            question,
            mode,
            limit,
            doc,
            modality,
        } => {
            run_ask(&cfg, &question, mode.as_deref(), limit, doc, modality.as_deref()).await?;
        }
        Commands::Stats => {
            run_stats(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

// ============ init ============

async fn run_init(config_path: &Path) -> anyhow::Result<()> {
    if config::write_default_config(config_path)? {
        println!("Wrote starter config: {}", config_path.display());
    }
    let cfg = config::load_config(config_path)?;
    // Opening the store creates the schema.
    let _pipeline = Pipeline::from_config(&cfg).await?;
    println!("Database initialized successfully.");
    Ok(())
}

// ============ ingest ============

async fn run_ingest(
    cfg: &Config,
    sources: &[String],
    content_type: Option<&str>,
    exclude: &[String],
    dry_run: bool,
) -> anyhow::Result<()> {
    let hint = parse_content_type(content_type)?;
    let expanded = expand_sources(sources, exclude)?;
    if expanded.is_empty() {
        println!("No sources found.");
        return Ok(());
    }

    if dry_run {
        println!("ingest (dry-run)");
        println!("  sources found: {}", expanded.len());
        let mut total_chunks = 0usize;
        for source in &expanded {
            let loaded = loader::load_source(source, hint, 30).await?;
            total_chunks += chunker::chunk_document("dry-run", &loaded.regions, &cfg.chunking).len();
        }
        println!("  estimated chunks: {}", total_chunks);
        return Ok(());
    }

    let pipeline = Pipeline::from_config(cfg).await?;
    let mut failures = 0usize;
    for source in &expanded {
        match pipeline.ingest_source(source, hint).await {
            Ok(report) if report.unchanged => {
                println!("ingest {} (unchanged)", report.source);
            }
            Ok(report) => {
                println!("ingest {}", report.source);
                println!("  document: {}", report.document_id);
                println!("  chunks written: {}", report.embedded);
                if report.skipped > 0 {
                    println!("  chunks unchanged: {}", report.skipped);
                }
                if report.pruned > 0 {
                    println!("  chunks pruned: {}", report.pruned);
                }
            }
            Err(e) => {
                failures += 1;
                eprintln!("error: {e}");
                eprintln!("  cause: {}", e.source);
                if !e.committed.is_empty() {
                    eprintln!("  committed before failure: {} chunks", e.committed.len());
                }
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} source(s) failed to ingest", failures);
    }
    println!("ok");
    Ok(())
}

/// Expand directory sources into their contained files; files and URLs
/// pass through unchanged.
fn expand_sources(sources: &[String], exclude: &[String]) -> anyhow::Result<Vec<String>> {
    let mut expanded = Vec::new();
    for source in sources {
        if loader::is_url(source) {
            expanded.push(source.clone());
            continue;
        }
        let path = Path::new(source);
        if path.is_dir() {
            expanded.extend(loader::expand_dir(path, exclude)?);
        } else {
            expanded.push(source.clone());
        }
    }
    Ok(expanded)
}

// ============ search ============

async fn run_search(
    cfg: &Config,
    query: &str,
    mode: Option<&str>,
    limit: Option<i64>,
    doc: Vec<String>,
    modality: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let pipeline = Pipeline::from_config(cfg).await?;
    let mode = parse_mode(mode, &pipeline)?;
    let filters = parse_filters(doc, modality)?;
    let limit = limit.unwrap_or_else(|| pipeline.default_top_k());
    anyhow::ensure!(limit >= 1, "limit must be at least 1");

    let result = pipeline.retrieve(query, mode, limit, &filters).await?;

    if result.is_empty() {
        println!("No results.");
        return Ok(());
    }

    if json {
        let items: Vec<serde_json::Value> = result
            .items
            .iter()
            .map(|item| {
                serde_json::json!({
                    "chunk_id": item.chunk.id,
                    "document_id": item.chunk.document_id,
                    "position": item.chunk.position,
                    "modality": item.chunk.modality.as_str(),
                    "page": item.chunk.page,
                    "score": item.score,
                    "content": item.chunk.content,
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::Value::Array(items))?
        );
        return Ok(());
    }

    for (i, item) in result.items.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} #{} ({})",
            i + 1,
            item.score,
            item.chunk.document_id,
            item.chunk.position,
            item.chunk.modality.as_str()
        );
        if let Some(page) = item.chunk.page {
            println!("    page: {}", page);
        }
        println!("    excerpt: \"{}\"", excerpt(&item.chunk.content));
        println!("    id: {}", item.chunk.id);
        println!();
    }
    Ok(())
}

/// One-line excerpt for terminal display.
fn excerpt(content: &str) -> String {
    let flat = content.replace('\n', " ");
    let flat = flat.trim();
    match flat.char_indices().nth(160) {
        Some((idx, _)) => format!("{}...", &flat[..idx]),
        None => flat.to_string(),
    }
}

// ============ ask ============

async fn run_ask(
    cfg: &Config,
    question: &str,
    mode: Option<&str>,
    limit: Option<i64>,
    doc: Vec<String>,
    modality: Option<&str>,
) -> anyhow::Result<()> {
    let pipeline = Pipeline::from_config(cfg).await?;
    let mode = parse_mode(mode, &pipeline)?;
    let filters = parse_filters(doc, modality)?;
    let limit = limit.unwrap_or_else(|| pipeline.default_top_k());
    anyhow::ensure!(limit >= 1, "limit must be at least 1");

    let (_retrieval, answer) = pipeline.ask(question, mode, limit, &filters).await?;

    println!("{}", answer.text);
    println!();
    if answer.citations.is_empty() {
        println!("citations: none");
    } else {
        println!("citations:");
        for id in &answer.citations {
            println!("  - {}", id);
        }
    }
    println!("model: {}", answer.model);
    Ok(())
}

// ============ stats ============

async fn run_stats(cfg: &Config) -> anyhow::Result<()> {
    let pipeline = Pipeline::from_config(cfg).await?;
    let stats = pipeline.stats().await?;

    println!("localrag database stats");
    println!("=======================");
    println!();
    println!("  Database:   {}", cfg.storage.path.display());
    println!("  Documents:  {}", stats.documents);
    println!("  Chunks:     {}", stats.chunks);
    println!("    text:     {}", stats.text_chunks);
    println!("    image:    {}", stats.image_chunks);
    Ok(())
}

// ============ shared parsing ============

fn parse_mode(mode: Option<&str>, pipeline: &Pipeline) -> anyhow::Result<SearchMode> {
    match mode {
        Some(m) => SearchMode::parse(m).ok_or_else(|| {
            anyhow::anyhow!("Unknown search mode: {}. Use keyword, semantic, or hybrid.", m)
        }),
        None => Ok(pipeline.default_mode()),
    }
}

fn parse_content_type(s: Option<&str>) -> anyhow::Result<Option<ContentType>> {
    match s {
        Some(t) => ContentType::parse(t)
            .map(Some)
            .ok_or_else(|| {
                anyhow::anyhow!("Unknown content type: {}. Use text, markdown, pdf, or image.", t)
            }),
        None => Ok(None),
    }
}

fn parse_filters(doc: Vec<String>, modality: Option<&str>) -> anyhow::Result<SearchFilters> {
    let modality = match modality {
        Some(m) => Some(
            Modality::parse(m)
                .ok_or_else(|| anyhow::anyhow!("Unknown modality: {}. Use text or image.", m))?,
        ),
        None => None,
    };
    Ok(SearchFilters {
        document_ids: if doc.is_empty() { None } else { Some(doc) },
        modality,
    })
}
