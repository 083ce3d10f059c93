//! # localrag
//!
//! Local-first retrieval-augmented generation over your own documents.
//!
//! localrag ingests text, Markdown, PDF, and image sources into a SQLite
//! store, retrieves relevant chunks by keyword, semantic, or hybrid search,
//! and grounds a language-model answer in exactly the chunks it was shown.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌───────────┐
//! │   Sources    │──▶│   Pipeline   │──▶│  SQLite   │
//! │ file/dir/URL │   │ chunk+embed  │   │ FTS5+vec  │
//! └──────────────┘   └──────────────┘   └────┬──────┘
//!                                            │
//!                        ┌───────────────────┤
//!                        ▼                   ▼
//!                   ┌──────────┐       ┌──────────┐
//!                   │   CLI    │       │   HTTP   │
//!                   │  (lrag)  │       │  (axum)  │
//!                   └──────────┘       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! lrag init                         # write config, create database
//! lrag ingest ./docs                # ingest a directory
//! lrag search "deployment" --mode hybrid
//! lrag ask "how do we deploy?"      # retrieve + generate with citations
//! lrag serve                        # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types |
//! | [`loader`] | Source loading and region extraction |
//! | [`chunker`] | Overlapping text windows and image chunks |
//! | [`embedding`] | Embedding backend abstraction |
//! | [`store`] | Chunk store trait plus SQLite and in-memory backends |
//! | [`retrieve`] | Keyword, semantic, and hybrid retrieval |
//! | [`generate`] | Prompt assembly and answer generation |
//! | [`pipeline`] | End-to-end orchestration with retry |
//! | [`server`] | JSON HTTP server |
//! | [`error`] | Error taxonomy |

pub mod chunker;
pub mod config;
pub mod embedding;
pub mod error;
pub mod generate;
pub mod loader;
pub mod models;
pub mod pipeline;
pub mod retrieve;
pub mod server;
pub mod store;
