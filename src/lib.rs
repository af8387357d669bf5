//! # ragbase
//!
//! A local retrieval-augmented knowledge base.
//!
//! ragbase ingests documents (PDF, TXT, Markdown, DOCX) into named knowledge
//! bases: text is extracted and normalized, split into overlapping chunks,
//! embedded through a pluggable provider with a content-addressed cache, and
//! stored in a per-KB vector index with stable handles. Queries embed the
//! question, rank chunks by cosine similarity, and assemble a bounded
//! context block ready to paste into a prompt.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌───────────────┐
//! │  Loader   │──▶│   Pipeline   │──▶│    Storage    │
//! │ pdf/txt/  │   │ chunk+embed  │   │ SQLite catalog│
//! │ md/docx   │   │  (cached)    │   │ + vector.idx  │
//! └───────────┘   └──────────────┘   └──────┬────────┘
//!                                           │
//!                                     ┌─────▼─────┐
//!                                     │   Query   │
//!                                     │ rank+pack │
//!                                     └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rag init                          # create the catalog
//! rag create notes -d "my notes"    # create a knowledge base
//! rag ingest notes ./docs           # ingest a directory
//! rag query notes "how do I deploy?"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`loader`] | Multi-format document loading |
//! | [`chunker`] | Overlapping text chunking |
//! | [`embedding`] | Embedding providers and the content-addressed cache |
//! | [`index`] | Flat vector index with stable handles |
//! | [`manager`] | Knowledge-base lifecycle and ingestion |
//! | [`query`] | Retrieval and context assembly |
//! | [`db`] | Catalog connection |
//! | [`migrate`] | Schema migrations |

pub mod chunker;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod index;
pub mod loader;
pub mod manager;
pub mod migrate;
pub mod models;
pub mod query;
