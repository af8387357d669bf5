//! Core data models for the ingestion and retrieval pipeline.
//!
//! Identity is content-derived throughout: a document's id is the SHA-256 of
//! its raw bytes (so the same file ingested from two paths is one document),
//! and a chunk's id hashes its document id, ordinal, and text. Chunks are
//! immutable; changed content means new ids.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

/// Supported source-document formats, dispatched on file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Txt,
    Markdown,
    Docx,
}

impl DocumentFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "txt" => Some(Self::Txt),
            "md" | "markdown" => Some(Self::Markdown),
            "docx" => Some(Self::Docx),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Txt => "txt",
            Self::Markdown => "markdown",
            Self::Docx => "docx",
        }
    }
}

/// Normalized text plus minimal metadata produced by the loader.
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    /// Hex SHA-256 of the raw file bytes; the document's identity.
    pub content_hash: String,
    pub source_path: PathBuf,
    pub format: DocumentFormat,
    /// Normalized plain text (whitespace collapsed, UTF-8 coerced).
    pub text: String,
}

/// Document record stored in the catalog.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub kb_name: String,
    pub source_path: String,
    pub format: String,
    pub ingested_at: i64,
    pub stale: bool,
    pub chunk_count: i64,
}

/// An immutable chunk of a document's normalized text.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    /// Char span in the normalized source text.
    pub start: i64,
    pub end: i64,
}

/// Knowledge-base metadata row.
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeBaseInfo {
    pub name: String,
    pub description: String,
    pub embedding_model: String,
    pub dims: usize,
    pub index_generation: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub document_count: i64,
    pub chunk_count: i64,
}

/// One ranked retrieval hit.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
    pub source_path: String,
}

/// Result of a retrieval query: ranked chunks plus the assembled context.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub hits: Vec<ScoredChunk>,
    /// Top-ranked chunk texts concatenated under the context budget.
    /// Never exceeds the budget and never truncates a chunk mid-text.
    pub context: String,
}

/// Outcome for a single path within a batch ingest.
#[derive(Debug, Clone)]
pub enum IngestOutcome {
    Ingested {
        path: PathBuf,
        document_id: String,
        chunks: usize,
    },
    SkippedDuplicate {
        path: PathBuf,
        document_id: String,
    },
    /// An update found the source file gone and applied the stale policy:
    /// the document was kept, and `flagged` says whether it was marked stale.
    SourceMissing {
        path: PathBuf,
        document_id: String,
        flagged: bool,
    },
    Failed {
        path: PathBuf,
        kind: &'static str,
        reason: String,
    },
}

/// Per-document report for a batch ingest or update. One bad file never
/// aborts the batch; callers distinguish partial success from total failure.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub outcomes: Vec<IngestOutcome>,
}

impl IngestReport {
    pub fn ingested(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, IngestOutcome::Ingested { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, IngestOutcome::SkippedDuplicate { .. }))
            .count()
    }

    pub fn missing(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, IngestOutcome::SourceMissing { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, IngestOutcome::Failed { .. }))
            .count()
    }
}
