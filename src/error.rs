//! Error taxonomy for the knowledge-base core.
//!
//! Ingestion-time errors (`UnsupportedFormat`, `FileUnreadable`,
//! `ExtractionFailed`) are per-document: they land in the ingest report and
//! never abort a batch. Caller errors (`InvalidChunkParameters`,
//! `InvalidParameter`, `AlreadyExists`, `NotFound`) are rejected before any
//! work is done. Storage-level errors (`IndexCorrupt`, `MetadataMismatch`)
//! are fatal for the affected knowledge base until it is rebuilt from source
//! documents.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("file unreadable: {path}: {reason}")]
    FileUnreadable { path: PathBuf, reason: String },

    #[error("extraction failed: {path}: {reason}")]
    ExtractionFailed { path: PathBuf, reason: String },

    #[error("invalid chunk parameters: chunk_size={chunk_size}, overlap={overlap} (require overlap < chunk_size, chunk_size > 0)")]
    InvalidChunkParameters { chunk_size: usize, overlap: usize },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("embedding provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("knowledge base already exists: '{0}'")]
    AlreadyExists(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("vector index corrupt: {0}")]
    IndexCorrupt(String),

    #[error("metadata mismatch: {0}")]
    MetadataMismatch(String),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Short machine-readable kind, used in ingest reports and CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::UnsupportedFormat(_) => "UnsupportedFormat",
            Error::FileUnreadable { .. } => "FileUnreadable",
            Error::ExtractionFailed { .. } => "ExtractionFailed",
            Error::InvalidChunkParameters { .. } => "InvalidChunkParameters",
            Error::InvalidParameter(_) => "InvalidParameter",
            Error::ProviderUnavailable(_) => "ProviderUnavailable",
            Error::DimensionMismatch { .. } => "DimensionMismatch",
            Error::AlreadyExists(_) => "AlreadyExists",
            Error::NotFound(_) => "NotFound",
            Error::IndexCorrupt(_) => "IndexCorrupt",
            Error::MetadataMismatch(_) => "MetadataMismatch",
            Error::Db(_) => "Db",
            Error::Io(_) => "Io",
        }
    }
}
