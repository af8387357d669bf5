//! Knowledge-base lifecycle and the ingestion pipeline.
//!
//! [`KnowledgeBaseManager`] owns the catalog pool, the embedding client, and
//! a per-KB reader-writer lock: ingest, update, delete, and reembed take the
//! write side; queries take the read side, so many queries run concurrently
//! against a KB that is not being mutated.
//!
//! Durability order per document: embed (no writes), commit the catalog
//! transaction (document + chunks + handle mapping), then persist the index
//! file. The catalog is authoritative; a crash between commit and persist is
//! detected on the next open as a mapped handle missing from the index.

use futures::stream::{self, StreamExt};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::chunker;
use crate::config::{Config, StalePolicy};
use crate::db;
use crate::embedding::{EmbeddingClient, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::index::VectorIndex;
use crate::loader;
use crate::migrate;
use crate::models::{
    Chunk, Document, DocumentFormat, IngestOutcome, IngestReport, KnowledgeBaseInfo,
    LoadedDocument,
};

const INDEX_FILE: &str = "vector.idx";

/// Catalog row for one knowledge base.
#[derive(Debug, Clone)]
pub(crate) struct KbRow {
    pub name: String,
    pub description: String,
    pub embedding_model: String,
    pub dims: i64,
    pub index_generation: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

pub struct KnowledgeBaseManager {
    config: Config,
    pool: SqlitePool,
    client: EmbeddingClient,
    locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

impl KnowledgeBaseManager {
    /// Connect to the catalog, run migrations, and wrap the given provider.
    pub async fn open(config: Config, provider: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let pool = db::connect(&config).await?;
        migrate::run_migrations(&pool).await?;
        let client = EmbeddingClient::new(provider, pool.clone(), &config.embedding);
        Ok(Self {
            config,
            pool,
            client,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub(crate) fn client(&self) -> &EmbeddingClient {
        &self.client
    }

    pub(crate) async fn kb_lock(&self, name: &str) -> Arc<RwLock<()>> {
        let mut map = self.locks.lock().await;
        map.entry(name.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    /// Filesystem-safe directory name for a knowledge base.
    pub fn safe_name(name: &str) -> Result<String> {
        if name.trim().is_empty() {
            return Err(Error::InvalidParameter(
                "knowledge base name must not be empty".to_string(),
            ));
        }
        let safe: String = name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        if safe.chars().all(|c| c == '_' || c == '.') {
            return Err(Error::InvalidParameter(format!(
                "knowledge base name '{}' has no usable characters",
                name
            )));
        }
        Ok(safe)
    }

    fn kb_dir(&self, name: &str) -> Result<PathBuf> {
        Ok(self.config.storage.root.join(Self::safe_name(name)?))
    }

    fn index_path(&self, name: &str) -> Result<PathBuf> {
        Ok(self.kb_dir(name)?.join(INDEX_FILE))
    }

    // ============ Lifecycle ============

    pub async fn create(&self, name: &str, description: &str) -> Result<KnowledgeBaseInfo> {
        if self.client.dims() == 0 {
            return Err(Error::ProviderUnavailable(
                "embedding provider is disabled; configure [embedding] before creating a knowledge base".to_string(),
            ));
        }
        let index_path = self.index_path(name)?;
        let lock = self.kb_lock(name).await;
        let _guard = lock.write().await;

        let existing: Option<String> =
            sqlx::query_scalar("SELECT name FROM knowledge_bases WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        if existing.is_some() {
            return Err(Error::AlreadyExists(name.to_string()));
        }

        let model = self.client.model_id().to_string();
        let dims = self.client.dims();
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO knowledge_bases (name, description, embedding_model, dims, index_generation, created_at, updated_at)
            VALUES (?, ?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(name)
        .bind(description)
        .bind(&model)
        .bind(dims as i64)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        VectorIndex::new(dims, 0).persist(&index_path)?;
        info!(kb = name, model = %model, dims, "created knowledge base");

        self.info(name).await
    }

    pub async fn delete(&self, name: &str) -> Result<()> {
        let dir = self.kb_dir(name)?;
        let lock = self.kb_lock(name).await;
        let _guard = lock.write().await;

        self.kb_row(name).await?;

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunk_handles WHERE kb_name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chunks WHERE kb_name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM documents WHERE kb_name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM knowledge_bases WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        info!(kb = name, "deleted knowledge base");
        Ok(())
    }

    pub async fn info(&self, name: &str) -> Result<KnowledgeBaseInfo> {
        let row = self.kb_row(name).await?;
        self.row_to_info(&row).await
    }

    pub async fn list(&self) -> Result<Vec<KnowledgeBaseInfo>> {
        let rows = sqlx::query(
            "SELECT name, description, embedding_model, dims, index_generation, created_at, updated_at FROM knowledge_bases ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut infos = Vec::with_capacity(rows.len());
        for row in rows {
            let kb = KbRow {
                name: row.get("name"),
                description: row.get("description"),
                embedding_model: row.get("embedding_model"),
                dims: row.get("dims"),
                index_generation: row.get("index_generation"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            };
            infos.push(self.row_to_info(&kb).await?);
        }
        Ok(infos)
    }

    /// All documents tracked by a knowledge base, ordered by source path.
    pub async fn documents(&self, name: &str) -> Result<Vec<Document>> {
        self.kb_row(name).await?;
        let rows = sqlx::query(
            "SELECT kb_name, id, source_path, format, ingested_at, stale, chunk_count FROM documents WHERE kb_name = ? ORDER BY source_path",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Document {
                id: row.get("id"),
                kb_name: row.get("kb_name"),
                source_path: row.get("source_path"),
                format: row.get("format"),
                ingested_at: row.get("ingested_at"),
                stale: row.get::<i64, _>("stale") != 0,
                chunk_count: row.get("chunk_count"),
            })
            .collect())
    }

    pub(crate) async fn kb_row(&self, name: &str) -> Result<KbRow> {
        let row = sqlx::query(
            "SELECT name, description, embedding_model, dims, index_generation, created_at, updated_at FROM knowledge_bases WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("knowledge base '{}'", name)))?;

        Ok(KbRow {
            name: row.get("name"),
            description: row.get("description"),
            embedding_model: row.get("embedding_model"),
            dims: row.get("dims"),
            index_generation: row.get("index_generation"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    async fn row_to_info(&self, row: &KbRow) -> Result<KnowledgeBaseInfo> {
        let document_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE kb_name = ?")
                .bind(&row.name)
                .fetch_one(&self.pool)
                .await?;
        let chunk_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE kb_name = ?")
            .bind(&row.name)
            .fetch_one(&self.pool)
            .await?;

        Ok(KnowledgeBaseInfo {
            name: row.name.clone(),
            description: row.description.clone(),
            embedding_model: row.embedding_model.clone(),
            dims: row.dims as usize,
            index_generation: row.index_generation,
            created_at: chrono::DateTime::from_timestamp(row.created_at, 0).unwrap_or_default(),
            updated_at: chrono::DateTime::from_timestamp(row.updated_at, 0).unwrap_or_default(),
            document_count,
            chunk_count,
        })
    }

    /// Reject any operation that would embed with a provider other than the
    /// one the knowledge base was created with. A same-dimension model swap
    /// would otherwise silently mix vector spaces in one index.
    pub(crate) fn check_provider(&self, row: &KbRow) -> Result<()> {
        if row.embedding_model != self.client.model_id() || row.dims as usize != self.client.dims()
        {
            return Err(Error::MetadataMismatch(format!(
                "knowledge base '{}' is embedded with {} ({} dims) but the configured provider is {} ({} dims); run reembed to switch models",
                row.name,
                row.embedding_model,
                row.dims,
                self.client.model_id(),
                self.client.dims()
            )));
        }
        Ok(())
    }

    // ============ Index access ============

    /// Open a KB's index file, cross-checking it against the catalog.
    pub(crate) async fn open_index(&self, row: &KbRow) -> Result<VectorIndex> {
        let path = self.index_path(&row.name)?;
        let mapped_handles: Vec<i64> =
            sqlx::query_scalar("SELECT handle FROM chunk_handles WHERE kb_name = ?")
                .bind(&row.name)
                .fetch_all(&self.pool)
                .await?;

        if !path.exists() {
            if mapped_handles.is_empty() {
                // First open after create on a fresh checkout is fine
                return Ok(VectorIndex::new(row.dims as usize, row.index_generation as u64));
            }
            return Err(Error::IndexCorrupt(format!(
                "index file missing for knowledge base '{}'",
                row.name
            )));
        }

        let index = VectorIndex::load(&path)?;

        if index.dims() != row.dims as usize {
            return Err(Error::MetadataMismatch(format!(
                "knowledge base '{}' records {} dims but index has {}",
                row.name,
                row.dims,
                index.dims()
            )));
        }
        if index.generation() != row.index_generation as u64 {
            return Err(Error::MetadataMismatch(format!(
                "knowledge base '{}' records generation {} but index has {}",
                row.name,
                row.index_generation,
                index.generation()
            )));
        }
        for handle in &mapped_handles {
            if !index.contains(*handle) {
                return Err(Error::IndexCorrupt(format!(
                    "handle {} mapped in catalog but missing from index of '{}'",
                    handle, row.name
                )));
            }
        }

        Ok(index)
    }

    // ============ Ingest ============

    /// Ingest files and directories into a knowledge base. Directories are
    /// walked recursively and filtered to supported extensions. One bad file
    /// never aborts the batch.
    pub async fn ingest(&self, name: &str, paths: &[PathBuf]) -> Result<IngestReport> {
        let lock = self.kb_lock(name).await;
        let _guard = lock.write().await;

        let row = self.kb_row(name).await?;
        self.check_provider(&row)?;
        let mut index = self.open_index(&row).await?;
        let index_path = self.index_path(name)?;

        let mut report = IngestReport::default();
        let files = expand_paths(paths, &mut report);

        let loaded = load_concurrently(files, self.config.ingest.concurrency).await;

        for (path, result) in loaded {
            let outcome = match result {
                Err(e) => IngestOutcome::Failed {
                    path,
                    kind: e.kind(),
                    reason: e.to_string(),
                },
                Ok(doc) => match self.ingest_document(name, &doc, &mut index, &index_path).await {
                    Ok(outcome) => outcome,
                    Err(e) => IngestOutcome::Failed {
                        path,
                        kind: e.kind(),
                        reason: e.to_string(),
                    },
                },
            };
            if let IngestOutcome::Failed { path, kind, reason } = &outcome {
                warn!(kb = name, path = %path.display(), kind = *kind, reason = %reason, "ingest failed");
            }
            report.outcomes.push(outcome);
        }

        info!(
            kb = name,
            ingested = report.ingested(),
            skipped = report.skipped(),
            failed = report.failed(),
            "ingest complete"
        );
        Ok(report)
    }

    /// Process one loaded document: dedup, chunk, embed, commit, persist.
    async fn ingest_document(
        &self,
        kb_name: &str,
        doc: &LoadedDocument,
        index: &mut VectorIndex,
        index_path: &Path,
    ) -> Result<IngestOutcome> {
        let existing: Option<String> =
            sqlx::query_scalar("SELECT id FROM documents WHERE kb_name = ? AND id = ?")
                .bind(kb_name)
                .bind(&doc.content_hash)
                .fetch_optional(&self.pool)
                .await?;
        if existing.is_some() {
            debug!(kb = kb_name, doc = %doc.content_hash, "duplicate content, skipping");
            return Ok(IngestOutcome::SkippedDuplicate {
                path: doc.source_path.clone(),
                document_id: doc.content_hash.clone(),
            });
        }

        let chunks = chunker::chunk_document(
            &doc.content_hash,
            &doc.text,
            self.config.chunking.chunk_size,
            self.config.chunking.chunk_overlap,
        )?;

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.client.embed_batch(&texts).await?;

        let mut handles = Vec::with_capacity(vectors.len());
        for vec in &vectors {
            handles.push(index.insert(vec)?);
        }

        match self
            .commit_document(kb_name, doc, &chunks, &handles)
            .await
        {
            Ok(()) => {}
            Err(e) => {
                // Roll the in-memory index back so it matches the catalog
                for handle in handles {
                    index.delete(handle);
                }
                return Err(e);
            }
        }

        if let Err(persist_err) = index.persist(index_path) {
            // Undo the catalog commit so the reported failure matches state
            if let Err(undo_err) = self
                .remove_document(kb_name, &doc.content_hash, index)
                .await
            {
                warn!(
                    kb = kb_name,
                    doc = %doc.content_hash,
                    error = %undo_err,
                    "catalog rollback after failed index persist also failed"
                );
            }
            return Err(persist_err);
        }

        Ok(IngestOutcome::Ingested {
            path: doc.source_path.clone(),
            document_id: doc.content_hash.clone(),
            chunks: chunks.len(),
        })
    }

    async fn commit_document(
        &self,
        kb_name: &str,
        doc: &LoadedDocument,
        chunks: &[Chunk],
        handles: &[i64],
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO documents (kb_name, id, source_path, format, ingested_at, stale, chunk_count)
            VALUES (?, ?, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(kb_name)
        .bind(&doc.content_hash)
        .bind(doc.source_path.display().to_string())
        .bind(doc.format.as_str())
        .bind(now)
        .bind(chunks.len() as i64)
        .execute(&mut *tx)
        .await?;

        for (chunk, handle) in chunks.iter().zip(handles.iter()) {
            sqlx::query(
                r#"
                INSERT INTO chunks (kb_name, id, document_id, chunk_index, text, start_pos, end_pos)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(kb_name)
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(chunk.start)
            .bind(chunk.end)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO chunk_handles (kb_name, handle, chunk_id) VALUES (?, ?, ?)",
            )
            .bind(kb_name)
            .bind(handle)
            .bind(&chunk.id)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE knowledge_bases SET updated_at = ? WHERE name = ?")
            .bind(now)
            .bind(kb_name)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    // ============ Update ============

    /// Re-check tracked documents against their source files. With no paths
    /// given, every document is checked; otherwise only documents whose
    /// source lies at or under one of the given paths. Unchanged content is
    /// skipped, changed content replaces the old document, and missing
    /// sources follow the configured stale policy.
    pub async fn update(&self, name: &str, paths: &[PathBuf]) -> Result<IngestReport> {
        let lock = self.kb_lock(name).await;
        let _guard = lock.write().await;

        let row = self.kb_row(name).await?;
        self.check_provider(&row)?;
        let mut index = self.open_index(&row).await?;
        let index_path = self.index_path(name)?;

        let docs = sqlx::query("SELECT id, source_path FROM documents WHERE kb_name = ? ORDER BY source_path")
            .bind(name)
            .fetch_all(&self.pool)
            .await?;

        let mut report = IngestReport::default();

        for doc_row in docs {
            let doc_id: String = doc_row.get("id");
            let source_path = PathBuf::from(doc_row.get::<String, _>("source_path"));

            if !paths.is_empty() && !paths.iter().any(|p| source_path.starts_with(p)) {
                continue;
            }

            if !source_path.exists() {
                let flagged = match self.config.ingest.stale_policy {
                    StalePolicy::Keep => false,
                    StalePolicy::Flag => {
                        sqlx::query(
                            "UPDATE documents SET stale = 1 WHERE kb_name = ? AND id = ?",
                        )
                        .bind(name)
                        .bind(&doc_id)
                        .execute(&self.pool)
                        .await?;
                        true
                    }
                };
                report.outcomes.push(IngestOutcome::SourceMissing {
                    path: source_path,
                    document_id: doc_id,
                    flagged,
                });
                continue;
            }

            let load_path = source_path.clone();
            let loaded = tokio::task::spawn_blocking(move || loader::load(&load_path))
                .await
                .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;

            let outcome = match loaded {
                Err(e) => IngestOutcome::Failed {
                    path: source_path,
                    kind: e.kind(),
                    reason: e.to_string(),
                },
                Ok(doc) if doc.content_hash == doc_id => {
                    // Content unchanged; a previously missing source is back
                    sqlx::query("UPDATE documents SET stale = 0 WHERE kb_name = ? AND id = ?")
                        .bind(name)
                        .bind(&doc_id)
                        .execute(&self.pool)
                        .await?;
                    IngestOutcome::SkippedDuplicate {
                        path: source_path,
                        document_id: doc_id,
                    }
                }
                Ok(doc) => {
                    // Commit the replacement before retiring the old version,
                    // so a failed embed leaves the document as it was. Until
                    // the removal lands both versions are briefly queryable.
                    match self.ingest_document(name, &doc, &mut index, &index_path).await {
                        Ok(outcome) => {
                            self.remove_document(name, &doc_id, &mut index).await?;
                            outcome
                        }
                        Err(e) => IngestOutcome::Failed {
                            path: source_path,
                            kind: e.kind(),
                            reason: e.to_string(),
                        },
                    }
                }
            };
            report.outcomes.push(outcome);
        }

        index.persist(&index_path)?;

        info!(
            kb = name,
            reingested = report.ingested(),
            unchanged = report.skipped(),
            missing = report.missing(),
            failed = report.failed(),
            "update complete"
        );
        Ok(report)
    }

    // ============ Document removal ============

    pub async fn delete_document(&self, name: &str, document_id: &str) -> Result<()> {
        let lock = self.kb_lock(name).await;
        let _guard = lock.write().await;

        let row = self.kb_row(name).await?;
        let mut index = self.open_index(&row).await?;
        let index_path = self.index_path(name)?;

        let exists: Option<String> =
            sqlx::query_scalar("SELECT id FROM documents WHERE kb_name = ? AND id = ?")
                .bind(name)
                .bind(document_id)
                .fetch_optional(&self.pool)
                .await?;
        if exists.is_none() {
            return Err(Error::NotFound(format!(
                "document '{}' in knowledge base '{}'",
                document_id, name
            )));
        }

        self.remove_document(name, document_id, &mut index).await?;
        index.persist(&index_path)?;
        info!(kb = name, doc = document_id, "deleted document");
        Ok(())
    }

    /// Drop a document's rows and index vectors. Handles are retired, never
    /// reassigned.
    async fn remove_document(
        &self,
        kb_name: &str,
        document_id: &str,
        index: &mut VectorIndex,
    ) -> Result<()> {
        let handles: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT h.handle FROM chunk_handles h
            JOIN chunks c ON c.kb_name = h.kb_name AND c.id = h.chunk_id
            WHERE h.kb_name = ? AND c.document_id = ?
            "#,
        )
        .bind(kb_name)
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            DELETE FROM chunk_handles WHERE kb_name = ? AND chunk_id IN (
                SELECT id FROM chunks WHERE kb_name = ? AND document_id = ?
            )
            "#,
        )
        .bind(kb_name)
        .bind(kb_name)
        .bind(document_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM chunks WHERE kb_name = ? AND document_id = ?")
            .bind(kb_name)
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM documents WHERE kb_name = ? AND id = ?")
            .bind(kb_name)
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE knowledge_bases SET updated_at = ? WHERE name = ?")
            .bind(chrono::Utc::now().timestamp())
            .bind(kb_name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        for handle in handles {
            index.delete(handle);
        }
        Ok(())
    }

    // ============ Reembed ============

    /// Rebuild the vector index with the current provider under a new index
    /// generation. The swap is atomic: the old index file stays in place
    /// until the new one is fully written.
    pub async fn reembed(&self, name: &str) -> Result<KnowledgeBaseInfo> {
        let lock = self.kb_lock(name).await;
        let _guard = lock.write().await;

        let row = self.kb_row(name).await?;
        let index_path = self.index_path(name)?;

        let chunk_rows = sqlx::query(
            "SELECT id, text FROM chunks WHERE kb_name = ? ORDER BY document_id, chunk_index",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await?;

        let chunk_ids: Vec<String> = chunk_rows.iter().map(|r| r.get("id")).collect();
        let texts: Vec<String> = chunk_rows.iter().map(|r| r.get("text")).collect();

        let vectors = self.client.embed_batch(&texts).await?;

        let new_generation = row.index_generation + 1;
        let mut new_index = VectorIndex::new(self.client.dims(), new_generation as u64);
        let mut handles = Vec::with_capacity(vectors.len());
        for vec in &vectors {
            handles.push(new_index.insert(vec)?);
        }

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunk_handles WHERE kb_name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        for (chunk_id, handle) in chunk_ids.iter().zip(handles.iter()) {
            sqlx::query("INSERT INTO chunk_handles (kb_name, handle, chunk_id) VALUES (?, ?, ?)")
                .bind(name)
                .bind(handle)
                .bind(chunk_id)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query(
            "UPDATE knowledge_bases SET embedding_model = ?, dims = ?, index_generation = ?, updated_at = ? WHERE name = ?",
        )
        .bind(self.client.model_id())
        .bind(self.client.dims() as i64)
        .bind(new_generation)
        .bind(now)
        .bind(name)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        new_index.persist(&index_path)?;
        info!(
            kb = name,
            generation = new_generation,
            chunks = chunk_ids.len(),
            "reembedded knowledge base"
        );

        self.info(name).await
    }
}

/// Expand paths into a flat, sorted file list. Directories are walked
/// recursively; entries with unsupported extensions are silently skipped,
/// but an explicitly named unsupported file is reported. Missing paths go
/// straight into the report.
fn expand_paths(paths: &[PathBuf], report: &mut IngestReport) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if !path.exists() {
            report.outcomes.push(IngestOutcome::Failed {
                path: path.clone(),
                kind: "FileUnreadable",
                reason: "path does not exist".to_string(),
            });
            continue;
        }
        if path.is_dir() {
            for entry in WalkDir::new(path)
                .follow_links(false)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if entry.file_type().is_file() && is_supported(entry.path()) {
                    files.push(entry.path().to_path_buf());
                }
            }
        } else {
            files.push(path.clone());
        }
    }
    files.sort();
    files.dedup();
    files
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(DocumentFormat::from_extension)
        .is_some()
}

/// Load and extract documents off the async runtime, `concurrency` at a time.
/// Output order follows input order.
async fn load_concurrently(
    files: Vec<PathBuf>,
    concurrency: usize,
) -> Vec<(PathBuf, Result<LoadedDocument>)> {
    stream::iter(files)
        .map(|path| async move {
            let load_path = path.clone();
            let result = match tokio::task::spawn_blocking(move || loader::load(&load_path)).await
            {
                Ok(res) => res,
                Err(e) => Err(Error::Io(std::io::Error::other(e.to_string()))),
            };
            (path, result)
        })
        .buffered(concurrency.max(1))
        .collect()
        .await
}
