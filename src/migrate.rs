//! Catalog schema. All statements are idempotent, so migrations run at
//! every startup.

use sqlx::SqlitePool;

use crate::error::Result;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS knowledge_bases (
            name TEXT PRIMARY KEY,
            description TEXT NOT NULL DEFAULT '',
            embedding_model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            index_generation INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Document id is the content hash; the same content may live in several
    // knowledge bases, so the key is (kb_name, id).
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            kb_name TEXT NOT NULL,
            id TEXT NOT NULL,
            source_path TEXT NOT NULL,
            format TEXT NOT NULL,
            ingested_at INTEGER NOT NULL,
            stale INTEGER NOT NULL DEFAULT 0,
            chunk_count INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (kb_name, id),
            FOREIGN KEY (kb_name) REFERENCES knowledge_bases(name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            kb_name TEXT NOT NULL,
            id TEXT NOT NULL,
            document_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            start_pos INTEGER NOT NULL,
            end_pos INTEGER NOT NULL,
            PRIMARY KEY (kb_name, id),
            FOREIGN KEY (kb_name, document_id) REFERENCES documents(kb_name, id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Maps index handles back to chunks. Handles are per-KB and never reused.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_handles (
            kb_name TEXT NOT NULL,
            handle INTEGER NOT NULL,
            chunk_id TEXT NOT NULL,
            PRIMARY KEY (kb_name, handle),
            FOREIGN KEY (kb_name, chunk_id) REFERENCES chunks(kb_name, id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embedding_cache (
            model TEXT NOT NULL,
            text_hash TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (model, text_hash)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(kb_name, document_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunk_handles_chunk ON chunk_handles(kb_name, chunk_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_cache_created_at ON embedding_cache(created_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
