//! Retrieval: embed the query, search the index, assemble bounded context.
//!
//! Hits below the similarity threshold are dropped before ranking limits
//! apply. Context assembly walks the surviving hits in rank order and packs
//! whole chunk texts under the character budget, stopping at the first chunk
//! that would not fit; no chunk is ever truncated.

use sqlx::Row;
use tracing::debug;

use crate::error::{Error, Result};
use crate::manager::KnowledgeBaseManager;
use crate::models::{Chunk, QueryResult, ScoredChunk};

const CONTEXT_SEPARATOR: &str = "\n\n";

impl KnowledgeBaseManager {
    /// Answer a query against one knowledge base.
    ///
    /// `top_k` and `max_context_length` fall back to the configured
    /// retrieval defaults when not given.
    pub async fn query(
        &self,
        name: &str,
        text: &str,
        top_k: Option<usize>,
        max_context_length: Option<usize>,
    ) -> Result<QueryResult> {
        let top_k = top_k.unwrap_or(self.config().retrieval.top_k);
        let budget = max_context_length.unwrap_or(self.config().retrieval.max_context_length);
        if top_k == 0 {
            return Err(Error::InvalidParameter("top_k must be >= 1".to_string()));
        }
        if text.trim().is_empty() {
            return Err(Error::InvalidParameter(
                "query text must not be empty".to_string(),
            ));
        }

        let lock = self.kb_lock(name).await;
        let _guard = lock.read().await;

        let row = self.kb_row(name).await?;
        self.check_provider(&row)?;
        let index = self.open_index(&row).await?;

        let query_vec = self.client().embed_query(text).await?;
        let raw_hits = index.search(&query_vec, top_k)?;

        let threshold = self.config().retrieval.similarity_threshold;
        let mut hits = Vec::new();
        for (handle, score) in raw_hits {
            if score < threshold {
                continue;
            }
            if let Some(hit) = self.resolve_handle(name, handle, score).await? {
                hits.push(hit);
            }
        }

        debug!(
            kb = name,
            candidates = top_k,
            surviving = hits.len(),
            "query resolved"
        );

        let context = assemble_context(&hits, budget);
        Ok(QueryResult { hits, context })
    }

    /// Map an index handle back to its chunk and source document. Handles
    /// with no catalog mapping are ignored rather than surfaced.
    async fn resolve_handle(
        &self,
        kb_name: &str,
        handle: i64,
        score: f32,
    ) -> Result<Option<ScoredChunk>> {
        let row = sqlx::query(
            r#"
            SELECT c.id, c.document_id, c.chunk_index, c.text, c.start_pos, c.end_pos,
                   d.source_path
            FROM chunk_handles h
            JOIN chunks c ON c.kb_name = h.kb_name AND c.id = h.chunk_id
            JOIN documents d ON d.kb_name = c.kb_name AND d.id = c.document_id
            WHERE h.kb_name = ? AND h.handle = ?
            "#,
        )
        .bind(kb_name)
        .bind(handle)
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(|r| ScoredChunk {
            chunk: Chunk {
                id: r.get("id"),
                document_id: r.get("document_id"),
                chunk_index: r.get("chunk_index"),
                text: r.get("text"),
                start: r.get("start_pos"),
                end: r.get("end_pos"),
            },
            score,
            source_path: r.get("source_path"),
        }))
    }
}

/// Concatenate chunk texts in rank order under a character budget, joined
/// by a blank line. Whole chunks only; assembly stops at the first chunk
/// that would overflow the budget.
fn assemble_context(hits: &[ScoredChunk], budget: usize) -> String {
    let mut context = String::new();
    let mut used = 0usize;

    for hit in hits {
        let text_len = hit.chunk.text.chars().count();
        let sep_len = if context.is_empty() {
            0
        } else {
            CONTEXT_SEPARATOR.len()
        };
        if used + sep_len + text_len > budget {
            break;
        }
        if !context.is_empty() {
            context.push_str(CONTEXT_SEPARATOR);
        }
        context.push_str(&hit.chunk.text);
        used += sep_len + text_len;
    }

    context
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(text: &str, score: f32) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                id: format!("id-{}", text.len()),
                document_id: "doc".to_string(),
                chunk_index: 0,
                text: text.to_string(),
                start: 0,
                end: text.len() as i64,
            },
            score,
            source_path: "a.txt".to_string(),
        }
    }

    #[test]
    fn test_context_packs_in_rank_order() {
        let hits = vec![hit("first", 0.9), hit("second", 0.8)];
        assert_eq!(assemble_context(&hits, 100), "first\n\nsecond");
    }

    #[test]
    fn test_context_never_exceeds_budget() {
        let hits = vec![hit("aaaaaaaaaa", 0.9), hit("bbb", 0.8)];
        // 10 + 2 + 3 = 15 > 12, so the second chunk is dropped
        let ctx = assemble_context(&hits, 12);
        assert_eq!(ctx, "aaaaaaaaaa");
        assert!(ctx.chars().count() <= 12);
    }

    #[test]
    fn test_context_stops_at_first_oversized_chunk() {
        let hits = vec![hit("tiny", 0.9), hit(&"x".repeat(50), 0.8), hit("also", 0.7)];
        assert_eq!(assemble_context(&hits, 12), "tiny");
    }

    #[test]
    fn test_context_never_truncates_a_chunk() {
        let hits = vec![hit(&"y".repeat(30), 0.9)];
        assert_eq!(assemble_context(&hits, 10), "");
    }

    #[test]
    fn test_context_empty_hits() {
        assert_eq!(assemble_context(&[], 100), "");
    }
}
