//! Embedding provider abstraction, content-addressed cache, and vector
//! utilities.
//!
//! [`EmbeddingProvider`] is the capability seam: "can embed a batch of texts
//! at a fixed dimension". Concrete implementations are selected once from
//! configuration and passed in by the caller, never branched per call, so
//! tests can substitute a deterministic fake.
//!
//! [`EmbeddingClient`] wraps a provider with the pieces every caller needs:
//! batch splitting at the configured cap (input order preserved), a cache
//! keyed by (model id, SHA-256 of text) consulted before any provider call,
//! and a dimension check that fails with `DimensionMismatch` rather than
//! padding or truncating.
//!
//! # Retry strategy (OpenAI)
//!
//! - HTTP 429 and 5xx → retry with exponential backoff (1s, 2s, 4s, ... capped)
//! - other 4xx → fail immediately
//! - network errors and timeouts → retry
//! - retries exhausted → `ProviderUnavailable`

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

/// Capability interface for embedding backends.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier recorded on knowledge bases (e.g. `"text-embedding-3-small"`).
    fn model_id(&self) -> &str;
    /// Declared vector dimensionality.
    fn dims(&self) -> usize;
    /// Embed a batch of at most one provider-call worth of texts, preserving order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Build the provider named in configuration. The `disabled` provider keeps
/// metadata-only commands working; anything that actually embeds fails with
/// `ProviderUnavailable`.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiProvider::new(config)?)),
        "disabled" => Ok(Arc::new(DisabledProvider)),
        other => Err(Error::InvalidParameter(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

/// Placeholder provider used when no embedding backend is configured.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_id(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(Error::ProviderUnavailable(
            "embedding provider is disabled; configure [embedding] in the config file".to_string(),
        ))
    }
}

// ============ OpenAI provider ============

/// Embedding provider calling the OpenAI `POST /v1/embeddings` endpoint.
pub struct OpenAiProvider {
    model: String,
    dims: usize,
    api_key: String,
    endpoint: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config.model.clone().ok_or_else(|| {
            Error::InvalidParameter("embedding.model required for OpenAI provider".to_string())
        })?;
        let dims = config.dims.ok_or_else(|| {
            Error::InvalidParameter("embedding.dims required for OpenAI provider".to_string())
        })?;
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            Error::ProviderUnavailable("OPENAI_API_KEY environment variable not set".to_string())
        })?;

        let base = config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());
        let endpoint = format!("{}/v1/embeddings", base.trim_end_matches('/'));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::ProviderUnavailable(e.to_string()))?;

        Ok(Self {
            model,
            dims,
            api_key,
            endpoint,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
            "encoding_format": "float",
        });

        let mut last_err: Option<String> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&self.endpoint)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| Error::ProviderUnavailable(e.to_string()))?;
                        return parse_openai_response(&json);
                    }

                    // Rate limited or server error, retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        warn!(status = %status, "embedding API error, will retry");
                        last_err = Some(format!("OpenAI API error {}: {}", status, body_text));
                        continue;
                    }

                    // Client error (not 429), don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    return Err(Error::ProviderUnavailable(format!(
                        "OpenAI API error {}: {}",
                        status, body_text
                    )));
                }
                Err(e) => {
                    last_err = Some(e.to_string());
                    continue;
                }
            }
        }

        Err(Error::ProviderUnavailable(last_err.unwrap_or_else(|| {
            "embedding failed after retries".to_string()
        })))
    }
}

fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json.get("data").and_then(|d| d.as_array()).ok_or_else(|| {
        Error::ProviderUnavailable("invalid OpenAI response: missing data array".to_string())
    })?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| {
                Error::ProviderUnavailable("invalid OpenAI response: missing embedding".to_string())
            })?;
        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        embeddings.push(vec);
    }

    Ok(embeddings)
}

// ============ Cache-aware client ============

/// Provider wrapper adding batch splitting, the content-addressed cache, and
/// the dimension check. The cache is unbounded per lookup but pruned to
/// `cache_max_entries` rows (oldest first) after each write burst.
pub struct EmbeddingClient {
    provider: Arc<dyn EmbeddingProvider>,
    pool: SqlitePool,
    batch_size: usize,
    cache_max_entries: u64,
}

impl EmbeddingClient {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, pool: SqlitePool, config: &EmbeddingConfig) -> Self {
        Self {
            provider,
            pool,
            batch_size: config.batch_size,
            cache_max_entries: config.cache_max_entries,
        }
    }

    pub fn model_id(&self) -> &str {
        self.provider.model_id()
    }

    pub fn dims(&self) -> usize {
        self.provider.dims()
    }

    /// Embed a batch of texts, cache-aware, preserving input order.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = self.provider.model_id().to_string();
        let expected = self.provider.dims();

        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut miss_indices: Vec<usize> = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            let hash = text_hash(text);
            if let Some(vec) = self.cache_get(&model, &hash).await? {
                if vec.len() != expected {
                    return Err(Error::DimensionMismatch {
                        expected,
                        actual: vec.len(),
                    });
                }
                results[i] = Some(vec);
            } else {
                miss_indices.push(i);
            }
        }

        debug!(
            total = texts.len(),
            cache_hits = texts.len() - miss_indices.len(),
            "embedding batch"
        );

        // Oversized requests are split and issued sequentially.
        for batch in miss_indices.chunks(self.batch_size) {
            let batch_texts: Vec<String> = batch.iter().map(|&i| texts[i].clone()).collect();
            let vectors = self.provider.embed(&batch_texts).await?;
            if vectors.len() != batch_texts.len() {
                return Err(Error::ProviderUnavailable(format!(
                    "provider returned {} vectors for {} texts",
                    vectors.len(),
                    batch_texts.len()
                )));
            }
            for (&i, vec) in batch.iter().zip(vectors.into_iter()) {
                if vec.len() != expected {
                    return Err(Error::DimensionMismatch {
                        expected,
                        actual: vec.len(),
                    });
                }
                self.cache_put(&model, &text_hash(&texts[i]), &vec).await?;
                results[i] = Some(vec);
            }
        }

        if !miss_indices.is_empty() {
            self.cache_prune().await?;
        }

        Ok(results.into_iter().map(|r| r.unwrap_or_default()).collect())
    }

    /// Embed a single query text.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| {
            Error::ProviderUnavailable("empty embedding response".to_string())
        })
    }

    async fn cache_get(&self, model: &str, hash: &str) -> Result<Option<Vec<f32>>> {
        let row: Option<Vec<u8>> = sqlx::query_scalar(
            "SELECT embedding FROM embedding_cache WHERE model = ? AND text_hash = ?",
        )
        .bind(model)
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|blob| blob_to_vec(&blob)))
    }

    async fn cache_put(&self, model: &str, hash: &str, vec: &[f32]) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO embedding_cache (model, text_hash, dims, embedding, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(model, text_hash) DO UPDATE SET
                dims = excluded.dims,
                embedding = excluded.embedding,
                created_at = excluded.created_at
            "#,
        )
        .bind(model)
        .bind(hash)
        .bind(vec.len() as i64)
        .bind(vec_to_blob(vec))
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Evict oldest rows beyond the retention bound.
    async fn cache_prune(&self) -> Result<()> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embedding_cache")
            .fetch_one(&self.pool)
            .await?;
        let excess = count - self.cache_max_entries as i64;
        if excess > 0 {
            sqlx::query(
                r#"
                DELETE FROM embedding_cache WHERE rowid IN (
                    SELECT rowid FROM embedding_cache ORDER BY created_at ASC LIMIT ?
                )
                "#,
            )
            .bind(excess)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }
}

/// SHA-256 of a text, the cache key component.
pub fn text_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ============ Vector utilities ============

/// Encode a float vector as little-endian f32 bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode little-endian f32 bytes back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Scale a vector to unit length. Zero vectors are returned unchanged.
pub fn normalize(vec: &mut [f32]) {
    let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in vec.iter_mut() {
            *v /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        assert_eq!(blob.len(), 20);
        assert_eq!(blob_to_vec(&blob), vec);
    }

    #[test]
    fn test_normalize_unit_length() {
        let mut v = vec![3.0f32, 4.0];
        normalize(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_zero_vector_unchanged() {
        let mut v = vec![0.0f32, 0.0];
        normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0]);
    }

    #[test]
    fn test_text_hash_stable() {
        assert_eq!(text_hash("hello"), text_hash("hello"));
        assert_ne!(text_hash("hello"), text_hash("hello "));
    }

    #[test]
    fn test_parse_openai_response() {
        let json = serde_json::json!({
            "data": [
                {"embedding": [0.1, 0.2], "index": 0},
                {"embedding": [0.3, 0.4], "index": 1},
            ]
        });
        let vecs = parse_openai_response(&json).unwrap();
        assert_eq!(vecs.len(), 2);
        assert!((vecs[1][0] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_parse_openai_response_missing_data() {
        let json = serde_json::json!({"error": "nope"});
        assert!(parse_openai_response(&json).is_err());
    }
}
