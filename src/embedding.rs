//! Embedding provider abstraction and the Ollama implementation.
//!
//! The indexing and search paths depend on the [`Embedder`] trait, not on
//! any HTTP client, so tests swap in deterministic embedders.
//!
//! # Retry strategy
//!
//! The Ollama provider retries transient failures with exponential
//! backoff (1s, 2s, 4s, ... capped at 32s):
//! - HTTP 429 and 5xx → retry
//! - other 4xx → fail immediately
//! - network errors → retry

use async_trait::async_trait;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{IndexError, Result};

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed one text into a vector of the provider's dimensionality.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn dims(&self) -> usize;
}

/// Embeds via a local Ollama server's `POST /api/embeddings`.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
    max_retries: u32,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| IndexError::Embedding(e.to_string()))?;
        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dims: config.dims,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": text,
        });
        let endpoint = format!("{}/api/embeddings", self.url);

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self.client.post(&endpoint).json(&body).send().await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| IndexError::Embedding(e.to_string()))?;
                        return parse_embedding_response(&json);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(IndexError::Embedding(format!(
                            "ollama error {}: {}",
                            status, body_text
                        )));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    return Err(IndexError::Embedding(format!(
                        "ollama error {}: {}",
                        status, body_text
                    )));
                }
                Err(e) => {
                    last_err = Some(IndexError::Embedding(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| IndexError::Embedding("embedding failed after retries".to_string())))
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

fn parse_embedding_response(json: &serde_json::Value) -> Result<Vec<f32>> {
    let values = json
        .get("embedding")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            IndexError::Embedding("invalid ollama response: missing embedding array".to_string())
        })?;

    values
        .iter()
        .map(|v| {
            v.as_f64().map(|f| f as f32).ok_or_else(|| {
                IndexError::Embedding("invalid ollama response: non-numeric value".to_string())
            })
        })
        .collect()
}

/// Encode a vector as little-endian bytes for SQLite BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(vec.len() * 4);
    for v in vec {
        blob.extend_from_slice(&v.to_le_bytes());
    }
    blob
}

/// Reverses [`vec_to_blob`]. Trailing bytes that do not fill a whole
/// `f32` are dropped.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_roundtrip() {
        let vec = vec![0.0f32, -1.5, 3.25, f32::MAX];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn parse_response_extracts_vector() {
        let json = serde_json::json!({ "embedding": [0.1, 0.2, 0.3] });
        let vec = parse_embedding_response(&json).unwrap();
        assert_eq!(vec.len(), 3);
        assert!((vec[1] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn parse_response_rejects_missing_field() {
        let json = serde_json::json!({ "embeddings": [] });
        assert!(parse_embedding_response(&json).is_err());
    }
}
