//! Embedders: an offline feature-hashing encoder and an HTTP adapter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use switchyard_config::EmbeddingConfig;
use switchyard_core::error::MemoryError;
use switchyard_core::memory::Embedder;
use tracing::{debug, warn};

/// Deterministic embedder over hashed word and character-bigram features.
///
/// Texts that share words land closer together than unrelated ones. Needs
/// no network, so it is the default for tests and offline hosts.
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    /// `dims` of zero is bumped to one.
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    pub fn dimensions(&self) -> usize {
        self.dims
    }

    fn encode_sync(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        let lower = text.to_lowercase();

        for word in lower.split_whitespace() {
            v[(fnv1a(word.as_bytes()) % self.dims as u64) as usize] += 1.0;
        }
        for bigram in lower.as_bytes().windows(2) {
            v[(fnv1a(bigram) % self.dims as u64) as usize] += 0.5;
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn name(&self) -> &str {
        "hash"
    }

    async fn encode(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        Ok(self.encode_sync(text))
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Embedder for OpenAI-compatible `POST /embeddings` endpoints.
pub struct HttpEmbedder {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpEmbedder {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, MemoryError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| MemoryError::EmbeddingFailed(format!("HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
            client,
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn name(&self) -> &str {
        &self.model
    }

    async fn encode(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        let url = format!("{}/embeddings", self.base_url);
        let mut request = self.client.post(&url).json(&EmbeddingRequest {
            model: &self.model,
            input: text,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| MemoryError::EmbeddingFailed(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %body, "Embedding endpoint returned error");
            return Err(MemoryError::EmbeddingFailed(format!("{url} answered {status}")));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| MemoryError::EmbeddingFailed(format!("bad response: {e}")))?;
        let vector = first_embedding(parsed)?;
        debug!(model = %self.model, dims = vector.len(), "Embedded text");
        Ok(vector)
    }
}

fn first_embedding(response: EmbeddingResponse) -> Result<Vec<f32>, MemoryError> {
    response
        .data
        .into_iter()
        .next()
        .map(|d| d.embedding)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| MemoryError::EmbeddingFailed("response carried no embedding".into()))
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Build the embedder selected in config.
pub fn from_config(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, MemoryError> {
    match config.provider.as_str() {
        "openai" => {
            let url = config
                .api_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".into());
            Ok(Arc::new(HttpEmbedder::new(
                url,
                &config.model,
                config.api_key.clone(),
            )?))
        }
        _ => Ok(Arc::new(HashEmbedder::new(config.dimensions))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::cosine_similarity;

    #[tokio::test]
    async fn hash_embedder_is_deterministic_and_normalized() {
        let e = HashEmbedder::new(64);
        let a = e.encode("Rust ownership rules").await.unwrap();
        let b = e.encode("Rust ownership rules").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let norm = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn related_texts_are_closer() {
        let e = HashEmbedder::default();
        let q = e.encode("how do I borrow a value in rust").await.unwrap();
        let near = e.encode("borrowing a value in rust").await.unwrap();
        let far = e.encode("best pasta recipes for dinner").await.unwrap();
        assert!(cosine_similarity(&q, &near) > cosine_similarity(&q, &far));
    }

    #[tokio::test]
    async fn empty_text_is_zero_vector() {
        let v = HashEmbedder::new(8).encode("").await.unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn parses_embedding_response() {
        let r: EmbeddingResponse =
            serde_json::from_str(r#"{"object":"list","data":[{"index":0,"embedding":[0.1,0.2]}]}"#)
                .unwrap();
        assert_eq!(first_embedding(r).unwrap(), vec![0.1, 0.2]);

        let empty: EmbeddingResponse = serde_json::from_str(r#"{"data":[]}"#).unwrap();
        assert!(first_embedding(empty).is_err());
    }

    #[test]
    fn config_selects_provider() {
        let config = EmbeddingConfig::default();
        assert_eq!(from_config(&config).unwrap().name(), "hash");

        let remote = EmbeddingConfig {
            provider: "openai".into(),
            ..EmbeddingConfig::default()
        };
        assert_eq!(from_config(&remote).unwrap().name(), "text-embedding-3-small");
    }
}
