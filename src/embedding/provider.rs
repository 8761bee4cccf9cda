//! Remote embedding provider contract plus a deterministic mock used in
//! tests and when `embedding.mock = true`.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::config::EmbeddingConfig;
use crate::error::{EngineError, EngineResult};

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Computes embeddings for a batch of non-empty texts. Callers are
    /// responsible for preprocessing (trim, empty-slot handling); this
    /// trait only ever sees texts that require a real vector.
    async fn embed_batch(&self, texts: &[String]) -> EngineResult<Vec<Vec<f32>>>;

    fn dimension(&self) -> usize;
}

/// Synthesizes deterministic vectors from a hash of the text, so tests and
/// local development run with no network (SPEC_FULL.md §4.C mock mode).
pub struct MockEmbeddingProvider {
    dimension: usize,
}

impl MockEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        let digest = hasher.finalize();

        let mut state = u64::from_le_bytes(digest[0..8].try_into().unwrap());
        (0..self.dimension)
            .map(|_| {
                // splitmix64-style step for a cheap, deterministic sequence.
                state = state.wrapping_add(0x9E3779B97F4A7C15);
                let mut z = state;
                z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
                z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
                z ^= z >> 31;
                ((z % 2000) as f32 / 1000.0) - 1.0
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed_batch(&self, texts: &[String]) -> EngineResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Calls a remote embedding HTTP endpoint. The wire contract is out of
/// scope (SPEC_FULL.md §1 treats the provider as a pure RPC); this is a
/// minimal, stable JSON shape assumed for the purpose of this engine.
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    cfg: EmbeddingConfig,
}

#[derive(serde::Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(serde::Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl HttpEmbeddingProvider {
    pub fn new(cfg: EmbeddingConfig) -> EngineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| EngineError::Configuration { message: e.to_string() })?;
        Ok(Self { client, cfg })
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed_batch(&self, texts: &[String]) -> EngineResult<Vec<Vec<f32>>> {
        let body = EmbedRequest {
            model: &self.cfg.model,
            input: texts,
        };
        let resp = self
            .client
            .post(&self.cfg.api_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EngineError::Timeout {
                        elapsed_ms: self.cfg.timeout_secs * 1000,
                    }
                } else {
                    EngineError::Network { message: e.to_string() }
                }
            })?;

        if resp.status().is_server_error() || resp.status().as_u16() == 429 {
            return Err(EngineError::EmbeddingProvider {
                message: format!("transient upstream status {}", resp.status()),
            });
        }
        if !resp.status().is_success() {
            return Err(EngineError::EmbeddingProvider {
                message: format!("upstream status {}", resp.status()),
            });
        }

        let parsed: EmbedResponse = resp
            .json()
            .await
            .map_err(|e| EngineError::EmbeddingProvider { message: e.to_string() })?;
        Ok(parsed.embeddings)
    }

    fn dimension(&self) -> usize {
        self.cfg.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_provider_is_deterministic() {
        let p = MockEmbeddingProvider::new(8);
        let a = p.embed_batch(&["hello".to_string()]).await.unwrap();
        let b = p.embed_batch(&["hello".to_string()]).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 8);
    }

    #[tokio::test]
    async fn mock_provider_differs_by_text() {
        let p = MockEmbeddingProvider::new(8);
        let a = p.embed_batch(&["hello".to_string()]).await.unwrap();
        let b = p.embed_batch(&["world".to_string()]).await.unwrap();
        assert_ne!(a, b);
    }
}
