//! Embedding provider clients.
//!
//! One HTTP client covers the OpenAI-compatible providers (openai,
//! dashscope compatible mode, azure deployments); the mock provider
//! produces deterministic vectors for tests and local runs. Batch
//! requests are capped and every returned vector is validated against the
//! provider-fixed dimension before it reaches an index.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::EmbeddingConfig;
use crate::utils::error::{LlmError, LlmErrorKind};

#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Registry key, e.g. "openai" or "mock".
    fn kind(&self) -> &str;

    /// Provider-fixed vector dimension for this collection.
    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError>;
}

/// Build the configured embedding client.
pub fn build_embedding_client(config: &EmbeddingConfig) -> std::sync::Arc<dyn EmbeddingClient> {
    match config.kind.as_str() {
        "mock" => std::sync::Arc::new(MockEmbeddingClient::new(config.dimension)),
        _ => std::sync::Arc::new(HttpEmbeddingClient::new(config.clone())),
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

pub struct HttpEmbeddingClient {
    client: Client,
    config: EmbeddingConfig,
}

impl HttpEmbeddingClient {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            client: Client::builder()
                .connect_timeout(Duration::from_secs(30))
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_else(|_| Client::new()),
            config,
        }
    }

    fn url(&self) -> String {
        let base = self.config.endpoint.trim_end_matches('/');
        match (self.config.kind.as_str(), &self.config.api_version) {
            ("azure", Some(version)) => format!(
                "{}/openai/deployments/{}/embeddings?api-version={}",
                base, self.config.model, version
            ),
            _ => format!("{}/embeddings", base),
        }
    }

    async fn request_embeddings(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        debug!(
            "embedding {} texts with model {}",
            inputs.len(),
            self.config.model
        );

        let request = EmbeddingRequest {
            input: inputs,
            model: &self.config.model,
        };

        let mut builder = self.client.post(self.url());
        builder = if self.config.kind == "azure" {
            builder.header("api-key", &self.config.api_key)
        } else {
            builder.header("Authorization", format!("Bearer {}", self.config.api_key))
        };

        let response = builder
            .json(&request)
            .send()
            .await
            .map_err(LlmError::from_reqwest)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status(status, body));
        }

        let parsed: EmbeddingResponse = response.json().await.map_err(LlmError::from_reqwest)?;

        if parsed.data.len() != inputs.len() {
            return Err(LlmError::new(
                LlmErrorKind::Service,
                format!(
                    "embedding count mismatch: asked {}, got {}",
                    inputs.len(),
                    parsed.data.len()
                ),
            ));
        }

        let mut ordered: Vec<Vec<f32>> = vec![Vec::new(); inputs.len()];
        for item in parsed.data {
            if item.embedding.len() != self.config.dimension {
                return Err(LlmError::new(
                    LlmErrorKind::Service,
                    format!(
                        "embedding dimension mismatch: expected {}, got {}",
                        self.config.dimension,
                        item.embedding.len()
                    ),
                ));
            }
            if item.index < ordered.len() {
                ordered[item.index] = item.embedding;
            }
        }

        Ok(ordered)
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    fn kind(&self) -> &str {
        &self.config.kind
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let inputs = vec![text.to_string()];
        let mut vectors = self.request_embeddings(&inputs).await?;
        vectors
            .pop()
            .ok_or_else(|| LlmError::new(LlmErrorKind::Service, "empty embedding response"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let cap = self.config.batch_size.max(1);
        let mut all = Vec::with_capacity(texts.len());
        // Serialised batches keep each request under the provider cap.
        for batch in texts.chunks(cap) {
            all.extend(self.request_embeddings(batch).await?);
        }
        Ok(all)
    }
}

/// Deterministic hash-derived unit vectors. Same text, same vector; no
/// network.
pub struct MockEmbeddingClient {
    dimension: usize,
}

impl MockEmbeddingClient {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut state: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in text.as_bytes() {
            state ^= u64::from(*byte);
            state = state.wrapping_mul(0x100_0000_01b3);
        }

        let mut vector = Vec::with_capacity(self.dimension);
        for i in 0..self.dimension {
            let mut x = state ^ (i as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15);
            x ^= x >> 33;
            x = x.wrapping_mul(0xff51_afd7_ed55_8ccd);
            x ^= x >> 33;
            vector.push(((x % 2000) as f32 / 1000.0) - 1.0);
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingClient for MockEmbeddingClient {
    fn kind(&self) -> &str {
        "mock"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        Ok(self.vector_for(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_vectors_are_deterministic_and_unit_length() {
        let client = MockEmbeddingClient::new(8);
        let a = client.embed("hello").await.unwrap();
        let b = client.embed("hello").await.unwrap();
        let c = client.embed("other").await.unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 8);

        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn mock_batch_matches_singles() {
        let client = MockEmbeddingClient::new(4);
        let batch = client
            .embed_batch(&["x".to_string(), "y".to_string()])
            .await
            .unwrap();
        assert_eq!(batch[0], client.embed("x").await.unwrap());
        assert_eq!(batch[1], client.embed("y").await.unwrap());
    }

    #[test]
    fn azure_url_uses_deployment_path() {
        let client = HttpEmbeddingClient::new(EmbeddingConfig {
            kind: "azure".into(),
            api_key: "k".into(),
            model: "text-embedding-3-small".into(),
            endpoint: "https://acct.openai.azure.com".into(),
            api_version: Some("2024-06-01".into()),
            dimension: 1536,
            batch_size: 16,
        });
        assert_eq!(
            client.url(),
            "https://acct.openai.azure.com/openai/deployments/text-embedding-3-small/embeddings?api-version=2024-06-01"
        );
    }

    #[test]
    fn openai_url_is_flat() {
        let client = HttpEmbeddingClient::new(EmbeddingConfig {
            kind: "openai".into(),
            api_key: "k".into(),
            model: "text-embedding-3-small".into(),
            endpoint: "https://api.openai.com/v1/".into(),
            api_version: None,
            dimension: 1536,
            batch_size: 16,
        });
        assert_eq!(client.url(), "https://api.openai.com/v1/embeddings");
    }
}
