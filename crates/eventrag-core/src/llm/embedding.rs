//! HTTP embedding client
//!
//! Posts `{model, prompt}` to `{base_url}/api/embeddings` and reads back
//! `{embedding}`. Any failure (transport, status, body, wrong dimension)
//! yields the zero vector of the configured dimension.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use reqwest::Client as HttpClient;
use tracing::{debug, warn};

use crate::config::EmbeddingConfig;
use crate::domain::embedding::{Embedder, Embedding};
use crate::error::{Error, Result};

use super::types::{EmbeddingRequest, EmbeddingResponse};

/// Embedder backed by an Ollama-compatible service
#[derive(Debug, Clone)]
pub struct HttpEmbedder {
    http_client: HttpClient,
    base_url: String,
    model: String,
    dimension: usize,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(Error::NetworkError)?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dimension: config.dimension.max(1),
        })
    }

    async fn request(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);
        let response = self
            .http_client
            .post(&url)
            .json(&EmbeddingRequest {
                model: &self.model,
                prompt: text,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::EmbeddingFailed(format!("HTTP {}", status.as_u16())));
        }

        let body: EmbeddingResponse = response.json().await?;
        if body.embedding.len() != self.dimension {
            return Err(Error::EmbeddingFailed(format!(
                "expected dimension {}, got {}",
                self.dimension,
                body.embedding.len()
            )));
        }
        Ok(body.embedding)
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Embedding {
        match self.request(text).await {
            Ok(vector) => {
                debug!(model = %self.model, dimension = vector.len(), "Embedding received");
                Embedding::new(vector, self.model.clone())
            }
            Err(e) => {
                warn!(model = %self.model, error = %e, "Embedding request failed, using zero vector");
                Embedding::zeros(self.dimension, self.model.clone())
            }
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> Vec<Embedding> {
        join_all(texts.iter().map(|t| self.embed(t))).await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
