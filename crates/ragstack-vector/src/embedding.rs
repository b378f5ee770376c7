//! Embedding client for generating vector representations
//!
//! Talks to any OpenAI-compatible `/v1/embeddings` endpoint (vLLM, TEI,
//! OpenAI itself).
//!
//! Author: hephaex@gmail.com

use async_trait::async_trait;
use ragstack_core::{EmbeddingConfig, RagstackError, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::EmbeddingVector;

// ============================================================================
// Embedding Trait
// ============================================================================

/// Trait for embedding generation
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Generate an embedding by calling `url` instead of the configured endpoint
    async fn embed_with_url(&self, text: &str, url: &str) -> Result<EmbeddingVector>;

    /// Configured endpoint URL
    fn endpoint(&self) -> &str;

    /// Model name sent with each request
    fn model(&self) -> &str;

    /// Expected vector length, when known
    fn dimension(&self) -> Option<usize>;

    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<EmbeddingVector> {
        self.embed_with_url(text, self.endpoint()).await
    }
}

/// Vector length of well-known embedding models.
///
/// Organisation prefixes (`Qwen/...`) are ignored.
pub fn known_dimension(model: &str) -> Option<usize> {
    let name = model.rsplit('/').next().unwrap_or(model);
    match name {
        "Qwen3-Embedding-0.6B" => Some(1024),
        "Qwen3-Embedding-4B" => Some(2560),
        "Qwen3-Embedding-8B" => Some(4096),
        "bge-m3" | "mxbai-embed-large" => Some(1024),
        "nomic-embed-text" => Some(768),
        "all-minilm" | "all-MiniLM-L6-v2" => Some(384),
        "text-embedding-3-small" | "text-embedding-ada-002" => Some(1536),
        "text-embedding-3-large" => Some(3072),
        _ => None,
    }
}

/// Base URL for Weaviate's `text2vec-openai` module.
///
/// The module appends `/v1/embeddings` itself, so that suffix is removed
/// from a full endpoint URL.
pub fn vectorizer_base_url(embedding_url: &str) -> String {
    let url = embedding_url.trim().trim_end_matches('/');
    let url = url.strip_suffix("/embeddings").unwrap_or(url);
    let url = url.strip_suffix("/v1").unwrap_or(url);
    url.trim_end_matches('/').to_string()
}

// ============================================================================
// OpenAI-compatible Embedding Client
// ============================================================================

/// Client for OpenAI-compatible embedding servers
pub struct OpenAiCompatibleEmbedding {
    client: Client,
    url: String,
    model: String,
    api_key: Option<String>,
    dimension: Option<usize>,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl OpenAiCompatibleEmbedding {
    /// Create a new client with the transport's default timeout
    pub fn new(url: impl Into<String>, model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            client: Client::new(),
            url: url.into(),
            dimension: known_dimension(&model),
            model,
            api_key: None,
        }
    }

    /// Create from config
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| {
                RagstackError::UpstreamEmbedding(format!("Failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            url: config.url.clone(),
            model: config.model.clone(),
            api_key: Some(config.api_key.clone()).filter(|k| !k.is_empty()),
            dimension: config.dimension.or_else(|| known_dimension(&config.model)),
        })
    }

    /// Override the expected vector length
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = Some(dimension);
        self
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiCompatibleEmbedding {
    async fn embed_with_url(&self, text: &str, url: &str) -> Result<EmbeddingVector> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: text,
        };

        let mut builder = self.client.post(url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| RagstackError::UpstreamEmbedding(format!("Embedding request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(RagstackError::UpstreamEmbedding(format!(
                "Embedding service returned {status}: {error_text}"
            )));
        }

        let body = response.text().await.map_err(|e| {
            RagstackError::UpstreamEmbedding(format!("Failed to read embedding response: {e}"))
        })?;

        parse_embedding_response(&body, self.dimension)
    }

    fn endpoint(&self) -> &str {
        &self.url
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> Option<usize> {
        self.dimension
    }
}

/// Extract `data[0].embedding`, checking its length when one is expected
pub fn parse_embedding_response(body: &str, dimension: Option<usize>) -> Result<EmbeddingVector> {
    let result: EmbeddingResponse = serde_json::from_str(body).map_err(|e| {
        RagstackError::UpstreamEmbedding(format!("Failed to parse embedding response: {e}"))
    })?;

    let embedding = result
        .data
        .into_iter()
        .next()
        .map(|d| d.embedding)
        .ok_or_else(|| RagstackError::UpstreamEmbedding("No embedding returned".to_string()))?;

    if embedding.is_empty() {
        return Err(RagstackError::UpstreamEmbedding(
            "Embedding service returned an empty vector".to_string(),
        ));
    }

    match dimension {
        Some(expected) if expected != embedding.len() => Err(RagstackError::UpstreamEmbedding(
            format!(
                "Embedding has {} dimensions, expected {expected}",
                embedding.len()
            ),
        )),
        _ => Ok(embedding),
    }
}

// ============================================================================
// Tests
// ============================================================================
