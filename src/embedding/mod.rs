//! Embedding providers
//!
//! Turns query text into fixed-length vectors. The model itself is an external
//! oracle; this module only defines the contract and two implementations.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// OpenAI API request structure for embedding generation
#[derive(Debug, Serialize)]
struct OpenAIEmbeddingRequest {
    model: String,
    input: OpenAIInput,
    /// Always "float"
    encoding_format: String,
}

/// OpenAI input can be a single string or array of strings
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum OpenAIInput {
    Single(String),
    Batch(Vec<String>),
}

#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingResponse {
    data: Vec<OpenAIEmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingData {
    embedding: Vec<f32>,
    /// Index in the input array
    index: usize,
}

/// Trait for embedding providers that can generate vector embeddings
///
/// Implementations must be deterministic for a given model version and must
/// fail with [`Error::EmbeddingUnavailable`] rather than return a placeholder
/// vector. Retry policy belongs to the caller.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embedding for a single text input
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple text inputs, in input order
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Number of dimensions in every vector this provider returns
    fn dimension(&self) -> usize;

    /// Model identifier, used for logging
    fn model_name(&self) -> &str;

    /// Check if the provider is ready to generate embeddings
    async fn health_check(&self) -> Result<bool>;
}

/// Embed `text` and verify the vector has the provider's declared dimension.
pub async fn embed_checked(provider: &dyn EmbeddingProvider, text: &str) -> Result<Vec<f32>> {
    let embedding = provider.embed(text).await?;
    if embedding.len() != provider.dimension() {
        return Err(Error::EmbeddingUnavailable(format!(
            "model '{}' returned {} dimensions, expected {}",
            provider.model_name(),
            embedding.len(),
            provider.dimension()
        )));
    }
    Ok(embedding)
}

/// Mock embedding provider for testing
///
/// Generates deterministic, unit-length embeddings from the input bytes so
/// tests and offline runs get reproducible rankings.
pub struct MockEmbeddingProvider {
    dimension: usize,
    model_name: String,
}

impl MockEmbeddingProvider {
    pub fn new() -> Self {
        Self::new_with_dimension(384)
    }

    pub fn new_with_dimension(dimension: usize) -> Self {
        Self {
            dimension,
            model_name: "mock-embedding-model".to_string(),
        }
    }

    fn generate_deterministic_embedding(&self, text: &str) -> Vec<f32> {
        let bytes = text.as_bytes();
        let mut embedding = Vec::with_capacity(self.dimension);

        for i in 0..self.dimension {
            let mut value = 0.0f32;
            for (j, &byte) in bytes.iter().enumerate() {
                let factor = ((i + j + 1) as f32).sin();
                value += (byte as f32) * factor * 0.01;
            }
            value += (i as f32 * 0.1).cos();
            embedding.push(value);
        }

        let magnitude: f32 = embedding.iter().map(|&x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut embedding {
                *value /= magnitude;
            }
        }

        embedding
    }
}

impl Default for MockEmbeddingProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.generate_deterministic_embedding(text))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| self.generate_deterministic_embedding(text))
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

/// OpenAI-compatible embedding provider
///
/// Works against the OpenAI API or any server exposing the same
/// `POST {base_url}/embeddings` contract.
pub struct OpenAIEmbeddingProvider {
    api_key: String,
    model: String,
    client: reqwest::Client,
    base_url: String,
    dimension: usize,
}

impl OpenAIEmbeddingProvider {
    pub fn new(api_key: String) -> Result<Self> {
        Self::with_config(
            api_key,
            "text-embedding-3-small".to_string(),
            "https://api.openai.com/v1".to_string(),
            Duration::from_secs(30),
        )
    }

    pub fn with_config(
        api_key: String,
        model: String,
        base_url: String,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::EmbeddingUnavailable(format!("http client: {}", e)))?;
        let dimension = Self::model_dimension(&model);

        Ok(Self {
            api_key,
            model,
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            dimension,
        })
    }

    /// Override the dimension for models not in the built-in table.
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    fn model_dimension(model: &str) -> usize {
        match model {
            "text-embedding-ada-002" => 1536,
            "text-embedding-3-small" => 1536,
            "text-embedding-3-large" => 3072,
            _ => crate::config::DEFAULT_EMBEDDING_DIMENSION,
        }
    }

    async fn make_embedding_request(&self, input: OpenAIInput) -> Result<OpenAIEmbeddingResponse> {
        let request = OpenAIEmbeddingRequest {
            model: self.model.clone(),
            input,
            encoding_format: "float".to_string(),
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::EmbeddingUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::EmbeddingUnavailable(format!(
                "embedding API request failed with status {}: {}",
                status, error_text
            )));
        }

        response
            .json::<OpenAIEmbeddingResponse>()
            .await
            .map_err(|e| Error::EmbeddingUnavailable(format!("malformed response: {}", e)))
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .make_embedding_request(OpenAIInput::Single(text.to_string()))
            .await?;

        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| Error::EmbeddingUnavailable("no embeddings returned".to_string()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let input = OpenAIInput::Batch(texts.iter().map(|&s| s.to_string()).collect());
        let response = self.make_embedding_request(input).await?;

        if response.data.len() != texts.len() {
            return Err(Error::EmbeddingUnavailable(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                response.data.len()
            )));
        }

        let mut sorted_data = response.data;
        sorted_data.sort_by_key(|d| d.index);

        Ok(sorted_data.into_iter().map(|d| d.embedding).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn health_check(&self) -> Result<bool> {
        match self.embed("health check").await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!("Embedding provider health check failed: {}", e);
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_mock_provider_is_deterministic() {
        let provider = MockEmbeddingProvider::new_with_dimension(16);
        let a = provider.embed("red camera").await.unwrap();
        let b = provider.embed("red camera").await.unwrap();
        let c = provider.embed("lamp").await.unwrap();

        assert_eq!(a.len(), 16);
        assert_eq!(a, b);
        assert_ne!(a, c);

        let magnitude: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_mock_provider_batch_matches_single() {
        let provider = MockEmbeddingProvider::new_with_dimension(8);
        let batch = provider.embed_batch(&["one", "two"]).await.unwrap();
        assert_eq!(batch[0], provider.embed("one").await.unwrap());
        assert_eq!(batch[1], provider.embed("two").await.unwrap());
    }

    #[tokio::test]
    async fn test_embed_checked_rejects_wrong_dimension() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/embeddings");
                then.status(200)
                    .json_body(json!({"data": [{"embedding": [0.1, 0.2], "index": 0}]}));
            })
            .await;

        let provider = OpenAIEmbeddingProvider::with_config(
            "key".to_string(),
            "custom-model".to_string(),
            server.base_url(),
            Duration::from_secs(5),
        )
        .unwrap()
        .with_dimension(3);

        let result = embed_checked(&provider, "camera").await;
        assert!(matches!(result, Err(Error::EmbeddingUnavailable(_))));
    }

    #[tokio::test]
    async fn test_openai_provider_reads_embedding() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/embeddings")
                    .header("authorization", "Bearer secret");
                then.status(200)
                    .json_body(json!({"data": [{"embedding": [0.5, 0.25, 0.0], "index": 0}]}));
            })
            .await;

        let provider = OpenAIEmbeddingProvider::with_config(
            "secret".to_string(),
            "custom-model".to_string(),
            server.base_url(),
            Duration::from_secs(5),
        )
        .unwrap()
        .with_dimension(3);

        let embedding = embed_checked(&provider, "camera").await.unwrap();
        assert_eq!(embedding, vec![0.5, 0.25, 0.0]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_openai_provider_error_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/embeddings");
                then.status(503).body("model loading");
            })
            .await;

        let provider = OpenAIEmbeddingProvider::with_config(
            "key".to_string(),
            "text-embedding-3-small".to_string(),
            server.base_url(),
            Duration::from_secs(5),
        )
        .unwrap();

        let err = provider.embed("camera").await.unwrap_err();
        assert!(matches!(err, Error::EmbeddingUnavailable(_)));
        assert!(err.to_string().contains("503"));
    }
}
