//! Embedding service trait and implementations.
//!
//! - `GeminiEmbedding` calls the `embedContent` REST endpoint. The same
//!   model must be used at ingestion and query time.
//! - `MockEmbedding` provides deterministic hash-based vectors for testing.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use apteka_core::config::{IndexConfig, LlmConfig};
use apteka_core::error::AptekaError;
use serde::Deserialize;
use serde_json::json;

/// Service for generating text embeddings.
///
/// Implementations convert text into fixed-dimensional vectors that capture
/// semantic meaning. Used for both ingestion (indexing) and search (query).
pub trait EmbeddingService: Send + Sync {
    /// Generate an embedding vector for the given text.
    fn embed(
        &self,
        text: &str,
    ) -> impl std::future::Future<Output = Result<Vec<f32>, AptekaError>> + Send;

    /// Return the dimensionality of vectors produced by this service.
    fn dimensions(&self) -> usize;
}

// ---------------------------------------------------------------------------
// GeminiEmbedding - remote embedding model
// ---------------------------------------------------------------------------

pub struct GeminiEmbedding {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl std::fmt::Debug for GeminiEmbedding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiEmbedding")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbedValues,
}

#[derive(Debug, Deserialize)]
struct EmbedValues {
    values: Vec<f32>,
}

impl GeminiEmbedding {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AptekaError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AptekaError::Embedding(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    /// Build from the service config. The API key is shared with the chat model.
    pub fn from_config(llm: &LlmConfig, index: &IndexConfig) -> Result<Self, AptekaError> {
        Self::new(
            &llm.base_url,
            &llm.api_key,
            &index.embedding_model,
            Duration::from_secs(llm.request_timeout_secs),
        )
    }
}

impl EmbeddingService for GeminiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AptekaError> {
        if text.trim().is_empty() {
            return Err(AptekaError::Embedding("Cannot embed empty text".to_string()));
        }

        let url = format!(
            "{}/v1beta/models/{}:embedContent",
            self.base_url, self.model
        );
        let body = json!({
            "model": format!("models/{}", self.model),
            "content": { "parts": [{ "text": text }] },
        });

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AptekaError::Embedding(format!("embed request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AptekaError::Embedding(format!(
                "embed request returned HTTP {}: {}",
                status.as_u16(),
                text
            )));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| AptekaError::Embedding(format!("invalid embed response: {}", e)))?;

        if parsed.embedding.values.is_empty() {
            return Err(AptekaError::Embedding("empty embedding returned".to_string()));
        }
        Ok(parsed.embedding.values)
    }

    fn dimensions(&self) -> usize {
        768
    }
}

// ---------------------------------------------------------------------------
// MockEmbedding - deterministic hash-based vectors for testing
// ---------------------------------------------------------------------------

/// Mock embedding service that returns deterministic vectors.
///
/// The output is derived from a hash of the input text, so identical inputs
/// always produce identical outputs.
#[derive(Debug, Clone, Default)]
pub struct MockEmbedding;

const MOCK_DIMENSIONS: usize = 64;

impl MockEmbedding {
    pub fn new() -> Self {
        Self
    }

    fn hash_to_vector(text: &str) -> Vec<f32> {
        let mut result = Vec::with_capacity(MOCK_DIMENSIONS);
        for i in 0..MOCK_DIMENSIONS {
            let mut hasher = DefaultHasher::new();
            text.hash(&mut hasher);
            i.hash(&mut hasher);
            let h = hasher.finish();
            let val = ((h as f64) / (u64::MAX as f64)) * 2.0 - 1.0;
            result.push(val as f32);
        }

        let norm: f32 = result.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for val in &mut result {
                *val /= norm;
            }
        }

        result
    }
}

impl EmbeddingService for MockEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AptekaError> {
        if text.is_empty() {
            return Err(AptekaError::Embedding("Cannot embed empty text".to_string()));
        }
        Ok(Self::hash_to_vector(text))
    }

    fn dimensions(&self) -> usize {
        MOCK_DIMENSIONS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_mock_embedding_deterministic() {
        let service = MockEmbedding::new();
        let v1 = service.embed("Минск Ленина").await.unwrap();
        let v2 = service.embed("Минск Ленина").await.unwrap();
        assert_eq!(v1, v2);
        assert_eq!(v1.len(), MOCK_DIMENSIONS);
    }

    #[tokio::test]
    async fn test_mock_embedding_different_inputs() {
        let service = MockEmbedding::new();
        let v1 = service.embed("text one").await.unwrap();
        let v2 = service.embed("text two").await.unwrap();
        assert_ne!(v1, v2);
    }

    #[tokio::test]
    async fn test_mock_embedding_empty_text() {
        let service = MockEmbedding::new();
        assert!(service.embed("").await.is_err());
    }

    #[tokio::test]
    async fn test_gemini_embedding_parses_values() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/text-embedding-004:embedContent"))
            .and(body_partial_json(json!({"model": "models/text-embedding-004"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"embedding": {"values": [0.1, 0.2, 0.3]}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let service = GeminiEmbedding::new(
            server.uri(),
            "k",
            "text-embedding-004",
            Duration::from_secs(5),
        )
        .unwrap();
        let v = service.embed("аптека").await.unwrap();
        assert_eq!(v, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn test_gemini_embedding_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let service =
            GeminiEmbedding::new(server.uri(), "k", "m", Duration::from_secs(5)).unwrap();
        let err = service.embed("аптека").await.unwrap_err();
        assert!(matches!(err, AptekaError::Embedding(ref m) if m.contains("403")));
    }

    #[tokio::test]
    async fn test_gemini_embedding_rejects_blank() {
        let service =
            GeminiEmbedding::new("http://127.0.0.1:9", "k", "m", Duration::from_secs(1)).unwrap();
        assert!(service.embed("   ").await.is_err());
    }
}
