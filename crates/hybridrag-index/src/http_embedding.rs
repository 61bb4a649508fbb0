use async_trait::async_trait;
use hybridrag_core::{RagError, RagResult};
use serde::Deserialize;

use crate::embedding::EmbeddingProvider;

/// Embedding client for any OpenAI-compatible `/v1/embeddings` endpoint
/// (OpenAI, Ollama, vLLM, LocalAI, ...).
pub struct HttpEmbedding {
    base_url: String,
    api_key: Option<String>,
    model: String,
    dimension: usize,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

impl HttpEmbedding {
    /// Create a client for `base_url` (without the `/v1/embeddings` suffix).
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            model: model.into(),
            dimension,
            http: reqwest::Client::new(),
        }
    }

    /// Send `Authorization: Bearer <key>` with every request.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Model name sent in the request body.
    pub fn model(&self) -> &str {
        &self.model
    }

    async fn request(&self, texts: &[&str]) -> RagResult<Vec<Vec<f32>>> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut request = self
            .http
            .post(&url)
            .header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let resp = request
            .json(&body)
            .send()
            .await
            .map_err(|e| RagError::Http(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(RagError::Http(format!(
                "embedding API error {status}: {text}"
            )));
        }

        let mut parsed: EmbeddingResponse = resp
            .json()
            .await
            .map_err(|e| RagError::EmbeddingFailure(format!("invalid response body: {e}")))?;

        if parsed.data.len() != texts.len() {
            return Err(RagError::EmbeddingFailure(format!(
                "requested {} embeddings, received {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        parsed.data.sort_by_key(|d| d.index);
        let vectors: Vec<Vec<f32>> = parsed.data.into_iter().map(|d| d.embedding).collect();
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: bad.len(),
            });
        }
        Ok(vectors)
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbedding {
    async fn embed(&self, text: &str) -> RagResult<Vec<f32>> {
        self.request(&[text])
            .await?
            .pop()
            .ok_or_else(|| RagError::EmbeddingFailure("empty embedding response".to_string()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> RagResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts).await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_batch_sorted_by_index() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(header("Authorization", "Bearer secret"))
            .and(body_partial_json(serde_json::json!({"model": "tiny"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"index": 1, "embedding": [0.0, 1.0]},
                    {"index": 0, "embedding": [1.0, 0.0]}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpEmbedding::new(server.uri(), "tiny", 2).with_api_key("secret");
        let vectors = client.embed_batch(&["first", "second"]).await.unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn test_server_error_maps_to_http() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = HttpEmbedding::new(server.uri(), "tiny", 2);
        let err = client.embed("hello").await.unwrap_err();
        assert!(matches!(err, RagError::Http(msg) if msg.contains("500")));
    }

    #[tokio::test]
    async fn test_wrong_dimension_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"index": 0, "embedding": [1.0, 0.0, 0.0]}]
            })))
            .mount(&server)
            .await;

        let client = HttpEmbedding::new(server.uri(), "tiny", 2);
        let err = client.embed("hello").await.unwrap_err();
        assert!(matches!(
            err,
            RagError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));
    }

    #[tokio::test]
    async fn test_count_mismatch_is_embedding_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"index": 0, "embedding": [1.0, 0.0]}]
            })))
            .mount(&server)
            .await;

        let client = HttpEmbedding::new(format!("{}/", server.uri()), "tiny", 2);
        let err = client.embed_batch(&["a", "b"]).await.unwrap_err();
        assert!(matches!(err, RagError::EmbeddingFailure(_)));
    }
}
