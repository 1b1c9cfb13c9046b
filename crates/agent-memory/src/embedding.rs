//! Embedding providers
//!
//! [`OpenAiEmbedder`] talks to any OpenAI-compatible `/embeddings` endpoint.
//! [`build_embedder`] picks the provider named by configuration.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use memory_state::fakes::HashingEmbedder;
use memory_state::{EmbeddingProvider, MemoryError, ProviderError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::config::{EmbeddingConfig, EmbeddingProviderKind};

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

/// Client for an OpenAI-compatible embeddings API.
pub struct OpenAiEmbedder {
    http_client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    dimension: usize,
}

impl std::fmt::Debug for OpenAiEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEmbedder")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("dimension", &self.dimension)
            .finish_non_exhaustive()
    }
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_ref()
            .ok_or_else(|| MemoryError::Config("OPENAI_API_KEY is not set".into()))?;

        let http_client = reqwest::Client::builder()
            .user_agent(concat!("agent-memory/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| MemoryError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            endpoint: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key: api_key.expose().to_string(),
            dimension: config.dimension,
        })
    }

    /// Only the `text-embedding-3` family accepts a requested dimension.
    fn requested_dimensions(&self) -> Option<usize> {
        self.model
            .starts_with("text-embedding-3")
            .then_some(self.dimension)
    }
}

/// Map a non-success HTTP status to a provider error.
fn status_error(status: u16, body: String) -> ProviderError {
    match status {
        429 => ProviderError::Quota(body),
        _ => ProviderError::Http { status, body },
    }
}

fn parse_response(body: &[u8], dimension: usize) -> std::result::Result<Vec<f32>, ProviderError> {
    let parsed: EmbeddingResponse = serde_json::from_slice(body)
        .map_err(|e| ProviderError::InvalidResponse(format!("malformed body: {e}")))?;

    let embedding = parsed
        .data
        .into_iter()
        .next()
        .map(|d| d.embedding)
        .ok_or_else(|| ProviderError::InvalidResponse("response contained no embeddings".into()))?;

    if embedding.len() != dimension {
        return Err(ProviderError::InvalidResponse(format!(
            "expected {dimension} dimensions, got {}",
            embedding.len()
        )));
    }
    Ok(embedding)
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    #[instrument(skip(self, text), fields(model = %self.model, chars = text.len()))]
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, ProviderError> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: text,
            dimensions: self.requested_dimensions(),
        };

        let response = self
            .http_client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !status.is_success() {
            let body = String::from_utf8_lossy(&body).into_owned();
            warn!(status = status.as_u16(), "embedding request rejected");
            return Err(status_error(status.as_u16(), body));
        }

        let embedding = parse_response(&body, self.dimension)?;
        debug!("embedding received");
        Ok(embedding)
    }
}

/// Construct the provider selected by `config`.
pub fn build_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.resolved_provider()? {
        EmbeddingProviderKind::OpenAi => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
        EmbeddingProviderKind::Hashing => {
            warn!(
                dimension = config.dimension,
                "using offline hashing embeddings; similarity reflects word overlap only"
            );
            Ok(Arc::new(HashingEmbedder::new(config.dimension)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Secret;
    use serde_json::json;
    use tokio::net::TcpListener;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: String, dimension: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: Some(EmbeddingProviderKind::OpenAi),
            dimension,
            base_url,
            api_key: Some(Secret::new("sk-test")),
            ..EmbeddingConfig::default()
        }
    }

    #[test]
    fn test_parse_response() {
        let body = br#"{"data":[{"embedding":[0.1,0.2,0.3],"index":0}],"model":"m"}"#;
        assert_eq!(parse_response(body, 3).unwrap(), vec![0.1, 0.2, 0.3]);

        assert!(matches!(
            parse_response(body, 4),
            Err(ProviderError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_response(br#"{"data":[]}"#, 3),
            Err(ProviderError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_response(b"not json", 3),
            Err(ProviderError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(status_error(429, "slow down".into()), ProviderError::Quota(_)));
        assert!(matches!(
            status_error(500, "boom".into()),
            ProviderError::Http { status: 500, .. }
        ));
    }

    #[test]
    fn test_requested_dimensions_only_for_v3_models() {
        let mut cfg = config("http://localhost".into(), 256);
        assert_eq!(OpenAiEmbedder::new(&cfg).unwrap().requested_dimensions(), Some(256));

        cfg.model = "text-embedding-ada-002".into();
        assert_eq!(OpenAiEmbedder::new(&cfg).unwrap().requested_dimensions(), None);
    }

    #[tokio::test]
    async fn test_embed_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "text-embedding-3-small",
                "input": "hello",
                "dimensions": 2
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"data": [{"embedding": [1.0, 0.0], "index": 0}]})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let embedder = OpenAiEmbedder::new(&config(server.uri(), 2)).unwrap();
        assert_eq!(embedder.embed("hello").await.unwrap(), vec![1.0, 0.0]);
    }

    #[tokio::test]
    async fn test_rate_limit_is_quota_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(
                ResponseTemplate::new(429).set_body_json(json!({"error": {"message": "quota"}})),
            )
            .mount(&server)
            .await;

        let embedder = OpenAiEmbedder::new(&config(server.uri(), 2)).unwrap();
        let err = embedder.embed("hello").await.unwrap_err();
        assert!(matches!(err, ProviderError::Quota(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_server_error_keeps_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let embedder = OpenAiEmbedder::new(&config(server.uri(), 2)).unwrap();
        match embedder.embed("hello").await.unwrap_err() {
            ProviderError::Http { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "overloaded");
            }
            other => panic!("expected Http error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_is_network_error() {
        // Bind then drop to get a port nothing listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let embedder = OpenAiEmbedder::new(&config(format!("http://{addr}"), 2)).unwrap();
        let err = embedder.embed("hello").await.unwrap_err();
        assert!(matches!(err, ProviderError::Network(_)), "got {err:?}");
    }

    #[test]
    fn test_build_embedder_requires_an_explicit_provider() {
        let unset = build_embedder(&EmbeddingConfig {
            dimension: 32,
            ..EmbeddingConfig::default()
        });
        assert!(matches!(unset, Err(MemoryError::Config(_))));

        let hashing = build_embedder(&EmbeddingConfig {
            provider: Some(EmbeddingProviderKind::Hashing),
            dimension: 32,
            ..EmbeddingConfig::default()
        })
        .unwrap();
        assert_eq!(hashing.dimension(), 32);
    }
}
