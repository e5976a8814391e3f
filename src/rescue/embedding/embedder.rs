//! Embedding model abstraction and the OpenAI-compatible client.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::Client as ReqwestClient;
use rig::client::EmbeddingsClient;
use rig::embeddings::EmbeddingModel;
use rig::providers::openai;

use crate::rescue::core::config::EmbeddingConfig;
use crate::rescue::core::errors::{RescueError, RescueResult};

/// Boxed future type for embedder operations.
pub type EmbedFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait abstraction over embedding models.
///
/// Vectors come back L2-normalized, so stores may treat L2 distance as cosine.
pub trait Embedder: Send + Sync {
    /// Embed a single text string.
    ///
    /// # Errors
    /// Returns an error if the embedding request fails or the vector has the wrong length.
    fn embed_text(&self, text: &str) -> EmbedFuture<'_, RescueResult<Vec<f32>>>;
    /// Return embedding dimensionality.
    fn ndims(&self) -> usize;
}

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const CREDENTIAL_ENV: &str = "OPENAI_API_KEY";

type RemoteEmbeddingModel = openai::EmbeddingModel<ReqwestClient>;

/// Embedder for any OpenAI-compatible `/embeddings` endpoint, through rig's OpenAI provider.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    model: RemoteEmbeddingModel,
    ndims: usize,
    timeout: Duration,
}

impl OpenAiEmbedder {
    /// Create an embedder from config, reading the credential from the environment.
    ///
    /// # Errors
    /// Returns an error if the config is invalid, no credential is available for the
    /// default endpoint, or the client cannot be built.
    pub fn new(config: &EmbeddingConfig) -> RescueResult<Self> {
        Self::with_lookup(config, |name| std::env::var(name).ok())
    }

    /// Create an embedder with an explicit credential lookup.
    ///
    /// # Errors
    /// Same as [`OpenAiEmbedder::new`].
    pub fn with_lookup<F>(config: &EmbeddingConfig, lookup: F) -> RescueResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        config.validate()?;
        let api_key = config
            .api_key
            .clone()
            .or_else(|| lookup(CREDENTIAL_ENV).filter(|key| !key.trim().is_empty()));
        // Self-hosted endpoints commonly run without a key.
        if api_key.is_none() && config.base_url.is_none() {
            return Err(RescueError::MissingCredential {
                provider: "openai".to_string(),
                env_var: CREDENTIAL_ENV.to_string(),
            });
        }

        let base = config
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/');
        let client = openai::Client::<ReqwestClient>::builder()
            .api_key(api_key.unwrap_or_default())
            .base_url(base)
            .build()
            .map_err(RescueError::from)?;
        let model = client.embedding_model_with_ndims(config.model.clone(), config.ndims);

        Ok(Self {
            model,
            ndims: config.ndims,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }
}

impl Embedder for OpenAiEmbedder {
    fn embed_text(&self, text: &str) -> EmbedFuture<'_, RescueResult<Vec<f32>>> {
        let text = text.to_string();
        Box::pin(async move {
            let embedding = tokio::time::timeout(self.timeout, self.model.embed_text(&text))
                .await
                .map_err(|_| RescueError::Timeout("embedding call".to_string()))??;

            let mut vector = narrow(&embedding.vec);
            if vector.len() != self.ndims {
                return Err(RescueError::DimensionMismatch {
                    expected: self.ndims,
                    actual: vector.len(),
                });
            }
            normalize(&mut vector);
            Ok(vector)
        })
    }

    fn ndims(&self) -> usize {
        self.ndims
    }
}

/// Scale `vector` to unit length; a zero vector stays zero.
pub(crate) fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

// sqlite-vec stores float32.
#[allow(clippy::cast_possible_truncation)]
fn narrow(values: &[f64]) -> Vec<f32> {
    values.iter().map(|value| *value as f32).collect()
}

#[cfg(test)]
mod tests {
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{Value, json};

    use super::*;
    use crate::rescue::core::config::EmbeddingProvider;

    #[derive(Clone, Copy)]
    struct MockEmbeddings {
        dims: usize,
        status: StatusCode,
    }

    async fn embeddings(
        State(mock): State<MockEmbeddings>,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        assert_eq!(body["model"], "test-embed");
        if !mock.status.is_success() {
            return (mock.status, Json(json!({"error": {"message": "overloaded"}})));
        }
        (
            StatusCode::OK,
            Json(json!({
                "object": "list",
                "data": [{"object": "embedding", "index": 0, "embedding": vec![0.5_f64; mock.dims]}],
                "model": "test-embed",
                "usage": {"prompt_tokens": 1, "total_tokens": 1}
            })),
        )
    }

    async fn spawn_embeddings(dims: usize, status: StatusCode) -> String {
        let app = Router::new()
            .route("/embeddings", post(embeddings))
            .with_state(MockEmbeddings { dims, status });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn config(base_url: String, ndims: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: EmbeddingProvider::OpenAi,
            model: "test-embed".to_string(),
            ndims,
            base_url: Some(base_url),
            ..EmbeddingConfig::default()
        }
    }

    #[tokio::test]
    async fn test_embed_text_is_unit_length() {
        let base = spawn_embeddings(8, StatusCode::OK).await;
        let embedder = OpenAiEmbedder::with_lookup(&config(base, 8), |_| None).unwrap();
        let vector = embedder.embed_text("hello").await.unwrap();
        assert_eq!(vector.len(), 8);
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_wrong_length_is_dimension_mismatch() {
        let base = spawn_embeddings(4, StatusCode::OK).await;
        let embedder = OpenAiEmbedder::with_lookup(&config(base, 8), |_| None).unwrap();
        assert!(matches!(
            embedder.embed_text("hello").await,
            Err(RescueError::DimensionMismatch {
                expected: 8,
                actual: 4
            })
        ));
    }

    #[tokio::test]
    async fn test_server_error_is_unavailable() {
        let base = spawn_embeddings(8, StatusCode::SERVICE_UNAVAILABLE).await;
        let embedder = OpenAiEmbedder::with_lookup(&config(base, 8), |_| None).unwrap();
        let err = embedder.embed_text("hello").await.unwrap_err();
        assert!(err.is_unavailable());
    }

    #[test]
    fn test_default_endpoint_needs_key() {
        let config = EmbeddingConfig {
            provider: EmbeddingProvider::OpenAi,
            model: "text-embedding-3-small".to_string(),
            ndims: 1536,
            ..EmbeddingConfig::default()
        };
        assert!(matches!(
            OpenAiEmbedder::with_lookup(&config, |_| None),
            Err(RescueError::MissingCredential { .. })
        ));
        assert!(OpenAiEmbedder::with_lookup(&config, |_| Some("sk-test".to_string())).is_ok());
    }

    #[test]
    fn test_normalize_keeps_zero_vector() {
        let mut zero = vec![0.0_f32; 4];
        normalize(&mut zero);
        assert!(zero.iter().all(|v| *v == 0.0));

        let mut vector = vec![3.0_f32, 4.0];
        normalize(&mut vector);
        assert!((vector[0] - 0.6).abs() < 1e-6);
    }
}
