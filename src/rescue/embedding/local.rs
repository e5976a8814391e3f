//! Local embeddings through fastembed.
//!
//! Runs an ONNX sentence-embedding model in-process. Weights are fetched once
//! into the cache directory; every later call is offline.

use std::sync::{Arc, Mutex};

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tracing::info;

use crate::rescue::core::config::EmbeddingConfig;
use crate::rescue::core::errors::{RescueError, RescueResult};
use crate::rescue::embedding::embedder::{EmbedFuture, Embedder, normalize};

/// Resolve a model name to its fastembed model and declared dimension.
///
/// # Errors
/// Returns [`RescueError::InvalidConfig`] for models this crate does not ship support for.
pub fn resolve_local_model(name: &str) -> RescueResult<(EmbeddingModel, usize)> {
    match name.trim().to_ascii_lowercase().as_str() {
        "bge-small-en-v1.5" | "baai/bge-small-en-v1.5" => Ok((EmbeddingModel::BGESmallENV15, 384)),
        "bge-base-en-v1.5" | "baai/bge-base-en-v1.5" => Ok((EmbeddingModel::BGEBaseENV15, 768)),
        "all-minilm-l6-v2" | "sentence-transformers/all-minilm-l6-v2" => {
            Ok((EmbeddingModel::AllMiniLML6V2, 384))
        }
        "nomic-embed-text-v1.5" | "nomic-ai/nomic-embed-text-v1.5" => {
            Ok((EmbeddingModel::NomicEmbedTextV15, 768))
        }
        "multilingual-e5-small" | "intfloat/multilingual-e5-small" => {
            Ok((EmbeddingModel::MultilingualE5Small, 384))
        }
        other => Err(RescueError::InvalidConfig(format!(
            "unknown local embedding model: {other}"
        ))),
    }
}

/// In-process embedder backed by a fastembed `TextEmbedding`.
#[derive(Clone)]
pub struct FastEmbedder {
    model: Arc<Mutex<TextEmbedding>>,
    ndims: usize,
}

impl FastEmbedder {
    /// Load the configured model, downloading weights if they are not cached yet.
    ///
    /// Blocks while loading; call it off the async runtime's worker threads.
    ///
    /// # Errors
    /// Returns an error for unknown models, a declared dimension that differs from
    /// the model's, or a model that cannot be loaded.
    pub fn new(config: &EmbeddingConfig) -> RescueResult<Self> {
        config.validate()?;
        let (model, ndims) = resolve_local_model(&config.model)?;
        if config.ndims != ndims {
            return Err(RescueError::DimensionMismatch {
                expected: config.ndims,
                actual: ndims,
            });
        }

        let mut options = InitOptions::new(model).with_show_download_progress(false);
        if let Some(cache_dir) = &config.cache_dir {
            options = options.with_cache_dir(cache_dir.clone());
        }
        let embedding =
            TextEmbedding::try_new(options).map_err(|err| RescueError::LocalModel(err.to_string()))?;
        info!(model = %config.model, ndims, "Loaded local embedding model");

        Ok(Self {
            model: Arc::new(Mutex::new(embedding)),
            ndims,
        })
    }
}

impl Embedder for FastEmbedder {
    fn embed_text(&self, text: &str) -> EmbedFuture<'_, RescueResult<Vec<f32>>> {
        let model = Arc::clone(&self.model);
        let text = text.to_string();
        Box::pin(async move {
            let mut vectors = tokio::task::spawn_blocking(move || {
                let mut model = model.lock().map_err(|_| {
                    RescueError::LocalModel("embedding model lock poisoned".to_string())
                })?;
                model
                    .embed(vec![text], None)
                    .map_err(|err| RescueError::LocalModel(err.to_string()))
            })
            .await??;

            let mut vector = vectors.pop().ok_or_else(|| {
                RescueError::LocalModel("model returned no embedding".to_string())
            })?;
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
