//! Embedding models.

use std::sync::Arc;

use crate::rescue::core::config::{EmbeddingConfig, EmbeddingProvider};
use crate::rescue::core::errors::RescueResult;

pub mod embedder;
pub mod local;
#[cfg(test)]
pub(crate) mod test_support;

pub use embedder::{EmbedFuture, Embedder, OpenAiEmbedder};
pub use local::{FastEmbedder, resolve_local_model};

/// Build the configured embedder.
///
/// Loading a local model blocks; async callers should run this on a blocking thread.
///
/// # Errors
/// Returns an error if the embedder cannot be constructed.
pub fn build_embedder(config: &EmbeddingConfig) -> RescueResult<Arc<dyn Embedder>> {
    config.validate()?;
    Ok(match config.provider {
        EmbeddingProvider::Local => Arc::new(FastEmbedder::new(config)?),
        EmbeddingProvider::OpenAi => Arc::new(OpenAiEmbedder::new(config)?),
    })
}
