//! Durable memory backends.

use std::sync::Arc;

use tracing::info;

use crate::rescue::core::config::BackendConfig;
use crate::rescue::core::errors::RescueResult;
use crate::rescue::embedding::embedder::Embedder;

pub mod backend;
pub mod embedded;
pub mod pinecone;
pub mod qdrant;
pub mod sqlite_vec_loader;

pub use backend::{CommitOutcome, MemoryBackend, ScoredMemory, StoreFuture};
pub use embedded::EmbeddedBackend;
pub use pinecone::PineconeBackend;
pub use qdrant::QdrantBackend;

/// Build the configured backend.
///
/// # Errors
/// Returns a configuration error if the backend cannot be reached or its
/// collection disagrees with the embedder's dimension.
pub async fn connect_backend(
    config: &BackendConfig,
    embedder: Arc<dyn Embedder>,
) -> RescueResult<Arc<dyn MemoryBackend>> {
    config.validate()?;
    let backend: Arc<dyn MemoryBackend> = match config {
        BackendConfig::Embedded { path, collection } => {
            Arc::new(EmbeddedBackend::open(path, collection, embedder).await?)
        }
        BackendConfig::Qdrant {
            url,
            collection,
            api_key,
        } => Arc::new(QdrantBackend::connect(url, collection, api_key.clone(), embedder).await?),
        BackendConfig::Pinecone {
            index_host,
            api_key,
            namespace,
        } => Arc::new(
            PineconeBackend::connect(index_host, api_key.clone(), namespace, embedder).await?,
        ),
    };
    info!(backend = backend.name(), "Memory backend ready");
    Ok(backend)
}
