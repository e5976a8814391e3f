//! Pre-compaction memory rescue.
//!
//! Before an agent's context is compacted, several extraction perspectives read
//! it concurrently; important, not-yet-durable memories are committed to a
//! content-addressed vector store.

pub mod adapters;
pub mod core;
pub mod embedding;
pub mod engine;
pub mod extract;
pub mod storage;

pub use adapters::{init_tracing, rescue_before_compaction};
pub use self::core::{
    BackendConfig, CandidateMemory, CommitHash, EmbeddingConfig, LlmConfig, Memory,
    MemoryCategory, PerspectiveConfig, RescueConfig, RescueError, RescueResult, SessionId,
};
pub use embedding::{Embedder, FastEmbedder, OpenAiEmbedder, build_embedder};
pub use engine::{MemoryRescue, RescueStats, SessionStats};
pub use extract::{LlmPerspective, Perspective};
pub use storage::{
    CommitOutcome, EmbeddedBackend, MemoryBackend, PineconeBackend, QdrantBackend, ScoredMemory,
    connect_backend,
};
