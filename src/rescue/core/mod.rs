//! Core rescue types and identifiers.

pub mod category;
pub mod config;
pub mod digest;
pub mod errors;
pub mod ids;
pub mod memory;

pub use category::{MemoryCategory, MemoryCategoryParseError};
pub use config::{
    BackendConfig, EmbeddingConfig, EmbeddingProvider, LlmConfig, PerspectiveConfig,
    RescueConfig, DEFAULT_COLLECTION, DEFAULT_LOCAL_EMBEDDING_MODEL, DEFAULT_MAX_ITEMS_PER_PERSPECTIVE,
    DEFAULT_MODEL, DEFAULT_REMOTE_EMBEDDING_MODEL,
};
pub use digest::CommitHash;
pub use errors::{RescueError, RescueResult};
pub use ids::SessionId;
pub use memory::{
    clamp_importance, CandidateMemory, Memory, PendingMemory, Provenance, DEFAULT_IMPORTANCE,
    MAX_IMPORTANCE, MIN_IMPORTANCE,
};
