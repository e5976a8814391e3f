//! Durable memory store abstraction.

use std::future::Future;
use std::pin::Pin;

use crate::rescue::core::digest::CommitHash;
use crate::rescue::core::errors::RescueResult;
use crate::rescue::core::memory::Memory;

/// Boxed future type for backend operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What a commit did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    /// This call made the memory durable.
    Stored,
    /// A memory with the same commit hash was already durable.
    AlreadyPresent,
}

/// Search hit with similarity score.
#[derive(Clone, Debug)]
pub struct ScoredMemory {
    /// Similarity in [-1, 1], higher is closer.
    pub similarity: f64,
    /// Retrieved memory.
    pub memory: Memory,
}

/// Pluggable durable store keyed by commit hash.
///
/// Every operation reports backend trouble as a typed error; callers decide how
/// to degrade.
pub trait MemoryBackend: Send + Sync {
    /// Persist one memory. Committing an existing hash never creates a duplicate.
    ///
    /// # Errors
    /// Returns an error if the store cannot be reached or rejects the write.
    fn commit<'a>(&'a self, memory: &'a Memory) -> StoreFuture<'a, RescueResult<CommitOutcome>>;
    /// Nearest-neighbour retrieval, descending similarity, at most `limit` hits.
    ///
    /// # Errors
    /// Returns an error if embedding or the query fails.
    fn search<'a>(
        &'a self,
        query: &'a str,
        limit: usize,
    ) -> StoreFuture<'a, RescueResult<Vec<ScoredMemory>>>;
    /// Whether a memory with this hash is already durable.
    ///
    /// # Errors
    /// Returns an error if the store cannot be queried.
    fn deduplicate<'a>(&'a self, commit_hash: &'a CommitHash) -> StoreFuture<'a, RescueResult<bool>>;
    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}
