//! Process-local cache of commit hashes known to be durable.
//!
//! Best-effort fast path in front of `deduplicate`. A miss says nothing; only the
//! backend is authoritative.

use std::num::NonZeroUsize;

use lru::LruCache;
use tokio::sync::Mutex;

use crate::rescue::core::digest::CommitHash;

/// Bounded LRU of durable commit hashes. Capacity 0 disables it.
pub struct SeenCache {
    inner: Option<Mutex<LruCache<CommitHash, ()>>>,
}

impl SeenCache {
    /// Create a cache holding at most `capacity` hashes.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
        }
    }

    /// Whether the cache is active.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Whether `hash` is known durable; refreshes its recency.
    pub async fn contains(&self, hash: &CommitHash) -> bool {
        match &self.inner {
            Some(cache) => cache.lock().await.get(hash).is_some(),
            None => false,
        }
    }

    /// Record `hash` as durable.
    pub async fn remember(&self, hash: &CommitHash) {
        if let Some(cache) = &self.inner {
            cache.lock().await.put(hash.clone(), ());
        }
    }

    /// Number of cached hashes.
    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        match &self.inner {
            Some(cache) => cache.lock().await.len(),
            None => 0,
        }
    }

    /// Whether no hash is cached.
    #[cfg(test)]
    pub(crate) async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
