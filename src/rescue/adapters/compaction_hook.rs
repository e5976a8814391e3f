//! Host-side hook run right before compaction.

use std::time::Duration;

use tracing::warn;

use crate::rescue::core::ids::SessionId;
use crate::rescue::core::memory::Memory;
use crate::rescue::engine::MemoryRescue;

/// Initialize tracing with an env-filtered subscriber on stderr (default `info`).
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Rescue memories from `context`, giving up after `host_timeout`.
///
/// Compaction must not wait on the rescue: when the budget elapses the call
/// returns an empty list. Perspective tasks already in flight finish on their own.
pub async fn rescue_before_compaction(
    rescue: &MemoryRescue,
    context: &str,
    session: &SessionId,
    host_timeout: Duration,
) -> Vec<Memory> {
    match tokio::time::timeout(host_timeout, rescue.extract_and_commit(context, session)).await {
        Ok(memories) => memories,
        Err(_) => {
            warn!(
                session = %session,
                timeout_ms = host_timeout.as_millis(),
                "Rescue exceeded host timeout, continuing compaction without it"
            );
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::*;
    use crate::rescue::core::category::MemoryCategory;
    use crate::rescue::core::config::RescueConfig;
    use crate::rescue::core::memory::CandidateMemory;
    use crate::rescue::embedding::test_support::TokenEmbedder;
    use crate::rescue::extract::perspective::{ExtractFuture, Perspective};
    use crate::rescue::storage::backend::MemoryBackend;
    use crate::rescue::storage::embedded::EmbeddedBackend;

    struct SlowPerspective {
        delay: Duration,
    }

    impl Perspective for SlowPerspective {
        fn category(&self) -> MemoryCategory {
            MemoryCategory::Decision
        }

        fn model(&self) -> &str {
            "stub/slow"
        }

        fn extract<'a>(&'a self, _context: &'a str) -> ExtractFuture<'a, Vec<CandidateMemory>> {
            Box::pin(async move {
                tokio::time::sleep(self.delay).await;
                vec![CandidateMemory::new(
                    "Chose Postgres over Mongo because payment records need ACID transactions",
                    9,
                )]
            })
        }
    }

    async fn rescue(dir: &TempDir, delay: Duration) -> MemoryRescue {
        let embedder = Arc::new(TokenEmbedder::new(64));
        let backend: Arc<dyn MemoryBackend> = Arc::new(
            EmbeddedBackend::open(dir.path().join("hook.sqlite"), "agent_memory", embedder)
                .await
                .unwrap(),
        );
        let perspective: Arc<dyn Perspective> = Arc::new(SlowPerspective { delay });
        MemoryRescue::new(RescueConfig::default(), vec![perspective], backend).unwrap()
    }

    #[tokio::test]
    async fn test_returns_committed_memories_within_budget() {
        let dir = TempDir::new().unwrap();
        let rescue = rescue(&dir, Duration::from_millis(10)).await;
        let memories = rescue_before_compaction(
            &rescue,
            "payments discussion",
            &SessionId::from("host-1"),
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(memories.len(), 1);
        assert_eq!(memories[0].category(), MemoryCategory::Decision);
    }

    #[tokio::test]
    async fn test_host_timeout_yields_empty() {
        let dir = TempDir::new().unwrap();
        let rescue = rescue(&dir, Duration::from_secs(10)).await;
        let memories = rescue_before_compaction(
            &rescue,
            "payments discussion",
            &SessionId::from("host-2"),
            Duration::from_millis(50),
        )
        .await;
        assert!(memories.is_empty());
    }

    #[test]
    fn test_init_tracing_is_repeatable() {
        init_tracing();
        init_tracing();
    }
}
