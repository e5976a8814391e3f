//! Rescue orchestration.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::rescue::core::category::MemoryCategory;
use crate::rescue::core::config::{LlmConfig, PerspectiveConfig, RescueConfig};
use crate::rescue::core::errors::{RescueError, RescueResult};
use crate::rescue::core::ids::SessionId;
use crate::rescue::core::memory::{CandidateMemory, Memory, PendingMemory, Provenance};
use crate::rescue::embedding::build_embedder;
use crate::rescue::engine::seen_cache::SeenCache;
use crate::rescue::extract::llm_perspective::LlmPerspective;
use crate::rescue::extract::perspective::Perspective;
use crate::rescue::storage::backend::{CommitOutcome, MemoryBackend};
use crate::rescue::storage::connect_backend;

/// Per-session pipeline counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// `extract_and_commit` calls.
    pub invocations: u64,
    /// Candidates returned by perspectives.
    pub candidates: u64,
    /// Candidates below the importance threshold.
    pub gated: u64,
    /// Candidates dropped as already durable or repeated within a batch.
    pub duplicates: u64,
    /// Memories this pipeline made durable.
    pub committed: u64,
    /// Commits the backend could not complete.
    pub failed_commits: u64,
    /// Perspectives that timed out or panicked.
    pub failed_perspectives: u64,
}

impl SessionStats {
    fn absorb(&mut self, other: &Self) {
        self.invocations += other.invocations;
        self.candidates += other.candidates;
        self.gated += other.gated;
        self.duplicates += other.duplicates;
        self.committed += other.committed;
        self.failed_commits += other.failed_commits;
        self.failed_perspectives += other.failed_perspectives;
    }
}

/// A configured perspective as reported by [`MemoryRescue::stats`].
#[derive(Clone, Debug, Serialize)]
pub struct PerspectiveSummary {
    /// Category extracted.
    pub category: MemoryCategory,
    /// Model id.
    pub model: String,
}

/// Configuration summary plus per-session counters.
#[derive(Clone, Debug, Serialize)]
pub struct RescueStats {
    /// Perspectives in fan-out order.
    pub perspectives: Vec<PerspectiveSummary>,
    /// Minimum importance persisted.
    pub importance_threshold: u8,
    /// Whether the dedup check runs before commit.
    pub dedup: bool,
    /// Backend name.
    pub backend: &'static str,
    /// Counters keyed by session id.
    pub sessions: HashMap<String, SessionStats>,
}

/// Pre-compaction memory rescue pipeline.
///
/// Fans the context out to every perspective, gates candidates by importance,
/// drops what is already durable, and commits the rest.
pub struct MemoryRescue {
    config: RescueConfig,
    perspectives: Vec<Arc<dyn Perspective>>,
    backend: Arc<dyn MemoryBackend>,
    seen: SeenCache,
    sessions: DashMap<SessionId, SessionStats>,
}

impl MemoryRescue {
    /// Create a pipeline from explicit perspectives and backend.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or no perspective is given.
    pub fn new(
        config: RescueConfig,
        perspectives: Vec<Arc<dyn Perspective>>,
        backend: Arc<dyn MemoryBackend>,
    ) -> RescueResult<Self> {
        config.validate()?;
        if perspectives.is_empty() {
            return Err(RescueError::InvalidConfig(
                "at least one perspective must be configured".to_string(),
            ));
        }

        Ok(Self {
            seen: SeenCache::new(config.seen_cache_capacity),
            config,
            perspectives,
            backend,
            sessions: DashMap::new(),
        })
    }

    /// Build perspectives, embedder and backend from configuration.
    ///
    /// # Errors
    /// Returns an error if any component cannot be constructed.
    pub async fn from_config(config: RescueConfig) -> RescueResult<Self> {
        config.validate()?;
        let perspectives = config
            .perspectives
            .iter()
            .map(|perspective| {
                LlmPerspective::new(perspective, config.max_items_per_perspective)
                    .map(|p| Arc::new(p) as Arc<dyn Perspective>)
            })
            .collect::<RescueResult<Vec<_>>>()?;
        let embedding = config.embedding.clone();
        let embedder = tokio::task::spawn_blocking(move || build_embedder(&embedding)).await??;
        let backend = connect_backend(&config.backend, embedder).await?;
        Self::new(config, perspectives, backend)
    }

    /// Fact, decision and skill perspectives sharing one model.
    ///
    /// # Errors
    /// Same as [`MemoryRescue::from_config`].
    pub async fn with_default_perspectives(
        mut config: RescueConfig,
        llm: LlmConfig,
    ) -> RescueResult<Self> {
        config.perspectives = MemoryCategory::ALL
            .iter()
            .map(|category| PerspectiveConfig {
                category: *category,
                llm: llm.clone(),
            })
            .collect();
        Self::from_config(config).await
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &RescueConfig {
        &self.config
    }

    /// Extract memories from `context` and commit the new, important ones.
    ///
    /// Never fails: perspective and backend trouble degrade to fewer (or no)
    /// memories. Returns only memories this call made durable.
    pub async fn extract_and_commit(&self, context: &str, session: &SessionId) -> Vec<Memory> {
        let mut tally = SessionStats {
            invocations: 1,
            ..SessionStats::default()
        };

        let window = trailing_chars(context, self.config.max_context_chars);
        if window.trim().is_empty() {
            debug!(session = %session, "Empty context, nothing to rescue");
            self.record(session, &tally);
            return Vec::new();
        }

        let extracted = self.fan_out(window, session, &mut tally).await;
        tally.candidates = extracted.len() as u64;

        let pending = self.gate(extracted, &mut tally);
        let pending = self.skip_seen(pending, &mut tally).await;

        let outcomes = join_all(pending.into_iter().map(|memory| self.persist(memory))).await;
        let mut committed = Vec::new();
        for outcome in outcomes {
            match outcome {
                Persisted::Stored(memory) => committed.push(memory),
                Persisted::Duplicate => tally.duplicates += 1,
                Persisted::Failed => tally.failed_commits += 1,
            }
        }
        tally.committed = committed.len() as u64;

        info!(
            session = %session,
            backend = self.backend.name(),
            candidates = tally.candidates,
            gated = tally.gated,
            duplicates = tally.duplicates,
            committed = tally.committed,
            failed_commits = tally.failed_commits,
            failed_perspectives = tally.failed_perspectives,
            "Rescue finished"
        );
        self.record(session, &tally);
        committed
    }

    /// Semantic search over durable memories; empty when the backend fails.
    pub async fn search(&self, query: &str, limit: usize) -> Vec<Memory> {
        match self.backend.search(query, limit).await {
            Ok(hits) => hits.into_iter().map(|hit| hit.memory).collect(),
            Err(err) => {
                warn!(
                    backend = self.backend.name(),
                    unavailable = err.is_unavailable(),
                    error = %err,
                    "Memory search failed"
                );
                Vec::new()
            }
        }
    }

    /// Configuration summary and per-session counters.
    #[must_use]
    pub fn stats(&self) -> RescueStats {
        RescueStats {
            perspectives: self
                .perspectives
                .iter()
                .map(|p| PerspectiveSummary {
                    category: p.category(),
                    model: p.model().to_string(),
                })
                .collect(),
            importance_threshold: self.config.importance_threshold,
            dedup: self.config.dedup,
            backend: self.backend.name(),
            sessions: self
                .sessions
                .iter()
                .map(|entry| (entry.key().to_string(), *entry.value()))
                .collect(),
        }
    }

    /// Counters for one session.
    #[must_use]
    pub fn session_stats(&self, session: &SessionId) -> Option<SessionStats> {
        self.sessions.get(session).map(|entry| *entry.value())
    }

    fn record(&self, session: &SessionId, tally: &SessionStats) {
        self.sessions
            .entry(session.clone())
            .or_default()
            .absorb(tally);
    }

    /// Run every perspective in its own task and stamp provenance on the results.
    ///
    /// Tasks are detached, so an abandoned call leaves them to finish or time out.
    async fn fan_out(
        &self,
        window: &str,
        session: &SessionId,
        tally: &mut SessionStats,
    ) -> Vec<PendingMemory> {
        let context: Arc<str> = Arc::from(window);
        let timeout = Duration::from_secs(self.config.perspective_timeout_secs);

        let handles: Vec<_> = self
            .perspectives
            .iter()
            .map(|perspective| {
                let perspective = Arc::clone(perspective);
                let context = Arc::clone(&context);
                tokio::spawn(async move {
                    tokio::time::timeout(timeout, perspective.extract(&context)).await
                })
            })
            .collect();
        let results = join_all(handles).await;

        let source_timestamp = Utc::now();
        let mut pending = Vec::new();
        for (perspective, result) in self.perspectives.iter().zip(results) {
            let category = perspective.category();
            let candidates: Vec<CandidateMemory> = match result {
                Ok(Ok(candidates)) => candidates,
                Ok(Err(_)) => {
                    warn!(perspective = %category, timeout_secs = timeout.as_secs(), "Perspective timed out");
                    tally.failed_perspectives += 1;
                    continue;
                }
                Err(err) => {
                    warn!(perspective = %category, error = %err, "Perspective task failed");
                    tally.failed_perspectives += 1;
                    continue;
                }
            };

            debug!(perspective = %category, count = candidates.len(), "Perspective returned candidates");
            let provenance = Provenance {
                source_session: session.clone(),
                source_timestamp,
                extraction_model: perspective.model().to_string(),
            };
            for candidate in candidates {
                match PendingMemory::new(candidate, category, provenance.clone()) {
                    Ok(memory) => pending.push(memory),
                    Err(err) => debug!(perspective = %category, error = %err, "Dropped candidate"),
                }
            }
        }
        pending
    }

    /// Importance gate, then collapse repeats within the batch keeping the highest score.
    fn gate(&self, pending: Vec<PendingMemory>, tally: &mut SessionStats) -> Vec<PendingMemory> {
        let threshold = self.config.importance_threshold;
        let mut kept: Vec<PendingMemory> = Vec::with_capacity(pending.len());
        for memory in pending {
            if memory.importance() < threshold {
                debug!(
                    commit_hash = %memory.commit_hash(),
                    importance = memory.importance(),
                    threshold,
                    "Below importance threshold"
                );
                tally.gated += 1;
                continue;
            }

            match kept
                .iter_mut()
                .find(|existing| existing.commit_hash() == memory.commit_hash())
            {
                Some(existing) => {
                    tally.duplicates += 1;
                    if memory.importance() > existing.importance() {
                        *existing = memory;
                    }
                }
                None => kept.push(memory),
            }
        }
        kept
    }

    async fn skip_seen(
        &self,
        pending: Vec<PendingMemory>,
        tally: &mut SessionStats,
    ) -> Vec<PendingMemory> {
        if !self.config.dedup || !self.seen.is_enabled() {
            return pending;
        }
        let mut fresh = Vec::with_capacity(pending.len());
        for memory in pending {
            if self.seen.contains(memory.commit_hash()).await {
                debug!(commit_hash = %memory.commit_hash(), "Seen cache hit");
                tally.duplicates += 1;
            } else {
                fresh.push(memory);
            }
        }
        fresh
    }

    /// Dedup check (when enabled) then commit for one memory.
    async fn persist(&self, memory: PendingMemory) -> Persisted {
        if self.config.dedup {
            match self.backend.deduplicate(memory.commit_hash()).await {
                Ok(true) => {
                    debug!(commit_hash = %memory.commit_hash(), "Already durable");
                    self.seen.remember(memory.commit_hash()).await;
                    return Persisted::Duplicate;
                }
                Ok(false) => {}
                Err(err) => warn!(
                    backend = self.backend.name(),
                    commit_hash = %memory.commit_hash(),
                    unavailable = err.is_unavailable(),
                    error = %err,
                    "Dedup check failed, treating as unseen"
                ),
            }
        }

        let memory = memory.seal(Utc::now());
        match self.backend.commit(&memory).await {
            Ok(CommitOutcome::Stored) => {
                self.seen.remember(memory.commit_hash()).await;
                Persisted::Stored(memory)
            }
            Ok(CommitOutcome::AlreadyPresent) => {
                self.seen.remember(memory.commit_hash()).await;
                Persisted::Duplicate
            }
            Err(err) => {
                warn!(
                    backend = self.backend.name(),
                    commit_hash = %memory.commit_hash(),
                    unavailable = err.is_unavailable(),
                    error = %err,
                    "Commit failed"
                );
                Persisted::Failed
            }
        }
    }
}

enum Persisted {
    Stored(Memory),
    Duplicate,
    Failed,
}

/// Keep the trailing `max_chars` characters of `text`.
fn trailing_chars(text: &str, max_chars: usize) -> &str {
    let total = text.chars().count();
    if total <= max_chars {
        return text;
    }
    text.char_indices()
        .nth(total - max_chars)
        .map_or("", |(start, _)| &text[start..])
}
