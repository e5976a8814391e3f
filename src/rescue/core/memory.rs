//! Memory records and the candidates they are built from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::rescue::core::category::MemoryCategory;
use crate::rescue::core::digest::CommitHash;
use crate::rescue::core::errors::{RescueError, RescueResult};
use crate::rescue::core::ids::SessionId;

/// Lowest importance a model may report.
pub const MIN_IMPORTANCE: u8 = 1;
/// Highest importance a model may report.
pub const MAX_IMPORTANCE: u8 = 10;
/// Importance assumed when the model omits one.
pub const DEFAULT_IMPORTANCE: u8 = 5;

/// Clamp a raw importance into `1..=10`.
#[must_use]
pub fn clamp_importance(raw: i64) -> u8 {
    let clamped = raw.clamp(i64::from(MIN_IMPORTANCE), i64::from(MAX_IMPORTANCE));
    u8::try_from(clamped).unwrap_or(DEFAULT_IMPORTANCE)
}

/// A memory proposed by a perspective, before provenance and gating.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CandidateMemory {
    /// Self-contained statement.
    pub text: String,
    /// Self-reported importance, already clamped to `1..=10`.
    pub importance: u8,
    /// Optional refinement of the category.
    pub subcategory: Option<String>,
}

impl CandidateMemory {
    /// Create a candidate with the given importance.
    #[must_use]
    pub fn new(text: impl Into<String>, importance: u8) -> Self {
        Self {
            text: text.into(),
            importance: importance.clamp(MIN_IMPORTANCE, MAX_IMPORTANCE),
            subcategory: None,
        }
    }

    /// Attach a subcategory tag.
    #[must_use]
    pub fn with_subcategory(mut self, subcategory: impl Into<String>) -> Self {
        self.subcategory = Some(subcategory.into());
        self
    }
}

/// Provenance stamped by the orchestrator at extraction time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Provenance {
    /// Session the context came from.
    pub source_session: SessionId,
    /// When the extraction ran.
    pub source_timestamp: DateTime<Utc>,
    /// Model identifier of the producing perspective.
    pub extraction_model: String,
}

#[cfg(test)]
impl Provenance {
    /// Provenance for the current instant.
    pub(crate) fn now(source_session: SessionId, extraction_model: impl Into<String>) -> Self {
        Self {
            source_session,
            source_timestamp: Utc::now(),
            extraction_model: extraction_model.into(),
        }
    }
}

/// A tagged candidate travelling through the gate and dedup stages.
#[derive(Clone, Debug)]
pub struct PendingMemory {
    text: String,
    category: MemoryCategory,
    importance: u8,
    subcategory: Option<String>,
    provenance: Provenance,
    commit_hash: CommitHash,
}

impl PendingMemory {
    /// Tag a candidate with its category and provenance.
    ///
    /// # Errors
    /// Returns an error if the text is empty after trimming.
    pub fn new(
        candidate: CandidateMemory,
        category: MemoryCategory,
        provenance: Provenance,
    ) -> RescueResult<Self> {
        let text = candidate.text.trim();
        if text.is_empty() {
            return Err(RescueError::InvalidMemory("text is empty".to_string()));
        }
        let subcategory = candidate
            .subcategory
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Ok(Self {
            commit_hash: CommitHash::of(text),
            text: text.to_string(),
            category,
            importance: candidate.importance.clamp(MIN_IMPORTANCE, MAX_IMPORTANCE),
            subcategory,
            provenance,
        })
    }

    /// Statement text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Category of the producing perspective.
    #[must_use]
    pub const fn category(&self) -> MemoryCategory {
        self.category
    }

    /// Self-reported importance.
    #[must_use]
    pub const fn importance(&self) -> u8 {
        self.importance
    }

    /// Content hash of the text.
    #[must_use]
    pub const fn commit_hash(&self) -> &CommitHash {
        &self.commit_hash
    }

    /// Seal into an immutable memory stamped with its persistence time.
    #[must_use]
    pub fn seal(self, committed_at: DateTime<Utc>) -> Memory {
        Memory {
            text: self.text,
            category: self.category,
            importance: self.importance,
            subcategory: self.subcategory,
            source_session: self.provenance.source_session,
            source_timestamp: self.provenance.source_timestamp,
            extraction_model: self.provenance.extraction_model,
            commit_hash: self.commit_hash,
            committed_at,
        }
    }
}

/// A rescued unit of knowledge.
///
/// Immutable: fields are only readable, and the commit hash is always derived
/// from the text (including when a record is read back from a backend).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StoredMemory")]
pub struct Memory {
    text: String,
    category: MemoryCategory,
    importance: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    subcategory: Option<String>,
    source_session: SessionId,
    source_timestamp: DateTime<Utc>,
    extraction_model: String,
    commit_hash: CommitHash,
    committed_at: DateTime<Utc>,
}

impl Memory {
    /// Build a memory directly, stamping `committed_at` with the current time.
    ///
    /// # Errors
    /// Returns an error if the text is empty after trimming.
    pub fn new(
        candidate: CandidateMemory,
        category: MemoryCategory,
        provenance: Provenance,
    ) -> RescueResult<Self> {
        Ok(PendingMemory::new(candidate, category, provenance)?.seal(Utc::now()))
    }

    /// Statement text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Category of the producing perspective.
    #[must_use]
    pub const fn category(&self) -> MemoryCategory {
        self.category
    }

    /// Self-reported importance in `1..=10`.
    #[must_use]
    pub const fn importance(&self) -> u8 {
        self.importance
    }

    /// Optional subcategory tag.
    #[must_use]
    pub fn subcategory(&self) -> Option<&str> {
        self.subcategory.as_deref()
    }

    /// Session the memory was rescued from.
    #[must_use]
    pub const fn source_session(&self) -> &SessionId {
        &self.source_session
    }

    /// Extraction time.
    #[must_use]
    pub const fn source_timestamp(&self) -> DateTime<Utc> {
        self.source_timestamp
    }

    /// Model that produced the memory.
    #[must_use]
    pub fn extraction_model(&self) -> &str {
        &self.extraction_model
    }

    /// Content hash of the text (dedup key).
    #[must_use]
    pub const fn commit_hash(&self) -> &CommitHash {
        &self.commit_hash
    }

    /// Persistence time.
    #[must_use]
    pub const fn committed_at(&self) -> DateTime<Utc> {
        self.committed_at
    }
}

/// Wire shape accepted when reading a memory back from storage.
#[derive(Deserialize)]
struct StoredMemory {
    text: String,
    category: MemoryCategory,
    #[serde(default)]
    importance: Option<i64>,
    #[serde(default)]
    subcategory: Option<String>,
    #[serde(default)]
    source_session: SessionId,
    source_timestamp: DateTime<Utc>,
    #[serde(default)]
    extraction_model: String,
    committed_at: DateTime<Utc>,
}

impl TryFrom<StoredMemory> for Memory {
    type Error = RescueError;

    fn try_from(stored: StoredMemory) -> Result<Self, Self::Error> {
        let text = stored.text.trim().to_string();
        if text.is_empty() {
            return Err(RescueError::InvalidMemory("stored text is empty".to_string()));
        }
        Ok(Self {
            commit_hash: CommitHash::of(&text),
            text,
            category: stored.category,
            importance: stored
                .importance
                .map_or(DEFAULT_IMPORTANCE, clamp_importance),
            subcategory: stored.subcategory.filter(|s| !s.is_empty()),
            source_session: stored.source_session,
            source_timestamp: stored.source_timestamp,
            extraction_model: stored.extraction_model,
            committed_at: stored.committed_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provenance() -> Provenance {
        Provenance::now(SessionId::from("session-1"), "cerebras/llama-3.3-70b")
    }

    #[test]
    fn test_hash_ignores_category() {
        let fact = Memory::new(
            CandidateMemory::new("Service Foo uses key sk-TEST1234", 9),
            MemoryCategory::Fact,
            provenance(),
        )
        .unwrap();
        let skill = Memory::new(
            CandidateMemory::new("Service Foo uses key sk-TEST1234", 4),
            MemoryCategory::Skill,
            provenance(),
        )
        .unwrap();

        assert_eq!(fact.commit_hash(), skill.commit_hash());
        assert_ne!(fact.category(), skill.category());
    }

    #[test]
    fn test_text_is_trimmed_before_hashing() {
        let memory = Memory::new(
            CandidateMemory::new("  padded  ", 7),
            MemoryCategory::Fact,
            provenance(),
        )
        .unwrap();
        assert_eq!(memory.text(), "padded");
        assert_eq!(memory.commit_hash(), &CommitHash::of("padded"));
    }

    #[test]
    fn test_empty_text_rejected() {
        let result = Memory::new(CandidateMemory::new("   ", 7), MemoryCategory::Fact, provenance());
        assert!(matches!(result, Err(RescueError::InvalidMemory(_))));
    }

    #[test]
    fn test_importance_clamped() {
        assert_eq!(CandidateMemory::new("x", 0).importance, 1);
        assert_eq!(CandidateMemory::new("x", 42).importance, 10);
        assert_eq!(clamp_importance(-3), 1);
        assert_eq!(clamp_importance(11), 10);
        assert_eq!(clamp_importance(8), 8);
    }

    #[test]
    fn test_blank_subcategory_dropped() {
        let memory = Memory::new(
            CandidateMemory::new("fact", 7).with_subcategory("  "),
            MemoryCategory::Fact,
            provenance(),
        )
        .unwrap();
        assert_eq!(memory.subcategory(), None);
    }

    #[test]
    fn test_restore_recomputes_hash() {
        let memory = Memory::new(
            CandidateMemory::new("Chose Postgres over Mongo for ACID", 8).with_subcategory("tool_choice"),
            MemoryCategory::Decision,
            provenance(),
        )
        .unwrap();

        let mut payload = serde_json::to_value(&memory).unwrap();
        payload["commit_hash"] = serde_json::Value::String("tampered".to_string());
        let restored: Memory = serde_json::from_value(payload).unwrap();

        assert_eq!(restored.commit_hash(), memory.commit_hash());
        assert_eq!(restored.subcategory(), Some("tool_choice"));
        assert_eq!(restored.source_session().as_str(), "session-1");
    }

    #[test]
    fn test_restore_tolerates_sparse_payload() {
        let restored: Memory = serde_json::from_value(serde_json::json!({
            "text": "Deploys run from the release branch",
            "category": "skill",
            "importance": 15,
            "source_timestamp": "2026-03-01T12:00:00Z",
            "committed_at": "2026-03-01T12:00:05Z"
        }))
        .unwrap();
        assert_eq!(restored.importance(), 10);
        assert_eq!(restored.extraction_model(), "");
        assert_eq!(restored.source_timestamp().to_rfc3339(), "2026-03-01T12:00:00+00:00");
    }

    #[test]
    fn test_restore_requires_timestamps() {
        let missing_both = serde_json::json!({
            "text": "Deploys run from the release branch",
            "category": "skill",
            "importance": 8
        });
        assert!(serde_json::from_value::<Memory>(missing_both).is_err());

        let missing_commit = serde_json::json!({
            "text": "Deploys run from the release branch",
            "category": "skill",
            "source_timestamp": "2026-03-01T12:00:00Z"
        });
        assert!(serde_json::from_value::<Memory>(missing_commit).is_err());
    }
}
