//! Embedded store: one `SQLite` file with a sqlite-vec `vec0` table.

use std::path::Path;
use std::sync::Arc;

use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;
use tracing::{debug, warn};

use crate::rescue::core::digest::CommitHash;
use crate::rescue::core::errors::{RescueError, RescueResult};
use crate::rescue::core::memory::Memory;
use crate::rescue::embedding::embedder::Embedder;
use crate::rescue::storage::backend::{CommitOutcome, MemoryBackend, ScoredMemory, StoreFuture};
use crate::rescue::storage::sqlite_vec_loader::init_sqlite_vec_extension;

/// `SQLite` + sqlite-vec memory store.
pub struct EmbeddedBackend {
    conn: Connection,
    embedder: Arc<dyn Embedder>,
    table: String,
}

impl EmbeddedBackend {
    /// Open (or create) the store at `path`, using `collection` as table name.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened, the schema cannot be created,
    /// or the collection was created with a different embedding dimension.
    pub async fn open(
        path: impl AsRef<Path>,
        collection: &str,
        embedder: Arc<dyn Embedder>,
    ) -> RescueResult<Self> {
        init_sqlite_vec_extension();

        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).await?;

        let table = collection.to_string();
        let ndims = embedder.ndims();
        let stored_dims = {
            let table = table.clone();
            conn.call(move |conn| {
                conn.execute_batch(&format!(
                    "CREATE TABLE IF NOT EXISTS \"{table}_meta\" (
                        key TEXT PRIMARY KEY,
                        value TEXT NOT NULL
                    );
                    CREATE TABLE IF NOT EXISTS \"{table}\" (
                        id INTEGER PRIMARY KEY,
                        commit_hash TEXT NOT NULL UNIQUE,
                        category TEXT NOT NULL,
                        importance INTEGER NOT NULL,
                        memory_json TEXT NOT NULL
                    );"
                ))?;
                let stored: Option<String> = conn
                    .query_row(
                        &format!("SELECT value FROM \"{table}_meta\" WHERE key = 'ndims'"),
                        [],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(stored)
            })
            .await?
        };

        match stored_dims.map(|raw| raw.parse::<usize>()) {
            Some(Ok(existing)) if existing != ndims => {
                return Err(RescueError::DimensionMismatch {
                    expected: existing,
                    actual: ndims,
                });
            }
            Some(Err(_)) => {
                return Err(RescueError::InvalidConfig(format!(
                    "collection {table} has an unreadable dimension record"
                )));
            }
            Some(Ok(_)) | None => {}
        }

        {
            let table = table.clone();
            conn.call(move |conn| {
                conn.execute_batch(&format!(
                    "CREATE VIRTUAL TABLE IF NOT EXISTS \"{table}_vec\" USING vec0(embedding float[{ndims}]);"
                ))?;
                conn.execute(
                    &format!(
                        "INSERT INTO \"{table}_meta\" (key, value) VALUES ('ndims', ?1)
                         ON CONFLICT(key) DO NOTHING"
                    ),
                    rusqlite::params![ndims.to_string()],
                )?;
                Ok(())
            })
            .await?;
        }

        debug!(table = %table, ndims, "Opened embedded memory store");
        Ok(Self {
            conn,
            embedder,
            table,
        })
    }

    /// Number of stored memories.
    #[cfg(test)]
    pub(crate) async fn count(&self) -> RescueResult<u64> {
        let table = self.table.clone();
        let count = self
            .conn
            .call(move |conn| {
                let count: i64 =
                    conn.query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| {
                        row.get(0)
                    })?;
                Ok(count)
            })
            .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }
}

impl MemoryBackend for EmbeddedBackend {
    fn commit<'a>(&'a self, memory: &'a Memory) -> StoreFuture<'a, RescueResult<CommitOutcome>> {
        Box::pin(async move {
            let embedding = self.embedder.embed_text(memory.text()).await?;
            let embedding_json = serde_json::to_string(&embedding)?;
            let memory_json = serde_json::to_string(memory)?;
            let commit_hash = memory.commit_hash().to_string();
            let category = memory.category().as_str().to_string();
            let importance = i64::from(memory.importance());
            let table = self.table.clone();

            let inserted = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    let inserted = tx.execute(
                        &format!(
                            "INSERT INTO \"{table}\" (commit_hash, category, importance, memory_json)
                             VALUES (?1, ?2, ?3, ?4)
                             ON CONFLICT(commit_hash) DO NOTHING"
                        ),
                        rusqlite::params![commit_hash, category, importance, memory_json],
                    )?;
                    if inserted == 1 {
                        let rowid = tx.last_insert_rowid();
                        tx.execute(
                            &format!(
                                "INSERT INTO \"{table}_vec\" (rowid, embedding) VALUES (?1, ?2)"
                            ),
                            rusqlite::params![rowid, embedding_json],
                        )?;
                    }
                    tx.commit()?;
                    Ok(inserted == 1)
                })
                .await?;

            Ok(if inserted {
                CommitOutcome::Stored
            } else {
                CommitOutcome::AlreadyPresent
            })
        })
    }

    fn search<'a>(
        &'a self,
        query: &'a str,
        limit: usize,
    ) -> StoreFuture<'a, RescueResult<Vec<ScoredMemory>>> {
        Box::pin(async move {
            if limit == 0 {
                return Ok(Vec::new());
            }
            let embedding = self.embedder.embed_text(query).await?;
            let embedding_json = serde_json::to_string(&embedding)?;
            let k = i64::try_from(limit).unwrap_or(i64::MAX);
            let table = self.table.clone();

            let rows = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "WITH knn AS (
                            SELECT rowid, distance FROM \"{table}_vec\"
                            WHERE embedding MATCH ?1 AND k = ?2
                        )
                        SELECT m.memory_json, knn.distance
                        FROM knn JOIN \"{table}\" m ON m.id = knn.rowid
                        ORDER BY knn.distance"
                    ))?;
                    let rows = stmt
                        .query_map(rusqlite::params![embedding_json, k], |row| {
                            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
                        })?
                        .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                    Ok(rows)
                })
                .await?;

            let mut results = Vec::with_capacity(rows.len());
            for (memory_json, distance) in rows {
                match serde_json::from_str::<Memory>(&memory_json) {
                    // Vectors are unit length, so cosine = 1 - d^2 / 2.
                    Ok(memory) => results.push(ScoredMemory {
                        similarity: 1.0 - distance * distance / 2.0,
                        memory,
                    }),
                    Err(err) => warn!(table = %self.table, error = %err, "Skipping unreadable memory row"),
                }
            }
            Ok(results)
        })
    }

    fn deduplicate<'a>(&'a self, commit_hash: &'a CommitHash) -> StoreFuture<'a, RescueResult<bool>> {
        Box::pin(async move {
            let hash = commit_hash.to_string();
            let table = self.table.clone();
            let exists = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT 1 FROM \"{table}\" WHERE commit_hash = ?1 LIMIT 1"
                    ))?;
                    let mut rows = stmt.query(rusqlite::params![hash])?;
                    Ok(rows.next()?.is_some())
                })
                .await?;
            Ok(exists)
        })
    }

    fn name(&self) -> &'static str {
        "embedded"
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::rescue::core::category::MemoryCategory;
    use crate::rescue::core::ids::SessionId;
    use crate::rescue::core::memory::{CandidateMemory, Provenance};
    use crate::rescue::core::config::RescueConfig;
    use crate::rescue::embedding::embedder::EmbedFuture;
    use crate::rescue::embedding::test_support::TokenEmbedder;
    use crate::rescue::engine::MemoryRescue;
    use crate::rescue::extract::perspective::{ExtractFuture, Perspective};

    struct DownEmbedder;

    impl Embedder for DownEmbedder {
        fn embed_text(&self, _text: &str) -> EmbedFuture<'_, RescueResult<Vec<f32>>> {
            Box::pin(async {
                Err::<Vec<f32>, _>(RescueError::LocalModel("inference session crashed".to_string()))
            })
        }

        fn ndims(&self) -> usize {
            16
        }
    }

    struct OneFact;

    impl Perspective for OneFact {
        fn category(&self) -> MemoryCategory {
            MemoryCategory::Fact
        }

        fn model(&self) -> &str {
            "test-model"
        }

        fn extract<'a>(&'a self, _context: &'a str) -> ExtractFuture<'a, Vec<CandidateMemory>> {
            Box::pin(async { vec![CandidateMemory::new("Service Foo uses API key sk-TEST1234", 9)] })
        }
    }

    fn memory(text: &str, category: MemoryCategory) -> Memory {
        Memory::new(
            CandidateMemory::new(text, 8),
            category,
            Provenance::now(SessionId::from("session-embedded"), "test-model"),
        )
        .unwrap()
    }

    async fn open(dir: &TempDir, ndims: usize) -> RescueResult<EmbeddedBackend> {
        let embedder = Arc::new(TokenEmbedder::new(ndims));
        EmbeddedBackend::open(dir.path().join("memories.sqlite"), "agent_memory", embedder).await
    }

    #[tokio::test]
    async fn test_commit_then_deduplicate() {
        let dir = TempDir::new().unwrap();
        let backend = open(&dir, 64).await.unwrap();
        let memory = memory("Service Foo uses API key sk-TEST1234", MemoryCategory::Fact);

        assert!(!backend.deduplicate(memory.commit_hash()).await.unwrap());
        assert_eq!(backend.commit(&memory).await.unwrap(), CommitOutcome::Stored);
        assert!(backend.deduplicate(memory.commit_hash()).await.unwrap());
    }

    #[tokio::test]
    async fn test_recommit_does_not_duplicate() {
        let dir = TempDir::new().unwrap();
        let backend = open(&dir, 64).await.unwrap();
        let fact = memory("Deploy target is eu-west-1", MemoryCategory::Fact);
        let same_text = memory("Deploy target is eu-west-1", MemoryCategory::Decision);

        assert_eq!(backend.commit(&fact).await.unwrap(), CommitOutcome::Stored);
        assert_eq!(
            backend.commit(&same_text).await.unwrap(),
            CommitOutcome::AlreadyPresent
        );
        assert_eq!(backend.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_commits_converge() {
        let dir = TempDir::new().unwrap();
        let backend = open(&dir, 64).await.unwrap();
        let first = memory("Retry webhooks with a fresh idempotency key", MemoryCategory::Skill);
        let second = first.clone();

        let (a, b) = tokio::join!(backend.commit(&first), backend.commit(&second));
        let outcomes = [a.unwrap(), b.unwrap()];
        assert_eq!(
            outcomes.iter().filter(|o| **o == CommitOutcome::Stored).count(),
            1
        );
        assert_eq!(backend.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_search_orders_by_similarity() {
        let dir = TempDir::new().unwrap();
        let backend = open(&dir, 256).await.unwrap();
        for text in [
            "Chose Postgres over Mongo because payment records need ACID transactions",
            "Retry webhooks with a fresh idempotency key",
            "Staging URL is https://staging.example.com",
        ] {
            backend.commit(&memory(text, MemoryCategory::Decision)).await.unwrap();
        }

        let hits = backend.search("why postgres for payment transactions", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].memory.text().contains("Postgres"));
        assert!(hits[0].similarity >= hits[1].similarity);
        assert!(backend.search("anything", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reopen_keeps_data_and_checks_dimension() {
        let dir = TempDir::new().unwrap();
        let memory = memory("Version pinned to 2.4.1", MemoryCategory::Fact);
        {
            let backend = open(&dir, 32).await.unwrap();
            backend.commit(&memory).await.unwrap();
        }

        let reopened = open(&dir, 32).await.unwrap();
        assert!(reopened.deduplicate(memory.commit_hash()).await.unwrap());

        assert!(matches!(
            open(&dir, 48).await,
            Err(RescueError::DimensionMismatch {
                expected: 32,
                actual: 48
            })
        ));
    }

    #[tokio::test]
    async fn test_unavailable_embedder_surfaces_errors() {
        let dir = TempDir::new().unwrap();
        let backend = EmbeddedBackend::open(
            dir.path().join("memories.sqlite"),
            "agent_memory",
            Arc::new(DownEmbedder),
        )
        .await
        .unwrap();
        let memory = memory("Staging URL is https://staging.example.com", MemoryCategory::Fact);

        let err = backend.commit(&memory).await.unwrap_err();
        assert!(err.is_unavailable());
        assert!(backend.search("staging", 3).await.unwrap_err().is_unavailable());
        assert!(!backend.deduplicate(memory.commit_hash()).await.unwrap());
        assert_eq!(backend.count().await.unwrap(), 0);

        let rescue = MemoryRescue::new(
            RescueConfig::default(),
            vec![Arc::new(OneFact) as Arc<dyn Perspective>],
            Arc::new(backend),
        )
        .unwrap();
        let session = SessionId::from("session-embedded");
        assert!(rescue.search("staging", 3).await.is_empty());
        assert!(rescue.extract_and_commit("ctx", &session).await.is_empty());
        assert_eq!(rescue.session_stats(&session).unwrap().failed_commits, 1);
    }
}
