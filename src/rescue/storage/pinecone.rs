//! Pinecone backend over the data-plane REST API.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client as ReqwestClient, Method, RequestBuilder};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::warn;

use crate::rescue::core::digest::CommitHash;
use crate::rescue::core::errors::{RescueError, RescueResult, upstream_error};
use crate::rescue::core::memory::Memory;
use crate::rescue::embedding::embedder::Embedder;
use crate::rescue::storage::backend::{CommitOutcome, MemoryBackend, ScoredMemory, StoreFuture};

const SERVICE: &str = "pinecone";
const CREDENTIAL_ENV: &str = "PINECONE_API_KEY";
const API_VERSION: &str = "2024-07";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Pinecone-backed memory store. Vector ids are commit hashes.
pub struct PineconeBackend {
    client: ReqwestClient,
    host: String,
    api_key: String,
    namespace: String,
    embedder: Arc<dyn Embedder>,
}

impl PineconeBackend {
    /// Connect to an index host and check its dimension.
    ///
    /// `api_key` falls back to `PINECONE_API_KEY`.
    ///
    /// # Errors
    /// Returns [`RescueError::MissingCredential`] without a key, a configuration
    /// error if the index cannot be reached, or [`RescueError::DimensionMismatch`].
    pub async fn connect(
        index_host: &str,
        api_key: Option<String>,
        namespace: &str,
        embedder: Arc<dyn Embedder>,
    ) -> RescueResult<Self> {
        let api_key = api_key
            .or_else(|| std::env::var(CREDENTIAL_ENV).ok())
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| RescueError::MissingCredential {
                provider: SERVICE.to_string(),
                env_var: CREDENTIAL_ENV.to_string(),
            })?;
        url::Url::parse(index_host)?;

        let backend = Self {
            client: ReqwestClient::builder().timeout(REQUEST_TIMEOUT).build()?,
            host: index_host.trim_end_matches('/').to_string(),
            api_key,
            namespace: namespace.to_string(),
            embedder,
        };

        let stats: IndexStats = serde_json::from_value(
            Self::send(backend.request(Method::POST, "/describe_index_stats").json(&json!({})))
                .await
                .map_err(|err| {
                    RescueError::InvalidConfig(format!("pinecone index {index_host} unreachable: {err}"))
                })?,
        )?;
        let ndims = backend.embedder.ndims();
        if stats.dimension != ndims {
            return Err(RescueError::DimensionMismatch {
                expected: stats.dimension,
                actual: ndims,
            });
        }
        Ok(backend)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{path}", self.host))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
    }

    async fn send(builder: RequestBuilder) -> RescueResult<Value> {
        let response = builder.send().await?;
        if !response.status().is_success() {
            return Err(upstream_error(SERVICE, response).await);
        }
        Ok(response.json().await?)
    }
}

impl MemoryBackend for PineconeBackend {
    fn commit<'a>(&'a self, memory: &'a Memory) -> StoreFuture<'a, RescueResult<CommitOutcome>> {
        Box::pin(async move {
            if self.deduplicate(memory.commit_hash()).await? {
                return Ok(CommitOutcome::AlreadyPresent);
            }

            let values = self.embedder.embed_text(memory.text()).await?;
            let body = json!({
                "vectors": [{
                    "id": memory.commit_hash().as_str(),
                    "values": values,
                    "metadata": serde_json::to_value(memory)?,
                }],
                "namespace": self.namespace,
            });
            Self::send(self.request(Method::POST, "/vectors/upsert").json(&body))
                .await?;
            Ok(CommitOutcome::Stored)
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
            let vector = self.embedder.embed_text(query).await?;
            let body = json!({
                "vector": vector,
                "topK": limit,
                "includeMetadata": true,
                "namespace": self.namespace,
            });
            let raw = Self::send(self.request(Method::POST, "/query").json(&body)).await?;
            let response: QueryResponse = serde_json::from_value(raw)?;

            let mut results: Vec<ScoredMemory> = response
                .matches
                .into_iter()
                .filter_map(|hit| {
                    let metadata = hit.metadata?;
                    match serde_json::from_value::<Memory>(metadata) {
                        Ok(memory) => Some(ScoredMemory {
                            similarity: hit.score,
                            memory,
                        }),
                        Err(err) => {
                            warn!(id = %hit.id, error = %err, "Skipping unreadable pinecone metadata");
                            None
                        }
                    }
                })
                .collect();
            results.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
            Ok(results)
        })
    }

    fn deduplicate<'a>(&'a self, commit_hash: &'a CommitHash) -> StoreFuture<'a, RescueResult<bool>> {
        Box::pin(async move {
            let builder = self
                .request(Method::GET, "/vectors/fetch")
                .query(&[("ids", commit_hash.as_str()), ("namespace", self.namespace.as_str())]);
            let response: FetchResponse = serde_json::from_value(Self::send(builder).await?)?;
            Ok(response.vectors.contains_key(commit_hash.as_str()))
        })
    }

    fn name(&self) -> &'static str {
        SERVICE
    }
}

#[derive(Debug, Deserialize)]
struct IndexStats {
    dimension: usize,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Debug, Deserialize)]
struct QueryMatch {
    id: String,
    score: f64,
    #[serde(default)]
    metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct FetchResponse {
    #[serde(default)]
    vectors: HashMap<String, Value>,
}
