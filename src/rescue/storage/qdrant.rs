//! Qdrant backend over the REST API.
//!
//! The collection is provisioned explicitly: declared dimension, cosine distance
//! and a keyword payload index on `commit_hash`. Point ids derive from the commit
//! hash, so concurrent commits of the same text land on one point.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client as ReqwestClient, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::rescue::core::digest::CommitHash;
use crate::rescue::core::errors::{RescueError, RescueResult, upstream_error};
use crate::rescue::core::memory::Memory;
use crate::rescue::embedding::embedder::Embedder;
use crate::rescue::storage::backend::{CommitOutcome, MemoryBackend, ScoredMemory, StoreFuture};

const SERVICE: &str = "qdrant";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Qdrant-backed memory store.
pub struct QdrantBackend {
    client: ReqwestClient,
    collection_url: String,
    api_key: Option<String>,
    embedder: Arc<dyn Embedder>,
}

impl QdrantBackend {
    /// Connect and provision the collection if it does not exist yet.
    ///
    /// # Errors
    /// Returns a configuration error if Qdrant cannot be reached, or
    /// [`RescueError::DimensionMismatch`] if the collection's vector size differs
    /// from the embedder's.
    pub async fn connect(
        url: &str,
        collection: &str,
        api_key: Option<String>,
        embedder: Arc<dyn Embedder>,
    ) -> RescueResult<Self> {
        url::Url::parse(url)?;
        let client = ReqwestClient::builder().timeout(REQUEST_TIMEOUT).build()?;
        let backend = Self {
            client,
            collection_url: format!("{}/collections/{collection}", url.trim_end_matches('/')),
            api_key,
            embedder,
        };
        backend
            .ensure_collection()
            .await
            .map_err(|err| unreachable_at_construction(collection, err))?;
        Ok(backend)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{path}", self.collection_url));
        match &self.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }

    async fn send(builder: RequestBuilder) -> RescueResult<Value> {
        let response = builder.send().await?;
        if !response.status().is_success() {
            return Err(upstream_error(SERVICE, response).await);
        }
        Ok(response.json().await?)
    }

    async fn ensure_collection(&self) -> RescueResult<()> {
        let ndims = self.embedder.ndims();
        let response = self.request(Method::GET, "").send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            Self::send(self.request(Method::PUT, "").json(&json!({
                "vectors": {"size": ndims, "distance": "Cosine"}
            })))
            .await?;
            Self::send(self.request(Method::PUT, "/index").json(&json!({
                "field_name": "commit_hash",
                "field_schema": "keyword"
            })))
            .await?;
            info!(collection = %self.collection_url, ndims, "Created qdrant collection");
            return Ok(());
        }
        if !response.status().is_success() {
            return Err(upstream_error(SERVICE, response).await);
        }

        let info: CollectionInfo = response.json().await?;
        let size = info.result.config.params.vectors.size;
        if size != ndims {
            return Err(RescueError::DimensionMismatch {
                expected: size,
                actual: ndims,
            });
        }
        Ok(())
    }
}

fn unreachable_at_construction(collection: &str, err: RescueError) -> RescueError {
    if err.is_configuration() {
        err
    } else {
        RescueError::InvalidConfig(format!("qdrant collection {collection} unreachable: {err}"))
    }
}

impl MemoryBackend for QdrantBackend {
    fn commit<'a>(&'a self, memory: &'a Memory) -> StoreFuture<'a, RescueResult<CommitOutcome>> {
        Box::pin(async move {
            // Upsert would overwrite an existing payload; keep the first record.
            if self.deduplicate(memory.commit_hash()).await? {
                return Ok(CommitOutcome::AlreadyPresent);
            }

            let vector = self.embedder.embed_text(memory.text()).await?;
            let body = json!({
                "points": [{
                    "id": memory.commit_hash().to_uuid().to_string(),
                    "vector": vector,
                    "payload": serde_json::to_value(memory)?,
                }]
            });
            Self::send(self.request(Method::PUT, "/points?wait=true").json(&body)).await?;
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
            let body = json!({"vector": vector, "limit": limit, "with_payload": true});
            let raw = Self::send(self.request(Method::POST, "/points/search").json(&body)).await?;
            let hits: SearchResponse = serde_json::from_value(raw)?;

            let mut results: Vec<ScoredMemory> = hits
                .result
                .into_iter()
                .filter_map(|hit| match serde_json::from_value::<Memory>(hit.payload) {
                    Ok(memory) => Some(ScoredMemory {
                        similarity: hit.score,
                        memory,
                    }),
                    Err(err) => {
                        warn!(error = %err, "Skipping unreadable qdrant payload");
                        None
                    }
                })
                .collect();
            results.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
            Ok(results)
        })
    }

    fn deduplicate<'a>(&'a self, commit_hash: &'a CommitHash) -> StoreFuture<'a, RescueResult<bool>> {
        Box::pin(async move {
            let body = json!({
                "filter": {"must": [{"key": "commit_hash", "match": {"value": commit_hash.as_str()}}]},
                "limit": 1,
                "with_payload": false,
                "with_vector": false
            });
            let raw = Self::send(self.request(Method::POST, "/points/scroll").json(&body)).await?;
            let scroll: ScrollResponse = serde_json::from_value(raw)?;
            Ok(!scroll.result.points.is_empty())
        })
    }

    fn name(&self) -> &'static str {
        SERVICE
    }
}

#[derive(Debug, Deserialize)]
struct CollectionInfo {
    result: CollectionResult,
}

#[derive(Debug, Deserialize)]
struct CollectionResult {
    config: CollectionConfig,
}

#[derive(Debug, Deserialize)]
struct CollectionConfig {
    params: CollectionParams,
}

#[derive(Debug, Deserialize)]
struct CollectionParams {
    vectors: VectorParams,
}

#[derive(Debug, Deserialize)]
struct VectorParams {
    size: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    score: f64,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Deserialize)]
struct ScrollResponse {
    result: ScrollResult,
}

#[derive(Debug, Deserialize)]
struct ScrollResult {
    #[serde(default)]
    points: Vec<Value>,
}
