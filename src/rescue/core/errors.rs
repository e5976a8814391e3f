//! Error types for the rescue pipeline.

use thiserror::Error;

/// Rescue pipeline error type.
#[derive(Debug, Error)]
pub enum RescueError {
    /// Invalid configuration or unsupported values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A provider needs a credential that was not supplied.
    #[error("missing credential for {provider}: set {env_var} or pass an api key")]
    MissingCredential {
        /// Provider that requires the key.
        provider: String,
        /// Environment variable consulted.
        env_var: String,
    },
    /// Embedding dimension disagrees with the collection or the declared size.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension declared by the collection or embedder config.
        expected: usize,
        /// Dimension actually observed.
        actual: usize,
    },
    /// Invalid memory content.
    #[error("invalid memory: {0}")]
    InvalidMemory(String),
    /// Model output could not be read as a list of candidates.
    #[error("malformed model output: {0}")]
    MalformedOutput(String),
    /// Remote endpoint answered with a non-success status.
    #[error("{service} returned status {status}: {body}")]
    Upstream {
        /// Endpoint family (qdrant, pinecone).
        service: &'static str,
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },
    /// A call exceeded its time budget.
    #[error("{0} timed out")]
    Timeout(String),
    /// HTTP transport error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    /// Rig provider client could not be built.
    #[error("rig http client error: {0}")]
    HttpClient(#[from] rig::http_client::Error),
    /// Chat completion call failed.
    #[error("completion error: {0}")]
    Completion(#[from] rig::completion::CompletionError),
    /// Remote embedding call failed.
    #[error("embedding error: {0}")]
    Embedding(#[from] rig::embeddings::EmbeddingError),
    /// Local embedding model could not be loaded or run.
    #[error("local embedding model error: {0}")]
    LocalModel(String),
    /// Blocking task failed to complete.
    #[error("task error: {0}")]
    Task(#[from] tokio::task::JoinError),
    /// `SQLite` storage error (sync).
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// `SQLite` storage error (async).
    #[error("tokio-rusqlite error: {0}")]
    TokioSqlite(#[from] tokio_rusqlite::Error),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// URL parse error.
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RescueError {
    /// Whether this error means a backend or endpoint could not serve the call.
    ///
    /// These are the per-call failures the orchestrator absorbs.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Http(_)
                | Self::Completion(_)
                | Self::Embedding(_)
                | Self::LocalModel(_)
                | Self::Task(_)
                | Self::Upstream { .. }
                | Self::Timeout(_)
                | Self::Sqlite(_)
                | Self::TokioSqlite(_)
                | Self::Io(_)
        )
    }

    /// Whether this error is a construction-time configuration problem.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig(_)
                | Self::MissingCredential { .. }
                | Self::DimensionMismatch { .. }
                | Self::HttpClient(_)
                | Self::Url(_)
        )
    }
}

/// Convenience result alias for rescue operations.
pub type RescueResult<T> = Result<T, RescueError>;

/// Build an [`RescueError::Upstream`] from a failed response, keeping a bounded body excerpt.
pub(crate) async fn upstream_error(service: &'static str, response: reqwest::Response) -> RescueError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let body: String = body.chars().take(512).collect();
    RescueError::Upstream {
        service,
        status,
        body,
    }
}
