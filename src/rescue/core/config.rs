//! Configuration for the rescue pipeline.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::rescue::core::category::MemoryCategory;
use crate::rescue::core::errors::{RescueError, RescueResult};
use crate::rescue::core::memory::{MAX_IMPORTANCE, MIN_IMPORTANCE};

/// Default fast extraction model.
pub const DEFAULT_MODEL: &str = "cerebras/llama-3.3-70b";

/// Default cap on candidates kept from one perspective call.
pub const DEFAULT_MAX_ITEMS_PER_PERSPECTIVE: usize = 64;

/// Default local embedding model.
pub const DEFAULT_LOCAL_EMBEDDING_MODEL: &str = "bge-small-en-v1.5";

/// Default remote embedding model.
pub const DEFAULT_REMOTE_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Top-level configuration for the rescue engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RescueConfig {
    /// Minimum importance a candidate needs to be committed.
    pub importance_threshold: u8,
    /// Context longer than this keeps only its trailing window (in characters).
    pub max_context_chars: usize,
    /// Per-perspective time budget.
    pub perspective_timeout_secs: u64,
    /// Consult the backend for existing hashes before committing.
    pub dedup: bool,
    /// Capacity of the recently-seen hash cache; 0 disables it.
    pub seen_cache_capacity: usize,
    /// Maximum candidates kept from one perspective call.
    pub max_items_per_perspective: usize,
    /// Perspectives to run, in order.
    pub perspectives: Vec<PerspectiveConfig>,
    /// Embedding model settings.
    pub embedding: EmbeddingConfig,
    /// Storage backend selection.
    pub backend: BackendConfig,
}

impl Default for RescueConfig {
    fn default() -> Self {
        let llm = LlmConfig::default();
        Self {
            importance_threshold: 7,
            max_context_chars: 100_000,
            perspective_timeout_secs: 60,
            dedup: true,
            seen_cache_capacity: 4096,
            max_items_per_perspective: DEFAULT_MAX_ITEMS_PER_PERSPECTIVE,
            perspectives: MemoryCategory::ALL
                .iter()
                .map(|category| PerspectiveConfig {
                    category: *category,
                    llm: llm.clone(),
                })
                .collect(),
            embedding: EmbeddingConfig::default(),
            backend: BackendConfig::default(),
        }
    }
}

impl RescueConfig {
    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> RescueResult<()> {
        if !(MIN_IMPORTANCE..=MAX_IMPORTANCE).contains(&self.importance_threshold) {
            return Err(RescueError::InvalidConfig(format!(
                "importance_threshold must be in {MIN_IMPORTANCE}..={MAX_IMPORTANCE}"
            )));
        }

        if self.max_context_chars == 0 {
            return Err(RescueError::InvalidConfig(
                "max_context_chars must be > 0".to_string(),
            ));
        }

        if self.perspective_timeout_secs == 0 {
            return Err(RescueError::InvalidConfig(
                "perspective_timeout_secs must be > 0".to_string(),
            ));
        }

        if self.max_items_per_perspective == 0 {
            return Err(RescueError::InvalidConfig(
                "max_items_per_perspective must be > 0".to_string(),
            ));
        }

        if self.perspectives.is_empty() {
            return Err(RescueError::InvalidConfig(
                "at least one perspective must be configured".to_string(),
            ));
        }

        for perspective in &self.perspectives {
            perspective.llm.validate()?;
        }

        self.embedding.validate()?;
        self.backend.validate()
    }

    /// Build a configuration from `RESCUE_*` environment variables over the defaults.
    ///
    /// # Errors
    /// Returns an error if a variable holds an unparseable value.
    pub fn from_env() -> RescueResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup over the defaults.
    ///
    /// # Errors
    /// Returns an error if a value cannot be parsed.
    pub fn from_lookup<F>(lookup: F) -> RescueResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        let mut llm = LlmConfig::default();
        if let Some(model) = lookup("RESCUE_MODEL") {
            llm.model = model;
        }
        llm.api_base = lookup("RESCUE_API_BASE");
        llm.api_key = lookup("RESCUE_API_KEY");
        if let Some(timeout) = lookup("RESCUE_LLM_TIMEOUT_SECS") {
            llm.timeout_secs = parse_value("RESCUE_LLM_TIMEOUT_SECS", &timeout)?;
        }

        let categories = match lookup("RESCUE_PERSPECTIVES") {
            Some(raw) => raw
                .split(',')
                .filter(|part| !part.trim().is_empty())
                .map(|part| {
                    MemoryCategory::from_str(part)
                        .map_err(|err| RescueError::InvalidConfig(err.to_string()))
                })
                .collect::<RescueResult<Vec<_>>>()?,
            None => MemoryCategory::ALL.to_vec(),
        };
        config.perspectives = categories
            .into_iter()
            .map(|category| {
                let mut perspective_llm = llm.clone();
                let key = format!("RESCUE_{}_MODEL", category.as_str().to_ascii_uppercase());
                if let Some(model) = lookup(&key) {
                    perspective_llm.model = model;
                }
                PerspectiveConfig {
                    category,
                    llm: perspective_llm,
                }
            })
            .collect();

        if let Some(value) = lookup("RESCUE_IMPORTANCE_THRESHOLD") {
            config.importance_threshold = parse_value("RESCUE_IMPORTANCE_THRESHOLD", &value)?;
        }
        if let Some(value) = lookup("RESCUE_MAX_CONTEXT_CHARS") {
            config.max_context_chars = parse_value("RESCUE_MAX_CONTEXT_CHARS", &value)?;
        }
        if let Some(value) = lookup("RESCUE_TIMEOUT_SECS") {
            config.perspective_timeout_secs = parse_value("RESCUE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = lookup("RESCUE_DEDUP") {
            config.dedup = parse_value("RESCUE_DEDUP", &value)?;
        }
        if let Some(value) = lookup("RESCUE_SEEN_CACHE_CAPACITY") {
            config.seen_cache_capacity = parse_value("RESCUE_SEEN_CACHE_CAPACITY", &value)?;
        }

        if let Some(provider) = lookup("RESCUE_EMBEDDING_PROVIDER") {
            config.embedding.provider = match provider.trim().to_ascii_lowercase().as_str() {
                "local" | "fastembed" => EmbeddingProvider::Local,
                "openai" => EmbeddingProvider::OpenAi,
                other => {
                    return Err(RescueError::InvalidConfig(format!(
                        "unknown embedding provider: {other}"
                    )));
                }
            };
        }
        match lookup("RESCUE_EMBEDDING_MODEL") {
            Some(model) => config.embedding.model = model,
            None if config.embedding.provider == EmbeddingProvider::OpenAi => {
                config.embedding.model = DEFAULT_REMOTE_EMBEDDING_MODEL.to_string();
            }
            None => {}
        }
        if let Some(value) = lookup("RESCUE_EMBEDDING_DIMS") {
            config.embedding.ndims = parse_value("RESCUE_EMBEDDING_DIMS", &value)?;
        }
        config.embedding.base_url = lookup("RESCUE_EMBEDDING_BASE_URL");
        config.embedding.api_key = lookup("RESCUE_EMBEDDING_API_KEY");
        config.embedding.cache_dir = lookup("RESCUE_EMBEDDING_CACHE_DIR").map(PathBuf::from);

        let collection = lookup("RESCUE_COLLECTION").unwrap_or_else(|| DEFAULT_COLLECTION.to_string());
        config.backend = match lookup("RESCUE_BACKEND").as_deref().map(str::trim) {
            None | Some("embedded" | "sqlite") => BackendConfig::Embedded {
                path: lookup("RESCUE_SQLITE_PATH")
                    .map_or_else(|| PathBuf::from("rescue.sqlite"), PathBuf::from),
                collection,
            },
            Some("qdrant") => BackendConfig::Qdrant {
                url: lookup("RESCUE_QDRANT_URL")
                    .unwrap_or_else(|| "http://localhost:6333".to_string()),
                collection,
                api_key: lookup("QDRANT_API_KEY"),
            },
            Some("pinecone") => BackendConfig::Pinecone {
                index_host: lookup("RESCUE_PINECONE_HOST").ok_or_else(|| {
                    RescueError::InvalidConfig("RESCUE_PINECONE_HOST is required".to_string())
                })?,
                api_key: lookup("PINECONE_API_KEY"),
                namespace: lookup("RESCUE_PINECONE_NAMESPACE").unwrap_or_default(),
            },
            Some(other) => {
                return Err(RescueError::InvalidConfig(format!("unknown backend: {other}")));
            }
        };

        Ok(config)
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> RescueResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| RescueError::InvalidConfig(format!("{key} has an invalid value: {raw}")))
}

/// One configured extraction perspective.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PerspectiveConfig {
    /// Category this perspective extracts.
    pub category: MemoryCategory,
    /// Inference endpoint for this perspective.
    pub llm: LlmConfig,
}

/// Chat-completion endpoint settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Model identifier, optionally prefixed with a provider (`groq/`, `ollama/`, ...).
    pub model: String,
    /// Override for the API base URL.
    pub api_base: Option<String>,
    /// Override for the credential.
    pub api_key: Option<String>,
    /// Sampling temperature.
    pub temperature: f64,
    /// Completion token cap.
    pub max_tokens: u64,
    /// HTTP timeout for one call.
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            api_base: None,
            api_key: None,
            temperature: 0.2,
            max_tokens: 4096,
            timeout_secs: 60,
        }
    }
}

impl LlmConfig {
    /// Config for a given model with default sampling.
    #[must_use]
    pub fn for_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    /// Validate endpoint settings.
    ///
    /// # Errors
    /// Returns an error if the model is empty or the base URL is invalid.
    pub fn validate(&self) -> RescueResult<()> {
        if self.model.trim().is_empty() {
            return Err(RescueError::InvalidConfig("llm.model must not be empty".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(RescueError::InvalidConfig(
                "llm.timeout_secs must be > 0".to_string(),
            ));
        }
        if let Some(base) = &self.api_base {
            Url::parse(base)?;
        }
        Ok(())
    }
}

/// Where embeddings come from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProvider {
    /// Local ONNX model through fastembed; downloads weights once, then runs offline.
    Local,
    /// OpenAI-compatible `/embeddings` endpoint.
    OpenAi,
}

/// Embedding model settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Embedding source.
    pub provider: EmbeddingProvider,
    /// Model name: a fastembed model for `Local`, a remote model id for `OpenAi`.
    pub model: String,
    /// Embedding vector dimensions; must match the model.
    pub ndims: usize,
    /// Optional custom base URL.
    pub base_url: Option<String>,
    /// Optional credential; falls back to `OPENAI_API_KEY`.
    pub api_key: Option<String>,
    /// HTTP timeout for one call.
    pub timeout_secs: u64,
    /// Where local model weights are cached.
    pub cache_dir: Option<PathBuf>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Local,
            model: DEFAULT_LOCAL_EMBEDDING_MODEL.to_string(),
            ndims: 384,
            base_url: None,
            api_key: None,
            timeout_secs: 30,
            cache_dir: None,
        }
    }
}

impl EmbeddingConfig {
    /// Validate embedding settings.
    ///
    /// # Errors
    /// Returns an error on a zero dimension or invalid URL.
    pub fn validate(&self) -> RescueResult<()> {
        if self.ndims == 0 {
            return Err(RescueError::InvalidConfig(
                "embedding.ndims must be > 0".to_string(),
            ));
        }
        if let Some(base_url) = &self.base_url {
            Url::parse(base_url)?;
        }
        Ok(())
    }
}

/// Default collection / table name.
pub const DEFAULT_COLLECTION: &str = "agent_memory";

/// Storage backend selection.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// Embedded `SQLite` + sqlite-vec store.
    Embedded {
        /// Database file.
        path: PathBuf,
        /// Collection (table prefix).
        collection: String,
    },
    /// Qdrant over its REST API.
    Qdrant {
        /// Base URL.
        url: String,
        /// Collection name.
        collection: String,
        /// Optional `api-key` header.
        api_key: Option<String>,
    },
    /// Pinecone data plane over REST.
    Pinecone {
        /// Index host URL.
        index_host: String,
        /// API key; falls back to `PINECONE_API_KEY`.
        api_key: Option<String>,
        /// Namespace inside the index.
        namespace: String,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::Embedded {
            path: PathBuf::from("rescue.sqlite"),
            collection: DEFAULT_COLLECTION.to_string(),
        }
    }
}

impl BackendConfig {
    /// Short backend name for logs and stats.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Embedded { .. } => "embedded",
            Self::Qdrant { .. } => "qdrant",
            Self::Pinecone { .. } => "pinecone",
        }
    }

    /// Validate backend settings.
    ///
    /// # Errors
    /// Returns an error on empty names or invalid URLs.
    pub fn validate(&self) -> RescueResult<()> {
        match self {
            Self::Embedded { collection, .. } => validate_collection(collection),
            Self::Qdrant {
                url, collection, ..
            } => {
                Url::parse(url)?;
                validate_collection(collection)
            }
            Self::Pinecone { index_host, .. } => {
                Url::parse(index_host)?;
                Ok(())
            }
        }
    }
}

fn validate_collection(collection: &str) -> RescueResult<()> {
    let valid = !collection.is_empty()
        && collection
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-');
    if valid {
        Ok(())
    } else {
        Err(RescueError::InvalidConfig(format!(
            "collection name must be non-empty [A-Za-z0-9_-]: {collection:?}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_is_valid() {
        let config = RescueConfig::default();
        config.validate().unwrap();
        assert_eq!(config.importance_threshold, 7);
        assert_eq!(config.perspectives.len(), 3);
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        for threshold in [0, 11] {
            let config = RescueConfig {
                importance_threshold: threshold,
                ..RescueConfig::default()
            };
            assert!(matches!(config.validate(), Err(RescueError::InvalidConfig(_))));
        }
    }

    #[test]
    fn test_empty_perspectives_rejected() {
        let config = RescueConfig {
            perspectives: Vec::new(),
            ..RescueConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_collection_name_rejected() {
        let config = RescueConfig {
            backend: BackendConfig::Embedded {
                path: PathBuf::from("x.sqlite"),
                collection: "drop table;".to_string(),
            },
            ..RescueConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = RescueConfig::from_lookup(lookup_from(&[
            ("RESCUE_MODEL", "groq/llama-3.1-8b-instant"),
            ("RESCUE_SKILL_MODEL", "ollama/qwen2.5"),
            ("RESCUE_PERSPECTIVES", "fact, skill"),
            ("RESCUE_IMPORTANCE_THRESHOLD", "9"),
            ("RESCUE_DEDUP", "false"),
            ("RESCUE_BACKEND", "qdrant"),
            ("RESCUE_QDRANT_URL", "http://qdrant:6333"),
            ("RESCUE_EMBEDDING_PROVIDER", "openai"),
            ("RESCUE_EMBEDDING_DIMS", "1536"),
        ]))
        .unwrap();

        assert_eq!(config.importance_threshold, 9);
        assert!(!config.dedup);
        assert_eq!(config.perspectives.len(), 2);
        assert_eq!(config.perspectives[0].category, MemoryCategory::Fact);
        assert_eq!(config.perspectives[0].llm.model, "groq/llama-3.1-8b-instant");
        assert_eq!(config.perspectives[1].llm.model, "ollama/qwen2.5");
        assert_eq!(config.embedding.provider, EmbeddingProvider::OpenAi);
        assert_eq!(config.embedding.model, DEFAULT_REMOTE_EMBEDDING_MODEL);
        assert_eq!(config.embedding.ndims, 1536);
        assert_eq!(config.backend.name(), "qdrant");
        config.validate().unwrap();
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let result = RescueConfig::from_lookup(lookup_from(&[("RESCUE_MAX_CONTEXT_CHARS", "lots")]));
        assert!(matches!(result, Err(RescueError::InvalidConfig(_))));

        let result = RescueConfig::from_lookup(lookup_from(&[("RESCUE_BACKEND", "redis")]));
        assert!(result.is_err());

        let result = RescueConfig::from_lookup(lookup_from(&[("RESCUE_BACKEND", "pinecone")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_default_embedding_is_local() {
        let config = RescueConfig::from_lookup(lookup_from(&[(
            "RESCUE_EMBEDDING_CACHE_DIR",
            "/var/cache/rescue",
        )]))
        .unwrap();
        assert_eq!(config.embedding.provider, EmbeddingProvider::Local);
        assert_eq!(config.embedding.model, DEFAULT_LOCAL_EMBEDDING_MODEL);
        assert_eq!(
            config.embedding.cache_dir,
            Some(PathBuf::from("/var/cache/rescue"))
        );
        assert_eq!(
            RescueConfig::default().max_items_per_perspective,
            DEFAULT_MAX_ITEMS_PER_PERSPECTIVE
        );
    }

    #[test]
    fn test_backend_config_serde_tag() {
        let json = serde_json::to_value(BackendConfig::default()).unwrap();
        assert_eq!(json["kind"], "embedded");
    }
}
