//! Provider inference for OpenAI-compatible chat endpoints.
//!
//! A model id such as `groq/llama-3.1-8b-instant` selects the provider's API base
//! and credential variable; the prefix is stripped before the id goes on the wire.

use crate::rescue::core::config::LlmConfig;
use crate::rescue::core::errors::{RescueError, RescueResult};

/// Known chat-completion providers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Provider {
    /// Cerebras inference cloud.
    Cerebras,
    /// Groq.
    Groq,
    /// Local Ollama (OpenAI-compatible endpoint, no key).
    Ollama,
    /// OpenRouter.
    OpenRouter,
    /// OpenAI or any unprefixed model.
    OpenAi,
}

impl Provider {
    /// Infer the provider from a model id prefix.
    #[must_use]
    pub fn infer(model: &str) -> Self {
        match model.split_once('/').map(|(prefix, _)| prefix) {
            Some("cerebras") => Self::Cerebras,
            Some("groq") => Self::Groq,
            Some("ollama") => Self::Ollama,
            Some("openrouter") => Self::OpenRouter,
            _ => Self::OpenAi,
        }
    }

    /// Stable provider name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cerebras => "cerebras",
            Self::Groq => "groq",
            Self::Ollama => "ollama",
            Self::OpenRouter => "openrouter",
            Self::OpenAi => "openai",
        }
    }

    /// Default API base URL.
    #[must_use]
    pub const fn default_api_base(self) -> &'static str {
        match self {
            Self::Cerebras => "https://api.cerebras.ai/v1",
            Self::Groq => "https://api.groq.com/openai/v1",
            Self::Ollama => "http://localhost:11434/v1",
            Self::OpenRouter => "https://openrouter.ai/api/v1",
            Self::OpenAi => "https://api.openai.com/v1",
        }
    }

    /// Environment variable holding the credential, if one is needed.
    #[must_use]
    pub const fn credential_env(self) -> Option<&'static str> {
        match self {
            Self::Cerebras => Some("CEREBRAS_API_KEY"),
            Self::Groq => Some("GROQ_API_KEY"),
            Self::Ollama => None,
            Self::OpenRouter => Some("OPENROUTER_API_KEY"),
            Self::OpenAi => Some("OPENAI_API_KEY"),
        }
    }

    /// Model id as the provider expects it.
    #[must_use]
    pub fn wire_model(self, model: &str) -> String {
        match (self, model.split_once('/')) {
            (Self::OpenAi, _) | (_, None) => model.to_string(),
            (_, Some((_, rest))) => rest.to_string(),
        }
    }
}

/// Fully resolved chat endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    /// Provider that was inferred.
    pub provider: Provider,
    /// API base without trailing slash.
    pub api_base: String,
    /// Bearer credential, if any.
    pub api_key: Option<String>,
    /// Model id sent in the request body.
    pub wire_model: String,
}

impl ResolvedEndpoint {
    /// Resolve an endpoint, reading missing credentials through `lookup`.
    ///
    /// # Errors
    /// Returns [`RescueError::MissingCredential`] when the provider needs a key and none is available.
    pub fn resolve<F>(llm: &LlmConfig, lookup: F) -> RescueResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let provider = Provider::infer(&llm.model);
        let api_base = llm
            .api_base
            .clone()
            .unwrap_or_else(|| provider.default_api_base().to_string())
            .trim_end_matches('/')
            .to_string();

        let api_key = match (&llm.api_key, provider.credential_env()) {
            (Some(key), _) => Some(key.clone()),
            (None, None) => None,
            (None, Some(env_var)) => match lookup(env_var).filter(|key| !key.trim().is_empty()) {
                Some(key) => Some(key),
                None if llm.api_base.is_some() => None,
                None => {
                    return Err(RescueError::MissingCredential {
                        provider: provider.as_str().to_string(),
                        env_var: env_var.to_string(),
                    });
                }
            },
        };

        Ok(Self {
            provider,
            api_base,
            api_key,
            wire_model: provider.wire_model(&llm.model),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_and_strip_prefix() {
        assert_eq!(Provider::infer("groq/llama-3.1-8b"), Provider::Groq);
        assert_eq!(Provider::Groq.wire_model("groq/llama-3.1-8b"), "llama-3.1-8b");
        assert_eq!(Provider::infer("gpt-4o-mini"), Provider::OpenAi);
        assert_eq!(Provider::infer("meta/llama"), Provider::OpenAi);
        assert_eq!(Provider::OpenAi.wire_model("meta/llama"), "meta/llama");
        assert_eq!(
            Provider::OpenRouter.wire_model("openrouter/anthropic/claude-3-haiku"),
            "anthropic/claude-3-haiku"
        );
    }

    #[test]
    fn test_missing_credential_fails() {
        let llm = LlmConfig::for_model("cerebras/llama-3.3-70b");
        let err = ResolvedEndpoint::resolve(&llm, |_| None).unwrap_err();
        assert!(matches!(err, RescueError::MissingCredential { ref env_var, .. } if env_var == "CEREBRAS_API_KEY"));
    }

    #[test]
    fn test_credential_from_lookup() {
        let llm = LlmConfig::for_model("groq/llama-3.1-8b");
        let endpoint = ResolvedEndpoint::resolve(&llm, |key| {
            (key == "GROQ_API_KEY").then(|| "gsk-test".to_string())
        })
        .unwrap();
        assert_eq!(endpoint.api_key.as_deref(), Some("gsk-test"));
        assert_eq!(endpoint.api_base, "https://api.groq.com/openai/v1");
    }

    #[test]
    fn test_ollama_needs_no_key() {
        let llm = LlmConfig::for_model("ollama/qwen2.5");
        let endpoint = ResolvedEndpoint::resolve(&llm, |_| None).unwrap();
        assert_eq!(endpoint.api_key, None);
        assert_eq!(endpoint.wire_model, "qwen2.5");
    }

    #[test]
    fn test_custom_base_tolerates_missing_key() {
        let llm = LlmConfig {
            api_base: Some("http://127.0.0.1:9000/v1/".to_string()),
            ..LlmConfig::for_model("gpt-4o-mini")
        };
        let endpoint = ResolvedEndpoint::resolve(&llm, |_| None).unwrap();
        assert_eq!(endpoint.api_base, "http://127.0.0.1:9000/v1");
        assert_eq!(endpoint.api_key, None);
    }
}
