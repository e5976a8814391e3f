//! Perspective backed by an OpenAI-compatible chat endpoint, through rig.

use std::time::Duration;

use reqwest::Client as ReqwestClient;
use rig::client::CompletionClient;
use rig::completion::CompletionModel;
use rig::message::AssistantContent;
use rig::providers::openai;
use tracing::{debug, warn};

use crate::rescue::core::category::MemoryCategory;
use crate::rescue::core::config::{DEFAULT_MAX_ITEMS_PER_PERSPECTIVE, LlmConfig, PerspectiveConfig};
use crate::rescue::core::errors::{RescueError, RescueResult};
use crate::rescue::core::memory::CandidateMemory;
use crate::rescue::extract::parse::parse_candidates;
use crate::rescue::extract::perspective::{ExtractFuture, Perspective};
use crate::rescue::extract::prompts::{prompt_for, user_message};
use crate::rescue::extract::provider::ResolvedEndpoint;

type ChatModel = openai::completion::CompletionModel<ReqwestClient>;

/// LLM-driven extraction perspective.
#[derive(Clone)]
pub struct LlmPerspective {
    category: MemoryCategory,
    model_id: String,
    model: ChatModel,
    temperature: f64,
    max_tokens: u64,
    timeout: Duration,
    max_items: usize,
}

impl LlmPerspective {
    /// Build a perspective, reading credentials from the process environment.
    ///
    /// # Errors
    /// Returns an error if the model config is invalid, a credential is missing,
    /// or the provider client cannot be built.
    pub fn new(config: &PerspectiveConfig, max_items: usize) -> RescueResult<Self> {
        Self::with_lookup(config, max_items, |name| std::env::var(name).ok())
    }

    /// Build a perspective with an explicit credential lookup.
    ///
    /// # Errors
    /// Same as [`LlmPerspective::new`].
    pub fn with_lookup<F>(config: &PerspectiveConfig, max_items: usize, lookup: F) -> RescueResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        config.llm.validate()?;
        let endpoint = ResolvedEndpoint::resolve(&config.llm, lookup)?;
        // Keyless gateways get an empty bearer token.
        let client = openai::Client::<ReqwestClient>::builder()
            .api_key(endpoint.api_key.clone().unwrap_or_default())
            .base_url(&endpoint.api_base)
            .build()
            .map_err(RescueError::from)?
            .completions_api();
        let model = client.completion_model(endpoint.wire_model.clone());

        Ok(Self {
            category: config.category,
            model_id: config.llm.model.clone(),
            model,
            temperature: config.llm.temperature,
            max_tokens: config.llm.max_tokens,
            timeout: Duration::from_secs(config.llm.timeout_secs),
            max_items,
        })
    }

    /// Fact perspective on the given model.
    ///
    /// # Errors
    /// Same as [`LlmPerspective::new`].
    pub fn fact(llm: &LlmConfig) -> RescueResult<Self> {
        Self::for_category(MemoryCategory::Fact, llm)
    }

    /// Decision perspective on the given model.
    ///
    /// # Errors
    /// Same as [`LlmPerspective::new`].
    pub fn decision(llm: &LlmConfig) -> RescueResult<Self> {
        Self::for_category(MemoryCategory::Decision, llm)
    }

    /// Skill perspective on the given model.
    ///
    /// # Errors
    /// Same as [`LlmPerspective::new`].
    pub fn skill(llm: &LlmConfig) -> RescueResult<Self> {
        Self::for_category(MemoryCategory::Skill, llm)
    }

    fn for_category(category: MemoryCategory, llm: &LlmConfig) -> RescueResult<Self> {
        let config = PerspectiveConfig {
            category,
            llm: llm.clone(),
        };
        Self::new(&config, DEFAULT_MAX_ITEMS_PER_PERSPECTIVE)
    }

    /// Run the extraction and report why it failed, if it did.
    ///
    /// # Errors
    /// Returns an error on transport failure, a provider error, a timeout, or
    /// output that cannot be read as a list of candidates.
    pub async fn try_extract(&self, context: &str) -> RescueResult<Vec<CandidateMemory>> {
        let request = self
            .model
            .completion_request(user_message(context))
            .preamble(prompt_for(self.category).to_string())
            .temperature(self.temperature)
            .max_tokens(self.max_tokens)
            .build();

        let response = tokio::time::timeout(self.timeout, self.model.completion(request))
            .await
            .map_err(|_| RescueError::Timeout(format!("{} chat call", self.category)))??;
        let text = extract_text(&response.choice);
        if text.trim().is_empty() {
            return Err(RescueError::MalformedOutput(
                "response has no message content".to_string(),
            ));
        }

        let candidates = parse_candidates(&text, self.max_items)?;
        debug!(
            perspective = %self.category,
            model = %self.model_id,
            candidates = candidates.len(),
            "Perspective extraction finished"
        );
        Ok(candidates)
    }
}

impl Perspective for LlmPerspective {
    fn category(&self) -> MemoryCategory {
        self.category
    }

    fn model(&self) -> &str {
        &self.model_id
    }

    fn extract<'a>(&'a self, context: &'a str) -> ExtractFuture<'a, Vec<CandidateMemory>> {
        Box::pin(async move {
            match self.try_extract(context).await {
                Ok(candidates) => candidates,
                Err(err) => {
                    warn!(
                        perspective = %self.category,
                        model = %self.model_id,
                        unavailable = err.is_unavailable(),
                        error = %err,
                        "Perspective extraction failed"
                    );
                    Vec::new()
                }
            }
        })
    }
}

fn extract_text(choice: &rig::OneOrMany<AssistantContent>) -> String {
    let mut out = String::new();
    for content in choice.iter() {
        if let AssistantContent::Text(text) = content {
            out.push_str(&text.text);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{Value, json};

    use super::*;

    #[derive(Clone)]
    struct MockChat {
        status: StatusCode,
        reply: String,
        seen: Arc<Mutex<Vec<(Option<String>, Value)>>>,
    }

    async fn completions(
        State(mock): State<MockChat>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        mock.seen.lock().unwrap().push((auth, body));
        if !mock.status.is_success() {
            return (
                mock.status,
                Json(json!({"error": {"message": "upstream overloaded", "type": "server_error"}})),
            );
        }
        (
            StatusCode::OK,
            Json(json!({
                "id": "chatcmpl-test",
                "object": "chat.completion",
                "created": 1_767_225_600,
                "model": "llama-3.1-8b-instant",
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": mock.reply, "refusal": null, "tool_calls": []},
                    "logprobs": null,
                    "finish_reason": "stop"
                }],
                "usage": {"prompt_tokens": 42, "completion_tokens": 17, "total_tokens": 59}
            })),
        )
    }

    async fn spawn_chat(status: StatusCode, reply: &str) -> (String, MockChat) {
        let mock = MockChat {
            status,
            reply: reply.to_string(),
            seen: Arc::new(Mutex::new(Vec::new())),
        };
        let app = Router::new()
            .route("/v1/chat/completions", post(completions))
            .with_state(mock.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/v1/"), mock)
    }

    fn perspective(category: MemoryCategory, api_base: String) -> LlmPerspective {
        let config = PerspectiveConfig {
            category,
            llm: LlmConfig {
                api_base: Some(api_base),
                ..LlmConfig::for_model("groq/llama-3.1-8b-instant")
            },
        };
        LlmPerspective::with_lookup(&config, 16, |name| {
            (name == "GROQ_API_KEY").then(|| "gsk-test".to_string())
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_extracts_fenced_reply() {
        let reply = "```json\n[{\"text\": \"Chose Postgres over Mongo because payments need ACID\", \"importance\": 9, \"subcategory\": \"architecture\"}, {\"importance\": 9}]\n```";
        let (base, mock) = spawn_chat(StatusCode::OK, reply).await;
        let perspective = perspective(MemoryCategory::Decision, base);

        let candidates = perspective.extract("we discussed databases").await;
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].importance, 9);

        let seen = mock.seen.lock().unwrap();
        let (auth, body) = &seen[0];
        assert_eq!(auth.as_deref(), Some("Bearer gsk-test"));
        assert_eq!(body["model"], "llama-3.1-8b-instant");
        assert_eq!(body["temperature"], 0.2);
        assert_eq!(body["messages"][0]["role"], "system");
        let messages = body["messages"].to_string();
        assert!(messages.contains("rescue decisions"));
        assert!(messages.contains("we discussed databases"));
    }

    #[tokio::test]
    async fn test_server_error_yields_empty() {
        let (base, _mock) = spawn_chat(StatusCode::INTERNAL_SERVER_ERROR, "[]").await;
        let perspective = perspective(MemoryCategory::Fact, base);

        let err = perspective.try_extract("ctx").await.unwrap_err();
        assert!(matches!(err, RescueError::Completion(_)));
        assert!(err.is_unavailable());
        assert!(perspective.extract("ctx").await.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_reply_yields_empty() {
        let (base, _mock) = spawn_chat(StatusCode::OK, "Nothing notable here.").await;
        let perspective = perspective(MemoryCategory::Skill, base);

        assert!(matches!(
            perspective.try_extract("ctx").await,
            Err(RescueError::MalformedOutput(_))
        ));
        assert!(perspective.extract("ctx").await.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_yields_empty() {
        let perspective = perspective(MemoryCategory::Fact, "http://127.0.0.1:9/v1".to_string());
        assert!(perspective.extract("ctx").await.is_empty());
    }

    #[test]
    fn test_missing_credential_is_construction_error() {
        let config = PerspectiveConfig {
            category: MemoryCategory::Fact,
            llm: LlmConfig::for_model("cerebras/llama-3.3-70b"),
        };
        let result = LlmPerspective::with_lookup(&config, 8, |_| None);
        assert!(matches!(result, Err(RescueError::MissingCredential { .. })));
    }
}
