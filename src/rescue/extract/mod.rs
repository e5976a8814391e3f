//! Extraction perspectives: prompts, parsing, and the LLM client.

pub mod llm_perspective;
pub mod parse;
pub mod perspective;
pub mod prompts;
pub mod provider;

pub use llm_perspective::LlmPerspective;
pub use parse::{parse_candidates, strip_code_fence};
pub use perspective::{ExtractFuture, Perspective};
pub use prompts::prompt_for;
pub use provider::{Provider, ResolvedEndpoint};
