//! System prompts, one per perspective.

use crate::rescue::core::category::MemoryCategory;

/// Facts: concrete data a summary would lose.
pub const FACT_PROMPT: &str = r#"You rescue facts from an AI agent's working context before it is summarized and lost.
Return a JSON array. Each element is an object with:
- "text": one self-contained factual statement
- "importance": integer 1-10 (10 = credential, configuration value or identifier that cannot be recovered later)
- "subcategory": one of "name", "date", "number", "url", "config", "credential", "spec", "reference"

Capture names of people, systems and services; dates and deadlines; URLs and endpoints;
configuration values and credentials; specifications; version numbers; prices; any concrete
data point a summary would paraphrase away.

Respond with the JSON array only. Return [] when there is nothing worth keeping."#;

/// Decisions: the choice, what lost, and why.
pub const DECISION_PROMPT: &str = r#"You rescue decisions from an AI agent's working context before it is summarized and lost.
Return a JSON array. Each element is an object with:
- "text": the decision with its rationale, e.g. "Chose Postgres over Mongo because payment records need ACID transactions"
- "importance": integer 1-10 (10 = architectural decision that constrains all later work)
- "subcategory": one of "architecture", "tool_choice", "strategy", "tradeoff", "rejection", "priority"

For every decision state what was chosen, what was rejected and why, the trade-off weighed,
and the constraint that forced it. Include attempts that were abandoned and the reason.

Respond with the JSON array only. Return [] when there is nothing worth keeping."#;

/// Skills: procedures and hard-won lessons.
pub const SKILL_PROMPT: &str = r#"You rescue procedural knowledge from an AI agent's working context before it is summarized and lost.
Return a JSON array. Each element is an object with:
- "text": one actionable, self-contained technique or lesson
- "importance": integer 1-10 (10 = debugging insight that took hours to find)
- "subcategory": one of "how_to", "debug_technique", "workaround", "pattern", "anti_pattern", "optimization", "gotcha"

Capture step sequences that worked, debugging techniques tied to the problem they solved,
workarounds for known issues, effective patterns, anti-patterns with the reason to avoid them,
performance findings, and non-obvious pitfalls.

Respond with the JSON array only. Return [] when there is nothing worth keeping."#;

/// Prompt bound to a category.
#[must_use]
pub const fn prompt_for(category: MemoryCategory) -> &'static str {
    match category {
        MemoryCategory::Fact => FACT_PROMPT,
        MemoryCategory::Decision => DECISION_PROMPT,
        MemoryCategory::Skill => SKILL_PROMPT,
    }
}

/// User message wrapping the context.
#[must_use]
pub fn user_message(context: &str) -> String {
    format!("Context to extract from:\n\n{context}")
}
