//! Lenient parsing of model output into candidates.
//!
//! The whole response must be readable as a JSON array (possibly fenced, possibly
//! wrapped in an object); individual malformed entries are dropped on their own.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::rescue::core::errors::{RescueError, RescueResult};
use crate::rescue::core::memory::{CandidateMemory, DEFAULT_IMPORTANCE, clamp_importance};

const FENCE_PATTERN: &str = r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```";

fn fence_regex() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE.get_or_init(|| Regex::new(FENCE_PATTERN).ok()).as_ref()
}

/// Return the body of the first fenced code block, or the trimmed input.
#[must_use]
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    if let Some(body) = fence_regex()
        .and_then(|re| re.captures(trimmed))
        .and_then(|caps| caps.get(1))
    {
        return body.as_str().trim();
    }

    // Unterminated fence: drop the opening line.
    if let Some(rest) = trimmed.strip_prefix("```") {
        return rest.split_once('\n').map_or(rest, |(_, body)| body).trim();
    }

    trimmed
}

/// Parse raw model output into candidate memories.
///
/// # Errors
/// Returns [`RescueError::MalformedOutput`] if no JSON array can be recovered.
pub fn parse_candidates(raw: &str, max_items: usize) -> RescueResult<Vec<CandidateMemory>> {
    let items = read_items(strip_code_fence(raw))?;
    let total = items.len();

    let candidates: Vec<CandidateMemory> = items
        .iter()
        .filter_map(candidate_from_value)
        .take(max_items)
        .collect();

    if candidates.len() < total {
        debug!(
            total,
            kept = candidates.len(),
            "Dropped malformed or excess candidate items"
        );
    }

    Ok(candidates)
}

fn read_items(body: &str) -> RescueResult<Vec<Value>> {
    let value = match serde_json::from_str::<Value>(body) {
        Ok(value) => value,
        Err(err) => {
            // Chatty models wrap the array in prose; retry on the outermost brackets.
            let sliced = body
                .find('[')
                .zip(body.rfind(']'))
                .filter(|(start, end)| start < end)
                .map(|(start, end)| &body[start..=end]);
            match sliced.map(serde_json::from_str::<Value>) {
                Some(Ok(value)) => value,
                _ => return Err(RescueError::MalformedOutput(err.to_string())),
            }
        }
    };

    match value {
        Value::Array(items) => Ok(items),
        Value::Object(map) => map
            .into_iter()
            .find_map(|(_, v)| match v {
                Value::Array(items) => Some(items),
                _ => None,
            })
            .ok_or_else(|| RescueError::MalformedOutput("object holds no array".to_string())),
        other => Err(RescueError::MalformedOutput(format!(
            "expected a JSON array, got {}",
            type_name(&other)
        ))),
    }
}

fn candidate_from_value(value: &Value) -> Option<CandidateMemory> {
    let object = value.as_object()?;
    let text = object.get("text")?.as_str()?.trim();
    if text.is_empty() {
        return None;
    }

    let importance = object
        .get("importance")
        .and_then(importance_from_value)
        .unwrap_or(DEFAULT_IMPORTANCE);

    let candidate = CandidateMemory::new(text, importance);
    match object.get("subcategory").and_then(Value::as_str).map(str::trim) {
        Some(sub) if !sub.is_empty() => Some(candidate.with_subcategory(sub)),
        _ => Some(candidate),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn importance_from_value(value: &Value) -> Option<u8> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
            .map(clamp_importance),
        Value::String(raw) => {
            let raw = raw.trim();
            raw.parse::<i64>()
                .ok()
                .or_else(|| {
                    raw.parse::<f64>()
                        .ok()
                        .filter(|f| f.is_finite())
                        .map(|f| f.trunc() as i64)
                })
                .map(clamp_importance)
        }
        _ => None,
    }
}

const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
