//! Memory categories.
//!
//! Each extraction perspective produces memories of exactly one category. The
//! category classifies meaning only; it never takes part in the commit hash, so
//! the same statement rescued by two perspectives converges on one record.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The semantic category of a rescued memory.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryCategory {
    /// Concrete data points: names, dates, URLs, config values, credentials, versions, prices.
    Fact,
    /// A choice with its rationale, the rejected alternative and the trade-off.
    Decision,
    /// Procedural or debugging knowledge: steps, workarounds, patterns, gotchas.
    Skill,
}

impl MemoryCategory {
    /// All categories, in default perspective order.
    pub const ALL: &'static [Self] = &[Self::Fact, Self::Decision, Self::Skill];

    /// Stable `snake_case` identifier used in storage payloads.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fact => "fact",
            Self::Decision => "decision",
            Self::Skill => "skill",
        }
    }
}

impl fmt::Display for MemoryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse error for [`MemoryCategory`].
#[derive(Debug, Clone)]
pub struct MemoryCategoryParseError {
    value: String,
}

impl MemoryCategoryParseError {
    /// The raw value that failed parsing.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for MemoryCategoryParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid memory category: {}", self.value)
    }
}

impl std::error::Error for MemoryCategoryParseError {}

impl FromStr for MemoryCategory {
    type Err = MemoryCategoryParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fact" | "facts" => Ok(Self::Fact),
            "decision" | "decisions" => Ok(Self::Decision),
            "skill" | "skills" => Ok(Self::Skill),
            _ => Err(MemoryCategoryParseError {
                value: s.to_string(),
            }),
        }
    }
}
