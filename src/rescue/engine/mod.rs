//! Orchestration: fan-out, gating, dedup and commit.

pub mod core;
pub mod seen_cache;

pub use self::core::{MemoryRescue, PerspectiveSummary, RescueStats, SessionStats};
pub use seen_cache::SeenCache;
