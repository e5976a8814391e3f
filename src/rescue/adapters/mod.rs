//! Integration points for host agents.

pub mod compaction_hook;

pub use compaction_hook::{init_tracing, rescue_before_compaction};
