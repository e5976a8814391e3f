//! Binary entrypoint: rescue memories from a context piped on stdin.

use std::process::ExitCode;

use compaction_rescue::start_rescue;

/// Run one rescue for the session named by the first argument.
fn main() -> ExitCode {
    start_rescue::run()
}
