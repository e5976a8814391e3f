//! Startup helpers for the `rescue` binary.
//!
//! Reads the pre-compaction context from stdin, takes the session id from the
//! first argument and the configuration from `RESCUE_*` variables, then prints
//! every committed memory as one JSON line.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::rescue::adapters::{init_tracing, rescue_before_compaction};
use crate::rescue::core::config::RescueConfig;
use crate::rescue::core::ids::SessionId;
use crate::rescue::engine::MemoryRescue;

/// Default host budget for one rescue, in seconds.
pub const DEFAULT_HOST_TIMEOUT_SECS: u64 = 120;

/// Run the binary.
///
/// # Returns
/// `ExitCode::SUCCESS` after printing the committed memories (possibly none),
/// `1` on a construction failure, `2` on bad usage.
#[must_use]
pub fn run() -> ExitCode {
    init_tracing();

    let Some(session) = std::env::args()
        .nth(1)
        .filter(|arg| !arg.trim().is_empty())
        .map(SessionId::new)
    else {
        tracing::error!("usage: rescue <session-id> < context.txt");
        return ExitCode::from(2);
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    match rt.block_on(rescue_stdin(&session)) {
        Ok(count) => {
            tracing::info!(session = %session, committed = count, "Rescue complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("Rescue failed: {e:#}");
            ExitCode::from(1)
        }
    }
}

/// Host timeout from `RESCUE_HOST_TIMEOUT_SECS`.
///
/// # Errors
/// Returns an error if the variable is set but not a positive integer.
pub fn host_timeout() -> anyhow::Result<Duration> {
    match std::env::var("RESCUE_HOST_TIMEOUT_SECS") {
        Ok(raw) => {
            let secs: u64 = raw
                .trim()
                .parse()
                .with_context(|| format!("RESCUE_HOST_TIMEOUT_SECS is not a number: {raw}"))?;
            anyhow::ensure!(secs > 0, "RESCUE_HOST_TIMEOUT_SECS must be > 0");
            Ok(Duration::from_secs(secs))
        }
        Err(_) => Ok(Duration::from_secs(DEFAULT_HOST_TIMEOUT_SECS)),
    }
}

async fn rescue_stdin(session: &SessionId) -> anyhow::Result<usize> {
    let mut context = String::new();
    tokio::io::stdin()
        .read_to_string(&mut context)
        .await
        .context("failed to read context from stdin")?;

    let config = RescueConfig::from_env().context("invalid RESCUE_* configuration")?;
    let budget = host_timeout()?;
    let rescue = MemoryRescue::from_config(config)
        .await
        .context("failed to build the rescue pipeline")?;

    let memories = rescue_before_compaction(&rescue, &context, session, budget).await;

    let mut stdout = tokio::io::stdout();
    for memory in &memories {
        let mut line = serde_json::to_vec(memory).context("failed to encode memory")?;
        line.push(b'\n');
        stdout.write_all(&line).await?;
    }
    stdout.flush().await?;
    Ok(memories.len())
}
