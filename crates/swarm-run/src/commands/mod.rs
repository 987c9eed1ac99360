pub mod config;
pub mod push;
pub mod run;
pub mod sweep;

use std::time::Duration;

use anyhow::bail;
use tracing::info;

use swarm_runner::RunContext;

/// Root context of a command: fires on Ctrl-C, and on `timeout` if given.
pub fn root_context(timeout: Option<Duration>) -> RunContext {
    let (ctx, handle) = RunContext::new();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            handle.cancel();
        }
    });
    match timeout {
        Some(t) if !t.is_zero() => ctx.with_timeout(t),
        _ => ctx,
    }
}

/// Default peer count: one per logical CPU.
pub fn default_np() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Split `prog args...` off the trailing command line.
pub fn split_program(command: Vec<String>) -> anyhow::Result<(String, Vec<String>)> {
    let mut parts = command.into_iter();
    match parts.next() {
        Some(prog) if !prog.trim().is_empty() => Ok((prog, parts.collect())),
        _ => bail!("missing program name"),
    }
}
