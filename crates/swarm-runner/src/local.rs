//! Local runner — every [`ProcSpec`] becomes a child of this process.

use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info};

use swarm_core::ProcSpec;

use crate::context::RunContext;
use crate::error::RunError;
use crate::process::{supervise, ProcOutput, DEFAULT_GRACE_PERIOD};
use crate::report::{run_each, ProcResult, RunReport};
use crate::{BoxFuture, Runner};

#[derive(Debug, Clone)]
pub struct LocalRunner {
    grace: Duration,
}

impl Default for LocalRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalRunner {
    pub fn new() -> Self {
        Self {
            grace: DEFAULT_GRACE_PERIOD,
        }
    }

    /// Set how long stopped children get before they are killed.
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    async fn run(&self, ctx: &RunContext, procs: Vec<ProcSpec>, verbose: bool) -> RunReport {
        info!(count = procs.len(), "starting local peers");
        let grace = self.grace;
        run_each(ctx, procs, move |ctx, spec| run_one(ctx, spec, verbose, grace)).await
    }
}

impl Runner for LocalRunner {
    fn run_all<'a>(
        &'a self,
        ctx: &'a RunContext,
        procs: Vec<ProcSpec>,
        verbose: bool,
    ) -> BoxFuture<'a, RunReport> {
        Box::pin(self.run(ctx, procs, verbose))
    }
}

async fn run_one(ctx: RunContext, spec: ProcSpec, verbose: bool, grace: Duration) -> ProcResult {
    let label = spec.name();
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args).envs(&spec.env);
    debug!(peer = %label, program = %spec.program, args = ?spec.args, "launching local peer");

    let (output, error) = match supervise(&ctx, cmd, &label, verbose, grace).await {
        Ok(s) => {
            let error = match (s.cancelled, s.output.exit_code) {
                (Some(_), _) => Some(RunError::CancellationExceeded),
                (None, Some(0)) => None,
                (None, Some(code)) => Some(RunError::ProcessFailure {
                    peer: label.clone(),
                    exit_code: code,
                }),
                (None, None) => Some(match s.output.signal {
                    Some(signal) => RunError::Signalled {
                        peer: label.clone(),
                        signal,
                    },
                    None => RunError::ProcessFailure {
                        peer: label.clone(),
                        exit_code: -1,
                    },
                }),
            };
            (s.output, error)
        }
        Err(e) => (
            ProcOutput::default(),
            Some(RunError::Spawn {
                peer: label.clone(),
                reason: e.to_string(),
            }),
        ),
    };

    ProcResult {
        host: spec.peer.id.host.clone(),
        peer: spec.peer,
        output,
        error,
    }
}
