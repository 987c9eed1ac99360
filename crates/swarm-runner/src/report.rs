//! Run results and the shared fan-out loop.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};

use swarm_core::{Peer, ProcSpec};

use crate::context::RunContext;
use crate::error::RunError;
use crate::process::ProcOutput;

/// Result of one process.
#[derive(Debug, Clone)]
pub struct ProcResult {
    pub peer: Peer,
    /// Host the process was started on.
    pub host: String,
    pub output: ProcOutput,
    pub error: Option<RunError>,
}

/// Aggregate result of a run: per-process results in rank order plus the
/// error that decides the run's outcome.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub results: Vec<ProcResult>,
    /// First non-cancellation error in completion order; a cancellation only
    /// when nothing else went wrong.
    pub error: Option<RunError>,
}

impl RunReport {
    /// A run that never started because its context had already fired.
    pub fn cancelled() -> Self {
        Self {
            results: Vec::new(),
            error: Some(RunError::CancellationExceeded),
        }
    }

    /// Build a report from results given in completion order.
    pub fn from_completed(completed: Vec<ProcResult>) -> Self {
        let mut error: Option<RunError> = None;
        for r in &completed {
            let Some(e) = &r.error else { continue };
            match &error {
                None => error = Some(e.clone()),
                Some(current) if current.is_cancellation() && !e.is_cancellation() => {
                    error = Some(e.clone());
                }
                Some(_) if !e.is_cancellation() => {
                    warn!(peer = %r.peer, error = %e, "additional peer failure");
                }
                Some(_) => {}
            }
        }

        let mut results = completed;
        results.sort_by_key(|r| r.peer.rank);
        Self { results, error }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> Result<Vec<ProcResult>, RunError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.results),
        }
    }

    /// Every captured stdout line, in rank order.
    pub fn stdout_lines(&self) -> impl Iterator<Item = &str> {
        self.results
            .iter()
            .flat_map(|r| r.output.stdout.iter().map(String::as_str))
    }
}

/// Run `f` once per process, concurrently, and wait for every task.
///
/// Nothing is started when `ctx` has already fired; specs that come up
/// after the context fires mid-loop are skipped. A panic inside `f` is
/// recorded as that peer's [`RunError::TaskPanicked`].
pub(crate) async fn run_each<F, Fut>(ctx: &RunContext, procs: Vec<ProcSpec>, f: F) -> RunReport
where
    F: Fn(RunContext, ProcSpec) -> Fut,
    Fut: Future<Output = ProcResult> + Send + 'static,
{
    if let Some(reason) = ctx.check() {
        info!(?reason, count = procs.len(), "context already done, not starting any process");
        return RunReport::cancelled();
    }

    let total = procs.len();
    let mut set = JoinSet::new();
    let mut skipped = 0usize;
    for spec in procs {
        if ctx.is_done() {
            skipped += 1;
            continue;
        }
        let label = spec.name();
        let peer = spec.peer.clone();
        let host = spec.launch_host.clone();
        let mut task = AbortOnDrop(tokio::spawn(f(ctx.clone(), spec)));
        set.spawn(async move {
            match (&mut task.0).await {
                Ok(result) => result,
                Err(e) => {
                    error!(peer = %label, error = %e, "runner task panicked");
                    ProcResult {
                        peer,
                        host,
                        output: ProcOutput::default(),
                        error: Some(RunError::TaskPanicked {
                            peer: label,
                            reason: e.to_string(),
                        }),
                    }
                }
            }
        });
    }

    let mut completed = Vec::with_capacity(total);
    let mut lost = None;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(result) => {
                if let Some(e) = &result.error {
                    if !e.is_cancellation() {
                        warn!(peer = %result.peer, error = %e, "peer failed");
                    }
                }
                completed.push(result);
            }
            Err(e) => {
                error!(error = %e, "runner task failed");
                lost.get_or_insert(RunError::TaskPanicked {
                    peer: "unknown".to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    let mut report = RunReport::from_completed(completed);
    if let Some(e) = lost {
        if report.error.as_ref().is_none_or(RunError::is_cancellation) {
            report.error = Some(e);
        }
    }
    if skipped > 0 {
        info!(skipped, total, "context fired before every process started");
        report.error.get_or_insert(RunError::CancellationExceeded);
    }
    report
}

/// Aborts the wrapped task when dropped, so dropping a run stops its peers.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Time a future.
pub async fn measure<F: Future>(f: F) -> (F::Output, Duration) {
    let t0 = Instant::now();
    let out = f.await;
    (out, t0.elapsed())
}
