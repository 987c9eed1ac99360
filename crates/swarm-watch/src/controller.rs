//! Watch controller — drives one node's share of a job through stage
//! changes.
//!
//! ```text
//!  Idle ──first stage──▶ Running ──local peers exit──▶ Draining ──!keep──▶ Terminated
//!                         ▲   │                           │
//!                         └───┘ checkpoint changed        │ keep + new checkpoint
//!                         ▲  (stop, rebuild, restart)     │
//!                         └───────────────────────────────┘
//! ```
//!
//! A restart is a cooperative stop of every local process followed by a
//! fresh plan built from the new stage. Worker state is not carried over.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use swarm_core::job::env;
use swarm_core::{for_host, JobConfig, ProcSpec, Stage, Strategy};
use swarm_runner::{BoxFuture, RunContext, RunError, RunReport, Runner};

use crate::board::StageBoard;
use crate::client::StageClient;
use crate::error::{WatchError, WatchResult};

/// Where the controller reads the desired stage from.
pub trait StageSource: Send + Sync {
    /// The latest stage, or `None` while nothing has been pushed.
    fn latest(&self) -> BoxFuture<'_, WatchResult<Option<Stage>>>;
}

impl StageSource for StageBoard {
    fn latest(&self) -> BoxFuture<'_, WatchResult<Option<Stage>>> {
        Box::pin(async move { Ok(self.current()) })
    }
}

impl StageSource for StageClient {
    fn latest(&self) -> BoxFuture<'_, WatchResult<Option<Stage>>> {
        Box::pin(self.fetch_stage())
    }
}

/// Controller lifecycle, observable through [`WatchController::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    Running { checkpoint: String, local: usize },
    Draining { checkpoint: String },
    Terminated,
}

/// What happened over a controller's lifetime.
#[derive(Debug, Default)]
pub struct WatchSummary {
    /// Times the local share was started.
    pub runs: usize,
    /// Runs that were stopped early by a checkpoint change.
    pub restarts: usize,
    /// Checkpoint of the last stage that was run.
    pub checkpoint: Option<String>,
    pub last_report: Option<RunReport>,
}

enum Step {
    Finished(RunReport),
    Restart(Stage),
}

pub struct WatchController {
    job: JobConfig,
    self_host: String,
    strategy: Strategy,
    runner: Arc<dyn Runner>,
    source: Arc<dyn StageSource>,
    period: Duration,
    keep: bool,
    verbose: bool,
    state: watch::Sender<WatchState>,
}

impl WatchController {
    /// `job` supplies the parent endpoint, host list and program; the peer
    /// set always comes from the current stage.
    pub fn new(
        job: JobConfig,
        self_host: impl Into<String>,
        runner: Arc<dyn Runner>,
        source: Arc<dyn StageSource>,
    ) -> Self {
        let (state, _rx) = watch::channel(WatchState::Idle);
        Self {
            job,
            self_host: self_host.into(),
            strategy: Strategy::default(),
            runner,
            source,
            period: Duration::from_millis(500),
            keep: false,
            verbose: false,
            state,
        }
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Polling period of the stage source.
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Keep watching for new stages after the local peers exit.
    pub fn keep(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<WatchState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> WatchState {
        self.state.borrow().clone()
    }

    /// This node's share of `stage`, tagged with the stage's checkpoint.
    pub fn plan(&self, stage: &Stage) -> WatchResult<Vec<ProcSpec>> {
        let procs = self.job.create_procs(&stage.cluster, self.strategy)?;
        Ok(for_host(&self.self_host, &procs)
            .into_iter()
            .map(|p| p.with_env(env::CHECKPOINT, stage.checkpoint.clone()))
            .collect())
    }

    /// Run until terminated.
    ///
    /// Returns an error only for an unbuildable stage, or when the last run
    /// failed and the controller is not keeping watch. Cancelling `ctx`
    /// stops the local peers and ends the controller cleanly.
    pub async fn run(&self, ctx: &RunContext) -> WatchResult<WatchSummary> {
        let mut summary = WatchSummary::default();
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.transition(WatchState::Idle);
        let Some(mut stage) = self.await_stage(ctx, &mut ticker, None).await else {
            self.transition(WatchState::Terminated);
            return Ok(summary);
        };

        loop {
            let procs = self.plan(&stage)?;
            info!(
                checkpoint = %stage.checkpoint,
                local = procs.len(),
                cluster = stage.cluster.len(),
                "will run {}/{} local peers",
                procs.len(),
                stage.cluster.len()
            );
            self.transition(WatchState::Running {
                checkpoint: stage.checkpoint.clone(),
                local: procs.len(),
            });
            summary.runs += 1;
            summary.checkpoint = Some(stage.checkpoint.clone());

            let step = self.run_stage(ctx, &stage, procs, &mut ticker).await;
            let report = match step {
                Step::Restart(newer) => {
                    summary.restarts += 1;
                    stage = newer;
                    continue;
                }
                Step::Finished(report) => report,
            };

            let failure = report.error.clone().filter(|e| !e.is_cancellation());
            if let Some(e) = &failure {
                warn!(checkpoint = %stage.checkpoint, error = %e, "local peers failed");
            }
            summary.last_report = Some(report);

            if ctx.is_done() {
                self.transition(WatchState::Terminated);
                return Ok(summary);
            }

            self.transition(WatchState::Draining {
                checkpoint: stage.checkpoint.clone(),
            });
            if !self.keep {
                self.transition(WatchState::Terminated);
                return match failure {
                    Some(e) => Err(WatchError::Run(e)),
                    None => Ok(summary),
                };
            }

            match self.await_stage(ctx, &mut ticker, Some(&stage.checkpoint)).await {
                Some(newer) => stage = newer,
                None => {
                    self.transition(WatchState::Terminated);
                    return Ok(summary);
                }
            }
        }
    }

    /// Run one stage's local share, polling for a newer checkpoint.
    async fn run_stage(
        &self,
        ctx: &RunContext,
        stage: &Stage,
        procs: Vec<ProcSpec>,
        ticker: &mut Interval,
    ) -> Step {
        let (child, handle) = ctx.with_cancel();
        let mut run = self.runner.run_all(&child, procs, self.verbose);

        loop {
            tokio::select! {
                report = &mut run => return Step::Finished(report),
                _ = ticker.tick() => {
                    let Some(newer) = self.poll_newer(Some(&stage.checkpoint)).await else {
                        continue;
                    };
                    info!(
                        from = %stage.checkpoint,
                        to = %newer.checkpoint,
                        "checkpoint changed, stopping local peers"
                    );
                    handle.cancel();
                    let report = run.await;
                    log_stopped(&report);
                    return Step::Restart(newer);
                }
            }
        }
    }

    /// Wait for a stage whose checkpoint differs from `current`.
    async fn await_stage(
        &self,
        ctx: &RunContext,
        ticker: &mut Interval,
        current: Option<&str>,
    ) -> Option<Stage> {
        loop {
            tokio::select! {
                reason = ctx.done() => {
                    debug!(?reason, "stopped waiting for a stage");
                    return None;
                }
                _ = ticker.tick() => {
                    if let Some(stage) = self.poll_newer(current).await {
                        return Some(stage);
                    }
                }
            }
        }
    }

    async fn poll_newer(&self, current: Option<&str>) -> Option<Stage> {
        match self.source.latest().await {
            Ok(Some(stage)) if Some(stage.checkpoint.as_str()) != current => {
                if let Err(e) = stage.validate() {
                    warn!(checkpoint = %stage.checkpoint, error = %e, "ignoring unusable stage");
                    return None;
                }
                Some(stage)
            }
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "failed to poll stage");
                None
            }
        }
    }

    fn transition(&self, next: WatchState) {
        let previous = self.state.send_replace(next.clone());
        if previous != next {
            info!(from = ?previous, to = ?next, "watch state changed");
        }
    }
}

fn log_stopped(report: &RunReport) {
    match &report.error {
        None | Some(RunError::CancellationExceeded) => {
            info!(peers = report.results.len(), "local peers stopped");
        }
        Some(e) => warn!(error = %e, "local peers failed while stopping"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use swarm_core::{HostList, PeerId, PeerList};

    /// Records every plan it is given. When `block` is set a run lasts until
    /// its context fires.
    struct Recorder {
        block: bool,
        calls: Mutex<Vec<Vec<ProcSpec>>>,
    }

    impl Recorder {
        fn new(block: bool) -> Arc<Self> {
            Arc::new(Self {
                block,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn checkpoints(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|procs| procs[0].env[env::CHECKPOINT].clone())
                .collect()
        }
    }

    impl Runner for Recorder {
        fn run_all<'a>(
            &'a self,
            ctx: &'a RunContext,
            procs: Vec<ProcSpec>,
            _verbose: bool,
        ) -> BoxFuture<'a, RunReport> {
            Box::pin(async move {
                self.calls.lock().unwrap().push(procs);
                if self.block {
                    ctx.done().await;
                    return RunReport::cancelled();
                }
                RunReport::default()
            })
        }
    }

    fn job() -> JobConfig {
        JobConfig::new(
            PeerId::new("A", 38080),
            "A:2,B:2".parse().unwrap(),
            "worker",
            Vec::new(),
        )
    }

    fn stage(hosts: &str, np: usize, checkpoint: &str) -> Stage {
        let hl: HostList = hosts.parse().unwrap();
        Stage::new(hl.gen_peer_list(np).unwrap(), checkpoint)
    }

    fn controller(runner: Arc<Recorder>, board: &StageBoard) -> WatchController {
        WatchController::new(job(), "A", runner, Arc::new(board.clone()))
            .with_period(Duration::from_millis(10))
    }

    #[test]
    fn plan_keeps_local_share_and_tags_checkpoint() {
        let board = StageBoard::empty();
        let c = controller(Recorder::new(false), &board);
        let procs = c.plan(&stage("A:2,B:2", 3, "7")).unwrap();
        assert_eq!(procs.len(), 2);
        assert!(procs.iter().all(|p| p.peer.id.host == "A"));
        assert!(procs.iter().all(|p| p.env[env::CHECKPOINT] == "7"));
        assert_eq!(procs[0].env[env::CLUSTER_SIZE], "3");
    }

    #[tokio::test]
    async fn runs_first_stage_then_terminates() {
        let board = StageBoard::new(stage("A:2,B:2", 4, "0"));
        let runner = Recorder::new(false);
        let c = controller(runner.clone(), &board);

        let summary = c.run(&RunContext::background()).await.unwrap();
        assert_eq!(summary.runs, 1);
        assert_eq!(summary.restarts, 0);
        assert_eq!(summary.checkpoint.as_deref(), Some("0"));
        assert_eq!(runner.checkpoints(), vec!["0"]);
        assert_eq!(c.state(), WatchState::Terminated);
    }

    #[tokio::test]
    async fn idle_until_a_stage_is_pushed() {
        let board = StageBoard::empty();
        let runner = Recorder::new(false);
        let c = controller(runner.clone(), &board);
        let mut states = c.subscribe();

        let pusher = board.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            pusher.push(stage("A:1", 1, "1"));
        });

        let summary = c.run(&RunContext::background()).await.unwrap();
        assert_eq!(summary.runs, 1);
        assert_eq!(runner.checkpoints(), vec!["1"]);
        assert_eq!(*states.borrow_and_update(), WatchState::Terminated);
    }

    #[tokio::test]
    async fn checkpoint_change_restarts_local_peers() {
        let board = StageBoard::new(stage("A:2", 2, "1"));
        let runner = Recorder::new(true);
        let c = controller(runner.clone(), &board);
        let mut states = c.subscribe();
        let (ctx, handle) = RunContext::new();

        let driver = {
            let board = board.clone();
            async move {
                states
                    .wait_for(|s| matches!(s, WatchState::Running { checkpoint, .. } if checkpoint == "1"))
                    .await
                    .unwrap();
                board.push(stage("A:1,B:1", 2, "2"));
                states
                    .wait_for(|s| matches!(s, WatchState::Running { checkpoint, .. } if checkpoint == "2"))
                    .await
                    .unwrap();
                handle.cancel();
            }
        };

        let (summary, ()) = tokio::join!(c.run(&ctx), driver);
        let summary = summary.unwrap();
        assert_eq!(summary.runs, 2);
        assert_eq!(summary.restarts, 1);
        assert_eq!(runner.checkpoints(), vec!["1", "2"]);
        // The second stage leaves one peer on this host.
        assert_eq!(runner.calls.lock().unwrap()[1].len(), 1);
        assert_eq!(c.state(), WatchState::Terminated);
    }

    #[tokio::test]
    async fn keep_waits_for_a_new_stage_after_draining() {
        let board = StageBoard::new(stage("A:1", 1, "1"));
        let runner = Recorder::new(false);
        let c = controller(runner.clone(), &board).keep(true);
        let mut states = c.subscribe();
        let (ctx, handle) = RunContext::new();

        let driver = {
            let board = board.clone();
            async move {
                states
                    .wait_for(|s| matches!(s, WatchState::Draining { checkpoint } if checkpoint == "1"))
                    .await
                    .unwrap();
                board.push(stage("A:1", 1, "2"));
                states
                    .wait_for(|s| matches!(s, WatchState::Draining { checkpoint } if checkpoint == "2"))
                    .await
                    .unwrap();
                handle.cancel();
            }
        };

        let (summary, ()) = tokio::join!(c.run(&ctx), driver);
        assert_eq!(summary.unwrap().runs, 2);
        assert_eq!(runner.checkpoints(), vec!["1", "2"]);
    }

    #[tokio::test]
    async fn unusable_stage_is_skipped_until_a_valid_one_arrives() {
        let mut bad = stage("A:2", 2, "1");
        let mut peers: Vec<_> = bad.cluster.iter().cloned().collect();
        peers[0].id.host = String::new();
        bad.cluster = PeerList::new(peers);

        let board = StageBoard::new(bad);
        let runner = Recorder::new(false);
        let c = controller(runner.clone(), &board);

        let pusher = board.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            pusher.push(stage("A:1", 1, "2"));
        });

        let summary = c.run(&RunContext::background()).await.unwrap();
        assert_eq!(summary.runs, 1);
        assert_eq!(runner.checkpoints(), vec!["2"]);
    }

    #[tokio::test]
    async fn cancelled_while_idle_terminates() {
        let c = controller(Recorder::new(false), &StageBoard::empty());
        let (ctx, handle) = RunContext::new();
        handle.cancel();
        let summary = c.run(&ctx).await.unwrap();
        assert_eq!(summary.runs, 0);
        assert_eq!(c.state(), WatchState::Terminated);
    }
}
