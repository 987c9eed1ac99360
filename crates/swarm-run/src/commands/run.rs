//! `swarm-run run` — the simple and watch launch paths.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{ArgAction, Args};
use tokio::sync::watch;
use tracing::info;

use swarm_core::config::parse_duration;
use swarm_core::{for_host, HostList, JobConfig, PeerId, Stage, Strategy, SwarmConfig};
use swarm_runner::{measure, LocalRunner, RunError, Runner};
use swarm_watch::{StageBoard, StageClient, StageSource, WatchController};

use super::{default_np, root_context, split_program};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Number of peers in the job (default: one per CPU).
    #[arg(long)]
    pub np: Option<usize>,

    /// Hosts as `addr[:slots[:public_addr]],...` (default: 127.0.0.1:<np>).
    #[arg(short = 'H', long = "hosts")]
    pub hosts: Option<HostList>,

    /// This node's internal address.
    #[arg(long = "self", default_value = "127.0.0.1")]
    pub self_host: String,

    /// Stop the job after this long, e.g. `30s` (a timeout is not a failure).
    #[arg(long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Echo worker output.
    #[arg(short, long, action = ArgAction::Set)]
    pub verbose: Option<bool>,

    /// Collective strategy tag handed to workers.
    #[arg(long)]
    pub algo: Option<Strategy>,

    /// Control-plane port of this node.
    #[arg(long)]
    pub port: Option<u16>,

    /// Watch for stage changes instead of running once.
    #[arg(short = 'w', long)]
    pub watch: bool,

    /// Stage polling period in watch mode.
    #[arg(long, value_parser = parse_duration)]
    pub watch_period: Option<Duration>,

    /// Keep watching after the local peers exit.
    #[arg(short = 'k', long)]
    pub keep: bool,

    /// Checkpoint of the initial stage in watch mode.
    #[arg(long, default_value = "0")]
    pub checkpoint: String,

    /// Poll another node's control plane instead of this node's own.
    #[arg(long)]
    pub parent: Option<PeerId>,

    /// Program and arguments to run.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub command: Vec<String>,
}

pub async fn run(args: RunArgs, config: &SwarmConfig) -> anyhow::Result<()> {
    let (program, prog_args) = split_program(args.command.clone())?;
    let np = args.np.unwrap_or_else(default_np);
    let hosts = args.hosts.clone().unwrap_or_else(|| HostList::localhost(np));
    let port = args.port.unwrap_or_else(|| config.port());
    let verbose = args.verbose.unwrap_or_else(|| config.verbose());
    let timeout = match args.timeout {
        Some(t) => Some(t),
        None => config.launch_timeout()?,
    };

    info!(self_host = %args.self_host, hosts = %hosts, np, "using self host");
    let job = JobConfig::new(
        PeerId::new(args.self_host.clone(), port),
        hosts,
        program,
        prog_args,
    );
    let peers = job
        .hosts
        .gen_peer_list_from(np, config.port_base())
        .context("failed to create peers")?;

    let ctx = root_context(timeout);
    let strategy = args.algo.unwrap_or_default();

    if args.watch {
        let period = match args.watch_period {
            Some(p) => p,
            None => config.watch_period()?,
        };
        return watch_run(&args, job, Stage::new(peers, args.checkpoint.clone()), strategy, period, verbose, &ctx)
            .await;
    }

    let procs = job
        .create_procs(&peers, strategy)
        .context("failed to create tasks")?;
    simple_run(&args.self_host, &job, procs, verbose, &ctx).await
}

async fn simple_run(
    self_host: &str,
    job: &JobConfig,
    procs: Vec<swarm_core::ProcSpec>,
    verbose: bool,
    ctx: &swarm_runner::RunContext,
) -> anyhow::Result<()> {
    let mine = for_host(self_host, &procs);
    if mine.is_empty() {
        info!("no task to run on this node");
        return Ok(());
    }

    info!(
        "will parallel run {} instances of {} with {:?}",
        mine.len(),
        job.program,
        job.args
    );
    let local = mine.len();
    let (report, took) = measure(LocalRunner::new().run_all(ctx, mine, verbose)).await;
    info!("all {}/{} local peers finished, took {:?}", local, procs.len(), took);

    match report.error {
        None => Ok(()),
        Some(RunError::CancellationExceeded) => {
            info!("job stopped before completion (timeout or cancellation)");
            Ok(())
        }
        Some(e) => Err(e).context("job failed"),
    }
}

async fn watch_run(
    args: &RunArgs,
    job: JobConfig,
    initial: Stage,
    strategy: Strategy,
    period: Duration,
    verbose: bool,
    ctx: &swarm_runner::RunContext,
) -> anyhow::Result<()> {
    let board = StageBoard::new(initial);
    let addr = SocketAddr::from(([0, 0, 0, 0], job.parent.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind control plane on {addr}"))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(swarm_watch::serve(listener, board.clone(), shutdown_rx));

    let source: Arc<dyn StageSource> = match &args.parent {
        Some(parent) => {
            info!(%parent, "watching remote control plane");
            Arc::new(StageClient::new(parent.clone()))
        }
        None => Arc::new(board),
    };

    let controller = WatchController::new(job, args.self_host.clone(), Arc::new(LocalRunner::new()), source)
        .with_strategy(strategy)
        .with_period(period)
        .keep(args.keep)
        .verbose(verbose);
    let outcome = controller.run(ctx).await;

    shutdown_tx.send_replace(true);
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "control plane stopped with error"),
        Err(e) => tracing::warn!(error = %e, "control plane task failed"),
    }

    let summary = outcome.context("watch run failed")?;
    info!(
        runs = summary.runs,
        restarts = summary.restarts,
        checkpoint = ?summary.checkpoint,
        "watch finished"
    );
    if summary.runs == 0 && !ctx.is_done() {
        bail!("no stage was ever run");
    }
    Ok(())
}
