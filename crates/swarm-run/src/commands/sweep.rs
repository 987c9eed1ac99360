//! `swarm-run sweep` — run the (strategy × partition) grid on remote hosts.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{ArgAction, Args};
use tracing::info;

use swarm_core::config::parse_duration;
use swarm_core::{HostList, Strategy, SwarmConfig};
use swarm_runner::{LocalRunner, RemoteRunner, Runner};
use swarm_sweep::{ExperimentSettings, MetricPattern, Sweep, SweepReport};

use super::{root_context, split_program};

/// Per-host slot counts, written `1,3`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition(pub Vec<usize>);

impl FromStr for Partition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let slots = s
            .split(',')
            .map(|p| match p.trim().parse::<usize>() {
                Ok(n) if n > 0 => Ok(n),
                _ => Err(format!("invalid slot count {p:?} in partition {s:?}")),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Partition(slots))
    }
}

#[derive(Args, Debug)]
pub struct SweepArgs {
    /// Hosts as `addr[:slots[:public_addr]],...`; one pool entry per host.
    #[arg(short = 'H', long = "hosts")]
    pub hosts: HostList,

    /// Remote user for ssh.
    #[arg(short = 'u', long)]
    pub user: Option<String>,

    /// Per-experiment timeout.
    #[arg(long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Strategy to sweep; repeat for several (default: SIMPLE RING CLIQUE TREE).
    #[arg(long = "strategy")]
    pub strategies: Vec<Strategy>,

    /// Partition to sweep, e.g. `2,2`; repeat for several.
    #[arg(long = "partition")]
    pub partitions: Vec<Partition>,

    /// Echo worker output.
    #[arg(short, long, action = ArgAction::Set)]
    pub verbose: Option<bool>,

    /// Start workers as local children instead of over ssh.
    #[arg(long)]
    pub local: bool,

    /// Program and arguments each experiment runs.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub command: Vec<String>,
}

pub async fn sweep(args: SweepArgs, config: &SwarmConfig) -> anyhow::Result<()> {
    let (program, prog_args) = split_program(args.command.clone())?;
    let timeout = match args.timeout {
        Some(t) => t,
        None => config.sweep_timeout()?,
    };
    let strategies = if args.strategies.is_empty() {
        config.strategies()?
    } else {
        args.strategies.clone()
    };
    let partitions = if args.partitions.is_empty() {
        config.partitions()
    } else {
        args.partitions.iter().map(|p| p.0.clone()).collect()
    };

    let settings = ExperimentSettings::new(program, prog_args)?
        .with_timeout(timeout)
        .with_pattern(MetricPattern::new(config.metric_label()).context("invalid metric label")?)
        .with_control_port(config.port())
        .with_verbose(args.verbose.unwrap_or_else(|| config.verbose()));

    let runner: Arc<dyn Runner> = if args.local {
        Arc::new(LocalRunner::new())
    } else {
        let user = args
            .user
            .clone()
            .or_else(|| config.ssh_user().map(str::to_string))
            .unwrap_or_default();
        Arc::new(RemoteRunner::ssh(user, config.ssh_options()))
    };

    info!("using host spec: {}", args.hosts);
    info!(hosts = %args.hosts.humanize(), ?timeout, "starting sweep");

    let sweep = Sweep::new(args.hosts.clone(), runner, settings)
        .with_strategies(strategies)
        .with_partitions(partitions)
        .with_poll_interval(config.poll_interval()?);
    let report = sweep.run(&root_context(None)).await;

    print!("{}", render(&report));
    Ok(())
}

fn render(report: &SweepReport) -> String {
    let mut out = format!("all results ({} records):\n", report.records.len());
    for (i, r) in report.records.iter().enumerate() {
        out.push_str(&format!("#{i} {r}\n"));
    }
    let status = if report.is_complete() { "complete" } else { "partial" };
    out.push_str(&format!(
        "sweep {status}: {}/{} experiments produced results, {} failed, {} skipped\n",
        report.records.len(),
        report.attempted,
        report.failed,
        report.skipped
    ));
    out
}
