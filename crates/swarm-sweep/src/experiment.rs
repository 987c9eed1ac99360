//! One experiment: a strategy on a partition of borrowed hosts.

use std::fmt;
use std::time::Duration;

use tracing::info;

use swarm_core::config::{DEFAULT_CONTROL_PORT, DEFAULT_METRIC_LABEL, DEFAULT_SWEEP_TIMEOUT};
use swarm_core::{HostList, HostRecord, JobConfig, PeerId, Strategy};
use swarm_runner::{measure, RunContext, Runner};

use crate::error::ExperimentError;
use crate::results::{Measurement, MetricPattern};

/// A (strategy, partition) pair. `partition[i]` is the slot count used on
/// the i-th borrowed host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Experiment {
    pub strategy: Strategy,
    pub partition: Vec<usize>,
}

impl Experiment {
    pub fn new(strategy: Strategy, partition: Vec<usize>) -> Self {
        Self { strategy, partition }
    }

    /// Whole hosts the experiment borrows.
    pub fn hosts_needed(&self) -> usize {
        self.partition.len()
    }
}

impl fmt::Display for Experiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{} {:?}}}", self.strategy, self.partition)
    }
}

/// What every experiment of a sweep runs, and how it is judged.
#[derive(Debug, Clone)]
pub struct ExperimentSettings {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
    pub pattern: MetricPattern,
    /// Control port advertised to workers as their parent endpoint.
    pub control_port: u16,
    pub verbose: bool,
}

impl ExperimentSettings {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Result<Self, regex::Error> {
        Ok(Self {
            program: program.into(),
            args,
            timeout: DEFAULT_SWEEP_TIMEOUT,
            pattern: MetricPattern::new(DEFAULT_METRIC_LABEL)?,
            control_port: DEFAULT_CONTROL_PORT,
            verbose: false,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_pattern(mut self, pattern: MetricPattern) -> Self {
        self.pattern = pattern;
        self
    }

    pub fn with_control_port(mut self, port: u16) -> Self {
        self.control_port = port;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

/// Shrink the first `partition.len()` hosts to the partition's slot counts.
pub fn reschedule(hosts: &[HostRecord], partition: &[usize]) -> Result<HostList, ExperimentError> {
    if partition.is_empty() || partition.contains(&0) {
        return Err(ExperimentError::InvalidPartition(partition.to_vec()));
    }
    if hosts.len() < partition.len() {
        return Err(ExperimentError::NotEnoughHosts {
            needed: partition.len(),
            got: hosts.len(),
        });
    }

    let workers = hosts
        .iter()
        .zip(partition)
        .map(|(host, &slots)| {
            if host.capacity < slots {
                return Err(ExperimentError::HostTooSmall {
                    address: host.address.clone(),
                    capacity: host.capacity,
                    requested: slots,
                });
            }
            let mut worker = host.clone();
            worker.capacity = slots;
            Ok(worker)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(HostList::new(workers)?)
}

/// Run `experiment` on `hosts` and scrape its measurement.
///
/// The run is bounded by the settings' timeout; a timeout is a failed
/// experiment like any other.
pub async fn run_experiment(
    ctx: &RunContext,
    runner: &dyn Runner,
    hosts: &[HostRecord],
    experiment: &Experiment,
    settings: &ExperimentSettings,
) -> Result<Measurement, ExperimentError> {
    let workers = reschedule(hosts, &experiment.partition)?;
    let np = workers.total_capacity();
    let peers = workers.gen_peer_list(np)?;

    // reschedule never returns an empty list.
    let parent_host = workers
        .iter()
        .next()
        .map(|h| h.address.clone())
        .unwrap_or_default();
    let job = JobConfig::new(
        PeerId::new(parent_host, settings.control_port),
        workers,
        settings.program.clone(),
        settings.args.clone(),
    );
    let procs = job.create_procs(&peers, experiment.strategy)?;

    let ctx = ctx.with_timeout(settings.timeout);
    let (report, took) = measure(runner.run_all(&ctx, procs, settings.verbose)).await;
    info!(%experiment, tasks = np, ?took, "all {np} tasks finished, took {took:?}");

    let result = settings.pattern.scrape(report.stdout_lines());
    if let Some(e) = report.error {
        return Err(e.into());
    }
    result.ok_or_else(|| ExperimentError::MissingResult {
        label: settings.pattern.label().to_string(),
    })
}
