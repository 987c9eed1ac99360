//! The sweep driver.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{error, info, warn};

use swarm_core::config::{default_partitions, default_strategies, DEFAULT_POLL_INTERVAL};
use swarm_core::{humanize_hosts, HostList, Strategy};
use swarm_runner::{RunContext, Runner};

use crate::experiment::{run_experiment, Experiment, ExperimentSettings};
use crate::pool::HostPool;
use crate::results::{ExperimentRecord, ResultLog};

/// Outcome of a sweep. A sweep never fails as a whole; it only ends up
/// complete or partial.
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub records: Vec<ExperimentRecord>,
    /// Experiments that were started.
    pub attempted: usize,
    /// Experiments that could never fit in the pool.
    pub skipped: usize,
    /// Started experiments that produced no record.
    pub failed: usize,
}

impl SweepReport {
    /// Every started experiment produced a record.
    pub fn is_complete(&self) -> bool {
        self.failed == 0 && self.records.len() == self.attempted
    }
}

pub struct Sweep {
    pool: HostPool,
    runner: Arc<dyn Runner>,
    settings: Arc<ExperimentSettings>,
    strategies: Vec<Strategy>,
    partitions: Vec<Vec<usize>>,
    poll_interval: Duration,
}

impl Sweep {
    pub fn new(hosts: HostList, runner: Arc<dyn Runner>, settings: ExperimentSettings) -> Self {
        Self {
            pool: HostPool::new(hosts),
            runner,
            settings: Arc::new(settings),
            strategies: default_strategies(),
            partitions: default_partitions(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_strategies(mut self, strategies: Vec<Strategy>) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn with_partitions(mut self, partitions: Vec<Vec<usize>>) -> Self {
        self.partitions = partitions;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn pool(&self) -> &HostPool {
        &self.pool
    }

    /// Every (strategy, partition) pair, strategy-major.
    pub fn experiments(&self) -> Vec<Experiment> {
        self.strategies
            .iter()
            .flat_map(|&s| self.partitions.iter().map(move |p| Experiment::new(s, p.clone())))
            .collect()
    }

    /// Run every experiment that fits the pool, concurrently, and collect
    /// whatever records they produce.
    pub async fn run(&self, ctx: &RunContext) -> SweepReport {
        let log = Arc::new(ResultLog::new());
        let mut report = SweepReport::default();
        let mut tasks = JoinSet::new();

        for experiment in self.experiments() {
            if experiment.hosts_needed() > self.pool.capacity() {
                info!(
                    %experiment,
                    needed = experiment.hosts_needed(),
                    pool = self.pool.capacity(),
                    "skipping experiment, not enough hosts in total"
                );
                report.skipped += 1;
                continue;
            }
            report.attempted += 1;

            let pool = self.pool.clone();
            let runner = Arc::clone(&self.runner);
            let settings = Arc::clone(&self.settings);
            let log = Arc::clone(&log);
            let ctx = ctx.clone();
            let poll_interval = self.poll_interval;

            tasks.spawn(async move {
                let lease = match pool
                    .require_n(experiment.hosts_needed(), &ctx, poll_interval)
                    .await
                {
                    Ok(lease) => lease,
                    Err(e) => {
                        warn!(%experiment, error = %e, "failed experiment");
                        return false;
                    }
                };
                let hosts = humanize_hosts(lease.hosts());
                info!(%experiment, %hosts, "begin experiment");

                match run_experiment(&ctx, runner.as_ref(), lease.hosts(), &experiment, &settings).await {
                    Ok(result) => {
                        let record = ExperimentRecord {
                            partition: experiment.partition.clone(),
                            strategy: experiment.strategy,
                            result,
                        };
                        info!(%experiment, %hosts, %record, "end experiment");
                        let count = log.append(record);
                        info!(count, "got results from {count} experiments");
                        true
                    }
                    Err(e) => {
                        warn!(%experiment, %hosts, error = %e, "failed experiment");
                        false
                    }
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(true) => {}
                Ok(false) => report.failed += 1,
                Err(e) => {
                    error!(error = %e, "experiment task panicked");
                    report.failed += 1;
                }
            }
        }

        report.records = log.snapshot();
        info!(
            records = report.records.len(),
            attempted = report.attempted,
            skipped = report.skipped,
            failed = report.failed,
            "sweep finished"
        );
        report
    }
}
