use swarm_core::{BuildError, ParseError, PlanError};
use swarm_runner::{Cancelled, RunError};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PoolError {
    #[error("requested {requested} hosts but the pool only holds {capacity}")]
    Exceeds { requested: usize, capacity: usize },

    #[error("gave up waiting for {requested} hosts ({reason:?})")]
    Cancelled { requested: usize, reason: Cancelled },
}

/// Why a single experiment produced no record.
#[derive(Debug, thiserror::Error)]
pub enum ExperimentError {
    #[error("partition needs {needed} hosts, got {got}")]
    NotEnoughHosts { needed: usize, got: usize },

    #[error("host {address} has {capacity} slots, partition wants {requested}")]
    HostTooSmall {
        address: String,
        capacity: usize,
        requested: usize,
    },

    #[error("invalid partition {0:?}")]
    InvalidPartition(Vec<usize>),

    #[error(transparent)]
    Hosts(#[from] ParseError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Run(#[from] RunError),

    #[error("no line matching {label:?} in output")]
    MissingResult { label: String },
}
