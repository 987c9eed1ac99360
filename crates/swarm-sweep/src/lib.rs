//! swarm-sweep — run many job topologies against one finite set of hosts.
//!
//! Every (strategy × partition) pair becomes an experiment task. A task
//! borrows exactly as many whole hosts as its partition has entries from the
//! shared [`HostPool`], shrinks each host to the partition's slot count, runs
//! the job under a timeout, and scrapes a throughput line from the output
//! into the shared [`ResultLog`].
//!
//! # Architecture
//!
//! ```text
//!               ┌──────────────────────────────┐
//!               │ HostPool (one gate)          │
//!               │ require_n: check + take      │
//!               └───────▲──────────────┬───────┘
//!        HostLease drop │              │ HostLease
//!                       │              ▼
//!  Sweep ──spawn──▶ experiment task ──reschedule──▶ JobConfig ──▶ Runner
//!                       │
//!                       └──scrape──▶ ResultLog ──▶ SweepReport
//! ```

pub mod error;
pub mod experiment;
pub mod pool;
pub mod results;
pub mod sweep;

pub use error::{ExperimentError, PoolError};
pub use experiment::{reschedule, run_experiment, Experiment, ExperimentSettings};
pub use pool::{HostLease, HostPool};
pub use results::{ExperimentRecord, Measurement, MetricPattern, ResultLog};
pub use sweep::{Sweep, SweepReport};
