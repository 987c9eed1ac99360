//! swarm-runner — starting, supervising and reaping worker processes.
//!
//! Two runners share one contract ([`Runner::run_all`]):
//!
//! - [`LocalRunner`] starts every [`ProcSpec`] as a child of this process.
//! - [`RemoteRunner`] starts every process on its host through a
//!   [`RemoteExec`] transport (ssh by default).
//!
//! Both wait for everything they started before returning. Cancellation is
//! expressed with a [`RunContext`]: children are asked to stop, given a
//! grace period, and only then killed.
//!
//! ```text
//! RunContext (cancel signal + deadline)
//!   └── Runner::run_all(procs)
//!         ├── task per ProcSpec ── spawn → capture → wait | stop
//!         └── RunReport { results, error }
//! ```

pub mod context;
pub mod error;
pub mod local;
pub mod process;
pub mod remote;
pub mod report;

use std::future::Future;
use std::pin::Pin;

pub use context::{CancelHandle, Cancelled, RunContext};
pub use error::RunError;
pub use local::LocalRunner;
pub use process::ProcOutput;
pub use remote::{RemoteExec, RemoteOutput, RemoteRunner, SshExec};
pub use report::{measure, ProcResult, RunReport};

use swarm_core::ProcSpec;

/// Boxed future returned by the runner seams.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Anything that can execute a process plan.
pub trait Runner: Send + Sync {
    /// Run every process concurrently and wait for all of them.
    fn run_all<'a>(
        &'a self,
        ctx: &'a RunContext,
        procs: Vec<ProcSpec>,
        verbose: bool,
    ) -> BoxFuture<'a, RunReport>;
}
