//! Runner error types.

use thiserror::Error;

/// Errors produced while executing a process plan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    /// The run was cancelled or hit its deadline. Not a job failure.
    #[error("cancelled or deadline exceeded")]
    CancellationExceeded,

    #[error("peer {peer} exited with code {exit_code}")]
    ProcessFailure { peer: String, exit_code: i32 },

    #[error("peer {peer} was killed by signal {signal}")]
    Signalled { peer: String, signal: i32 },

    #[error("transport failure reaching {host}: {reason}")]
    TransportFailure { host: String, reason: String },

    #[error("failed to start peer {peer}: {reason}")]
    Spawn { peer: String, reason: String },

    /// The task supervising a peer panicked; the peer's outcome is unknown.
    #[error("runner task for peer {peer} panicked: {reason}")]
    TaskPanicked { peer: String, reason: String },
}

impl RunError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, RunError::CancellationExceeded)
    }
}
