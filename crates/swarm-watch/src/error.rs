use swarm_core::BuildError;
use swarm_runner::RunError;

/// Errors from the control plane and the watch controller.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("control plane {endpoint} unreachable: {reason}")]
    Unreachable { endpoint: String, reason: String },

    #[error("control plane {endpoint} answered {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("invalid stage payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("failed to build plan for stage: {0}")]
    Build(#[from] BuildError),

    #[error("local peers failed: {0}")]
    Run(#[from] RunError),

    #[error("control plane server error: {0}")]
    Serve(#[from] std::io::Error),
}

pub type WatchResult<T> = Result<T, WatchError>;
