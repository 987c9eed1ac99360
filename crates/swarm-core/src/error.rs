//! Pre-flight error types.
//!
//! All of these are raised before any process is started, so callers
//! treat them as fatal for the whole invocation.

use thiserror::Error;

/// Malformed textual input: host specs, peer ids, strategy names, durations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty host entry at position {0}")]
    EmptyEntry(usize),

    #[error("invalid host entry {token:?}: {reason}")]
    InvalidHost { token: String, reason: String },

    #[error("invalid capacity {value:?} in host entry {token:?}")]
    InvalidCapacity { token: String, value: String },

    #[error("duplicate host address {0:?}")]
    DuplicateHost(String),

    #[error("invalid peer id {0:?}, expected host:port")]
    InvalidPeerId(String),

    #[error("unknown strategy {name:?}, options are: {options}")]
    UnknownStrategy { name: String, options: String },

    #[error("invalid duration {0:?}")]
    InvalidDuration(String),
}

/// Peer placement failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("insufficient capacity: requested {requested} peers, hosts offer {available} slots")]
    InsufficientCapacity { requested: usize, available: usize },

    #[error("port overflow: base {base} + local rank {local_rank} exceeds 65535")]
    PortOverflow { base: u16, local_rank: usize },
}

/// Process plan construction failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("empty peer list")]
    EmptyPeerList,

    #[error("invalid peer endpoint {0}")]
    InvalidEndpoint(String),

    #[error("missing program name")]
    MissingProgram,
}

/// Config file loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid config value: {0}")]
    Invalid(#[from] ParseError),
}
