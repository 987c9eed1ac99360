//! swarm-core — the deterministic half of the launcher.
//!
//! Everything here is a pure function of its inputs: parsing a host spec,
//! placing peers onto hosts, and turning a job description into per-process
//! launch specs. Every node of a cluster recomputes the same plan from the
//! same inputs, so nothing in this crate may depend on iteration order of
//! hashed collections, clocks, or randomness.
//!
//! # Flow
//!
//! ```text
//! "10.0.0.1:4,10.0.0.2:4"  ──parse──▶ HostList
//! HostList + np           ──place──▶ PeerList (rank → host:port)
//! JobConfig + PeerList    ──build──▶ Vec<ProcSpec> ──for_host──▶ local share
//! ```

pub mod config;
pub mod error;
pub mod host;
pub mod job;
pub mod peer;
pub mod stage;
pub mod strategy;

pub use config::SwarmConfig;
pub use error::{BuildError, ConfigError, ParseError, PlanError};
pub use host::{humanize_hosts, HostList, HostRecord, DEFAULT_PORT_BASE};
pub use job::{for_host, JobConfig, ProcSpec};
pub use peer::{Peer, PeerId, PeerList};
pub use stage::Stage;
pub use strategy::Strategy;
