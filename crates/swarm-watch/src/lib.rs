//! swarm-watch — reconfigure a running job without restarting the cluster.
//!
//! A node in watch mode owns a [`StageBoard`]: a single slot holding the
//! latest desired [`Stage`](swarm_core::Stage). The board is served over
//! HTTP so a driving process can push a new stage, and a
//! [`WatchController`] polls a [`StageSource`] and restarts the node's
//! local share of the job whenever the checkpoint changes.
//!
//! # Architecture
//!
//! ```text
//!  swarm-run push ──PUT /stage──▶ ┌────────────┐
//!                                 │ StageBoard │ (latest wins)
//!  peers / tools ──GET /stage──▶  └─────┬──────┘
//!                                       │ StageSource::latest()
//!                                       ▼
//!                              ┌──────────────────┐   run_all   ┌────────┐
//!                              │ WatchController  │ ──────────▶ │ Runner │
//!                              │ Idle → Running → │ ◀── cancel ─│        │
//!                              │ Draining → Term. │             └────────┘
//!                              └──────────────────┘
//! ```

pub mod board;
pub mod client;
pub mod controller;
pub mod error;
pub mod server;

pub use board::StageBoard;
pub use client::StageClient;
pub use controller::{StageSource, WatchController, WatchState, WatchSummary};
pub use error::{WatchError, WatchResult};
pub use server::{build_router, serve};
