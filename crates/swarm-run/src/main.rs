//! swarm-run — launch, reconfigure and sweep distributed jobs.
//!
//! # Usage
//!
//! ```text
//! swarm-run run -H 10.0.0.1:4,10.0.0.2:4 --np 8 --self 10.0.0.1 -- python3 train.py
//! swarm-run run -w -k -H 10.0.0.1:4 --np 4 -- python3 train.py
//! swarm-run push --parent 10.0.0.1:38080 -H 10.0.0.1:4,10.0.0.2:4 --np 8 --checkpoint 1
//! swarm-run sweep -H 10.0.0.1:4,10.0.0.2:4 -u ubuntu --timeout 90s -- python3 bench.py
//! ```

use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand};
use tracing::info;

use swarm_core::SwarmConfig;

mod commands;

use commands::config::ConfigArgs;
use commands::push::PushArgs;
use commands::run::RunArgs;
use commands::sweep::SweepArgs;

#[derive(Parser)]
#[command(
    name = "swarm-run",
    about = "swarm — distributed job launcher and topology sweeper",
    version,
    propagate_version = true
)]
struct Cli {
    /// Path to a swarm.toml config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run this node's share of a job, optionally watching for new stages.
    Run(RunArgs),
    /// Push a new stage to a watching node's control plane.
    Push(PushArgs),
    /// Run every (strategy × partition) experiment on a shared host pool.
    Sweep(SweepArgs),
    /// Print or write a config file with every default filled in.
    Config(ConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,swarm=debug")),
        )
        .init();

    let cli = Cli::parse();
    let config = SwarmConfig::load(cli.config.as_deref())?;

    let t0 = Instant::now();
    let result = match cli.command {
        Command::Run(args) => commands::run::run(args, &config).await,
        Command::Push(args) => commands::push::push(args, &config).await,
        Command::Sweep(args) => commands::sweep::sweep(args, &config).await,
        Command::Config(args) => commands::config::config(args),
    };
    info!("swarm-run took {:?}", t0.elapsed());
    result
}
