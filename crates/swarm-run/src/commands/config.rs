//! `swarm-run config` — emit a fully populated swarm.toml.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use tracing::info;

use swarm_core::SwarmConfig;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Write to this file instead of stdout.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

pub fn config(args: ConfigArgs) -> anyhow::Result<()> {
    let rendered = SwarmConfig::scaffold().to_toml_string()?;
    match args.output {
        Some(path) => {
            std::fs::write(&path, &rendered)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(path = %path.display(), "config written");
        }
        None => print!("{rendered}"),
    }
    Ok(())
}
