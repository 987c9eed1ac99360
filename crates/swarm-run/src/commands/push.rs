//! `swarm-run push` — hand a watching node its next stage.

use anyhow::Context;
use clap::Args;
use tracing::info;

use swarm_core::{HostList, PeerId, Stage, SwarmConfig};
use swarm_watch::StageClient;

#[derive(Args, Debug)]
pub struct PushArgs {
    /// Control-plane endpoint of the watching node, `host:port`.
    #[arg(long)]
    pub parent: PeerId,

    /// New cluster hosts as `addr[:slots[:public_addr]],...`.
    #[arg(short = 'H', long = "hosts")]
    pub hosts: HostList,

    /// Number of peers in the new cluster.
    #[arg(long)]
    pub np: usize,

    /// Checkpoint marker of the new stage; must differ from the running one.
    #[arg(long)]
    pub checkpoint: String,
}

pub async fn push(args: PushArgs, config: &SwarmConfig) -> anyhow::Result<()> {
    let peers = args
        .hosts
        .gen_peer_list_from(args.np, config.port_base())
        .context("failed to create peers")?;
    let stage = Stage::new(peers, args.checkpoint);

    StageClient::new(args.parent.clone())
        .push_stage(&stage)
        .await
        .with_context(|| format!("failed to push stage to {}", args.parent))?;

    info!(
        parent = %args.parent,
        checkpoint = %stage.checkpoint,
        cluster = stage.cluster.len(),
        "stage pushed"
    );
    Ok(())
}
