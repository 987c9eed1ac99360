//! Job plans — turning a job description into per-process launch specs.
//!
//! Building the plan is pure, so the same plan feeds the local runner, the
//! remote runner and the watch controller. Each node then keeps only its
//! own share with [`for_host`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::BuildError;
use crate::host::HostList;
use crate::peer::{Peer, PeerId, PeerList};
use crate::strategy::Strategy;

/// Environment variable names of the worker contract.
pub mod env {
    pub const PARENT: &str = "SWARM_PARENT";
    pub const SELF_ID: &str = "SWARM_SELF";
    pub const RANK: &str = "SWARM_RANK";
    pub const LOCAL_RANK: &str = "SWARM_LOCAL_RANK";
    pub const CLUSTER_SIZE: &str = "SWARM_CLUSTER_SIZE";
    pub const PEERS: &str = "SWARM_PEERS";
    pub const STRATEGY: &str = "SWARM_STRATEGY";
    pub const CHECKPOINT: &str = "SWARM_CHECKPOINT";
}

/// Everything needed to materialize a job's process plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Control endpoint of the launching node.
    pub parent: PeerId,
    pub hosts: HostList,
    pub program: String,
    pub args: Vec<String>,
}

/// Launch instructions for one worker process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcSpec {
    pub peer: Peer,
    pub program: String,
    pub args: Vec<String>,
    /// Worker environment, ordered for reproducible command lines.
    pub env: BTreeMap<String, String>,
    /// Address used to reach the peer's host from the launcher.
    pub launch_host: String,
}

impl ProcSpec {
    /// Short identity used in logs and output prefixes.
    pub fn name(&self) -> String {
        self.peer.to_string()
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

impl JobConfig {
    pub fn new(parent: PeerId, hosts: HostList, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            parent,
            hosts,
            program: program.into(),
            args,
        }
    }

    /// Build one [`ProcSpec`] per peer, in rank order.
    pub fn create_procs(&self, peers: &PeerList, strategy: Strategy) -> Result<Vec<ProcSpec>, BuildError> {
        if self.program.trim().is_empty() {
            return Err(BuildError::MissingProgram);
        }
        if peers.is_empty() {
            return Err(BuildError::EmptyPeerList);
        }
        if !self.parent.is_valid() {
            return Err(BuildError::InvalidEndpoint(self.parent.to_string()));
        }
        if let Some(bad) = peers.iter().find(|p| !p.id.is_valid()) {
            return Err(BuildError::InvalidEndpoint(bad.id.to_string()));
        }

        let table = peers.to_env_value();
        let procs = peers
            .iter()
            .map(|peer| {
                let mut env = BTreeMap::new();
                env.insert(env::PARENT.to_string(), self.parent.to_string());
                env.insert(env::SELF_ID.to_string(), peer.id.to_string());
                env.insert(env::RANK.to_string(), peer.rank.to_string());
                env.insert(env::LOCAL_RANK.to_string(), peer.local_rank.to_string());
                env.insert(env::CLUSTER_SIZE.to_string(), peer.cluster_size.to_string());
                env.insert(env::PEERS.to_string(), table.clone());
                env.insert(env::STRATEGY.to_string(), strategy.to_string());

                ProcSpec {
                    peer: peer.clone(),
                    program: self.program.clone(),
                    args: self.args.clone(),
                    env,
                    launch_host: self.launch_host_for(&peer.id.host),
                }
            })
            .collect();

        Ok(procs)
    }

    fn launch_host_for(&self, host: &str) -> String {
        self.hosts
            .iter()
            .find(|h| h.address == host)
            .map(|h| h.launch_address().to_string())
            .unwrap_or_else(|| host.to_string())
    }
}

/// The specs whose peer lives on `host`, in rank order.
pub fn for_host(host: &str, procs: &[ProcSpec]) -> Vec<ProcSpec> {
    procs
        .iter()
        .filter(|p| p.peer.id.host == host)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(hosts: &str) -> JobConfig {
        JobConfig::new(
            PeerId::new("10.0.0.1", 38080),
            hosts.parse().unwrap(),
            "python3",
            vec!["train.py".to_string()],
        )
    }

    #[test]
    fn create_procs_encodes_environment() {
        let jc = job("A:2,B:2");
        let peers = jc.hosts.gen_peer_list(3).unwrap();
        let procs = jc.create_procs(&peers, Strategy::Ring).unwrap();
        assert_eq!(procs.len(), 3);

        let last = &procs[2];
        assert_eq!(last.env[env::RANK], "2");
        assert_eq!(last.env[env::LOCAL_RANK], "0");
        assert_eq!(last.env[env::CLUSTER_SIZE], "3");
        assert_eq!(last.env[env::SELF_ID], "B:10000");
        assert_eq!(last.env[env::PARENT], "10.0.0.1:38080");
        assert_eq!(last.env[env::PEERS], "A:10000,A:10001,B:10000");
        assert_eq!(last.env[env::STRATEGY], "RING");
        assert_eq!(last.program, "python3");
        assert_eq!(last.args, vec!["train.py"]);
    }

    #[test]
    fn create_procs_uses_public_address_for_launch() {
        let jc = job("A:1:pub-a,B:1");
        let peers = jc.hosts.gen_peer_list(2).unwrap();
        let procs = jc.create_procs(&peers, Strategy::default()).unwrap();
        assert_eq!(procs[0].launch_host, "pub-a");
        assert_eq!(procs[1].launch_host, "B");
    }

    #[test]
    fn create_procs_rejects_empty_and_invalid() {
        let jc = job("A:2");
        assert_eq!(
            jc.create_procs(&PeerList::default(), Strategy::Ring),
            Err(BuildError::EmptyPeerList)
        );

        let bad = PeerList::new(vec![Peer {
            id: PeerId::new("bad host", 10000),
            rank: 0,
            local_rank: 0,
            cluster_size: 1,
        }]);
        assert!(matches!(
            jc.create_procs(&bad, Strategy::Ring),
            Err(BuildError::InvalidEndpoint(_))
        ));

        let mut no_prog = job("A:1");
        no_prog.program = String::new();
        let peers = no_prog.hosts.gen_peer_list(1).unwrap();
        assert_eq!(
            no_prog.create_procs(&peers, Strategy::Ring),
            Err(BuildError::MissingProgram)
        );
    }

    #[test]
    fn for_host_partitions_the_plan() {
        let jc = job("A:2,B:3,C:1");
        let peers = jc.hosts.gen_peer_list(6).unwrap();
        let procs = jc.create_procs(&peers, Strategy::Tree).unwrap();

        let mut union = Vec::new();
        for host in jc.hosts.iter() {
            let share = for_host(&host.address, &procs);
            assert!(share.iter().all(|p| p.peer.id.host == host.address));
            union.extend(share);
        }
        union.sort_by_key(|p| p.peer.rank);
        assert_eq!(union, procs);
    }

    #[test]
    fn for_host_unknown_host_is_empty() {
        let jc = job("A:2");
        let peers = jc.hosts.gen_peer_list(2).unwrap();
        let procs = jc.create_procs(&peers, Strategy::Tree).unwrap();
        assert!(for_host("Z", &procs).is_empty());
    }

    #[test]
    fn with_env_overrides() {
        let jc = job("A:1");
        let peers = jc.hosts.gen_peer_list(1).unwrap();
        let p = jc.create_procs(&peers, Strategy::Tree).unwrap().remove(0);
        let p = p.with_env(env::CHECKPOINT, "7");
        assert_eq!(p.env[env::CHECKPOINT], "7");
        assert_eq!(p.name(), "0@A:10000");
    }
}
