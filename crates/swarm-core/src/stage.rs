//! Stages — the desired cluster plus a checkpoint marker.

use serde::{Deserialize, Serialize};

use crate::error::BuildError;
use crate::peer::PeerList;

/// Desired cluster membership at one point in time.
///
/// Stages are replaced whole, never edited. A changed `checkpoint` is what
/// tells a watching node that its running processes are stale.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub cluster: PeerList,
    pub checkpoint: String,
}

impl Stage {
    pub fn new(cluster: PeerList, checkpoint: impl Into<String>) -> Self {
        Self {
            cluster,
            checkpoint: checkpoint.into(),
        }
    }

    /// A stage is runnable when it names at least one peer and every peer
    /// endpoint is a usable `host:port`.
    pub fn validate(&self) -> Result<(), BuildError> {
        if self.cluster.is_empty() {
            return Err(BuildError::EmptyPeerList);
        }
        match self.cluster.iter().find(|p| !p.id.is_valid()) {
            Some(bad) => Err(BuildError::InvalidEndpoint(bad.id.to_string())),
            None => Ok(()),
        }
    }
}
