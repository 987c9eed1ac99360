//! Peer identities and the typed peer table.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// The control endpoint of one running worker process.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId {
    pub host: String,
    pub port: u16,
}

impl PeerId {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Whether this endpoint can be written into the peer table wire format.
    ///
    /// The table is `,`-joined `host:port` text, so hosts containing the
    /// separators (or whitespace) cannot be represented. Port 0 is never a
    /// real listener.
    pub fn is_valid(&self) -> bool {
        !self.host.is_empty()
            && self.port != 0
            && !self
                .host
                .chars()
                .any(|c| c == ',' || c == ':' || c.is_whitespace())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for PeerId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| ParseError::InvalidPeerId(s.to_string()))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| ParseError::InvalidPeerId(s.to_string()))?;
        let id = PeerId::new(host, port);
        if !id.is_valid() {
            return Err(ParseError::InvalidPeerId(s.to_string()));
        }
        Ok(id)
    }
}

/// A single worker's identity within a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub id: PeerId,
    /// Global rank, dense in `[0, cluster_size)`.
    pub rank: usize,
    /// Rank among the peers placed on the same host.
    pub local_rank: usize,
    pub cluster_size: usize,
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.rank, self.id)
    }
}

/// The full rank → endpoint table of a job, in rank order.
///
/// Kept typed internally; only [`PeerList::to_env_value`] produces the
/// textual form handed to workers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerList(Vec<Peer>);

impl PeerList {
    pub fn new(peers: Vec<Peer>) -> Self {
        Self(peers)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Peer> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Peer] {
        &self.0
    }

    /// Peers placed on `host`, in rank order.
    pub fn on_host<'a>(&'a self, host: &'a str) -> impl Iterator<Item = &'a Peer> + 'a {
        self.0.iter().filter(move |p| p.id.host == host)
    }

    /// Distinct host addresses in first-appearance order.
    pub fn hosts(&self) -> Vec<&str> {
        let mut hosts: Vec<&str> = Vec::new();
        for p in &self.0 {
            if !hosts.contains(&p.id.host.as_str()) {
                hosts.push(&p.id.host);
            }
        }
        hosts
    }

    /// Serialize as `host:port,host:port,...` in rank order.
    pub fn to_env_value(&self) -> String {
        self.0
            .iter()
            .map(|p| p.id.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl IntoIterator for PeerList {
    type Item = Peer;
    type IntoIter = std::vec::IntoIter<Peer>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a PeerList {
    type Item = &'a Peer;
    type IntoIter = std::slice::Iter<'a, Peer>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
