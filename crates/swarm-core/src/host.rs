//! Host specs and peer placement.
//!
//! A host spec is the textual cluster description given on the command
//! line: `addr[:capacity[:pubaddr]]` entries joined by commas. Placement
//! walks the parsed list in order and fills each host before moving to the
//! next, so every node derives the same rank → endpoint mapping without
//! talking to anyone.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ParseError, PlanError};
use crate::peer::{Peer, PeerId, PeerList};

/// First port handed out to workers; local rank `i` listens on `base + i`.
pub const DEFAULT_PORT_BASE: u16 = 10000;

/// One host and the number of process slots it offers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRecord {
    pub address: String,
    pub capacity: usize,
    /// Address reachable from outside the cluster network, used for
    /// remote launches when present.
    pub public_address: Option<String>,
}

impl HostRecord {
    pub fn new(address: impl Into<String>, capacity: usize) -> Self {
        Self {
            address: address.into(),
            capacity,
            public_address: None,
        }
    }

    pub fn with_public_address(mut self, public_address: impl Into<String>) -> Self {
        self.public_address = Some(public_address.into());
        self
    }

    pub fn humanize(&self) -> String {
        format!(
            "<ip={}, slots={}, pub_ip={}>",
            self.address,
            self.capacity,
            self.public_address.as_deref().unwrap_or("")
        )
    }

    /// The address to reach this host from the launching machine.
    pub fn launch_address(&self) -> &str {
        self.public_address.as_deref().unwrap_or(&self.address)
    }

    fn parse_entry(token: &str) -> Result<Self, ParseError> {
        let invalid = |reason: &str| ParseError::InvalidHost {
            token: token.to_string(),
            reason: reason.to_string(),
        };

        let parts: Vec<&str> = token.split(':').collect();
        if parts.len() > 3 {
            return Err(invalid("too many ':' separated fields"));
        }

        let address = parts[0].trim();
        if address.is_empty() {
            return Err(invalid("empty address"));
        }

        let capacity = match parts.get(1) {
            Some(value) => {
                let value = value.trim();
                match value.parse::<usize>() {
                    Ok(n) if n > 0 => n,
                    _ => {
                        return Err(ParseError::InvalidCapacity {
                            token: token.to_string(),
                            value: value.to_string(),
                        });
                    }
                }
            }
            None => 1,
        };

        let public_address = match parts.get(2) {
            Some(p) if p.trim().is_empty() => return Err(invalid("empty public address")),
            Some(p) => Some(p.trim().to_string()),
            None => None,
        };

        Ok(Self {
            address: address.to_string(),
            capacity,
            public_address,
        })
    }
}

impl fmt::Display for HostRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.capacity)?;
        if let Some(public) = &self.public_address {
            write!(f, ":{public}")?;
        }
        Ok(())
    }
}

/// An ordered set of hosts. Parse order is placement order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostList(Vec<HostRecord>);

impl HostList {
    /// Build a list from records, rejecting duplicate addresses.
    pub fn new(hosts: Vec<HostRecord>) -> Result<Self, ParseError> {
        for (i, h) in hosts.iter().enumerate() {
            if hosts[..i].iter().any(|prev| prev.address == h.address) {
                return Err(ParseError::DuplicateHost(h.address.clone()));
            }
        }
        Ok(Self(hosts))
    }

    /// A single local host with `slots` capacity.
    pub fn localhost(slots: usize) -> Self {
        Self(vec![HostRecord::new("127.0.0.1", slots.max(1))])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, HostRecord> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[HostRecord] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<HostRecord> {
        self.0
    }

    /// Sum of all host capacities.
    pub fn total_capacity(&self) -> usize {
        self.0.iter().map(|h| h.capacity).sum()
    }

    /// Place `n` peers with worker ports starting at [`DEFAULT_PORT_BASE`].
    pub fn gen_peer_list(&self, n: usize) -> Result<PeerList, PlanError> {
        self.gen_peer_list_from(n, DEFAULT_PORT_BASE)
    }

    /// Place `n` peers onto the hosts in list order.
    ///
    /// Each host is filled up to its capacity before the next one gets any
    /// peer; hosts past the last one needed get nothing. Fails without a
    /// partial result when `n` exceeds the total capacity.
    pub fn gen_peer_list_from(&self, n: usize, port_base: u16) -> Result<PeerList, PlanError> {
        let available = self.total_capacity();
        if n > available {
            return Err(PlanError::InsufficientCapacity {
                requested: n,
                available,
            });
        }

        let mut peers = Vec::with_capacity(n);
        'hosts: for host in &self.0 {
            for local_rank in 0..host.capacity {
                if peers.len() == n {
                    break 'hosts;
                }
                let port = u16::try_from(local_rank)
                    .ok()
                    .and_then(|i| port_base.checked_add(i))
                    .ok_or(PlanError::PortOverflow {
                        base: port_base,
                        local_rank,
                    })?;
                peers.push(Peer {
                    id: PeerId::new(host.address.clone(), port),
                    rank: peers.len(),
                    local_rank,
                    cluster_size: n,
                });
            }
        }

        debug!(np = n, hosts = self.0.len(), port_base, "generated peer list");
        Ok(PeerList::new(peers))
    }

    /// Log-friendly rendering: `<ip=…, slots=…, pub_ip=…>, ...`.
    pub fn humanize(&self) -> String {
        humanize_hosts(&self.0)
    }
}

/// [`HostList::humanize`] for a bare slice of records.
pub fn humanize_hosts(hosts: &[HostRecord]) -> String {
    hosts
        .iter()
        .map(HostRecord::humanize)
        .collect::<Vec<_>>()
        .join(", ")
}

impl FromStr for HostList {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Ok(Self::default());
        }

        let mut hosts = Vec::new();
        for (i, token) in s.split(',').enumerate() {
            let token = token.trim();
            if token.is_empty() {
                return Err(ParseError::EmptyEntry(i));
            }
            hosts.push(HostRecord::parse_entry(token)?);
        }
        Self::new(hosts)
    }
}

impl fmt::Display for HostList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.0.iter().map(|h| h.to_string()).collect();
        f.write_str(&rendered.join(","))
    }
}

impl<'a> IntoIterator for &'a HostList {
    type Item = &'a HostRecord;
    type IntoIter = std::slice::Iter<'a, HostRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts(s: &str) -> HostList {
        s.parse().unwrap()
    }

    #[test]
    fn parse_defaults_capacity_to_one() {
        let hl = hosts("10.0.0.1,10.0.0.2:4");
        assert_eq!(hl.len(), 2);
        assert_eq!(hl.as_slice()[0].capacity, 1);
        assert_eq!(hl.as_slice()[1].capacity, 4);
        assert_eq!(hl.total_capacity(), 5);
    }

    #[test]
    fn parse_public_address() {
        let hl = hosts("192.168.1.10:2:34.1.2.3");
        let h = &hl.as_slice()[0];
        assert_eq!(h.public_address.as_deref(), Some("34.1.2.3"));
        assert_eq!(h.launch_address(), "34.1.2.3");
    }

    #[test]
    fn parse_empty_is_empty_list() {
        assert!(hosts("").is_empty());
        assert!(hosts("  ").is_empty());
    }

    #[test]
    fn parse_rejects_bad_capacity() {
        let err = "a:x".parse::<HostList>().unwrap_err();
        assert!(matches!(err, ParseError::InvalidCapacity { ref value, .. } if value == "x"));
        assert!("a:0".parse::<HostList>().is_err());
        assert!("a:-1".parse::<HostList>().is_err());
    }

    #[test]
    fn parse_identifies_offending_token() {
        let err = "a:2,b:2:pub:extra".parse::<HostList>().unwrap_err();
        assert!(err.to_string().contains("b:2:pub:extra"));
    }

    #[test]
    fn parse_rejects_empty_entries_and_addresses() {
        assert_eq!("a,,b".parse::<HostList>().unwrap_err(), ParseError::EmptyEntry(1));
        assert!(":2".parse::<HostList>().is_err());
        assert!("a:2:".parse::<HostList>().is_err());
    }

    #[test]
    fn parse_rejects_duplicates() {
        let err = "a:2,b:1,a:3".parse::<HostList>().unwrap_err();
        assert_eq!(err, ParseError::DuplicateHost("a".to_string()));
    }

    #[test]
    fn format_round_trip_is_stable() {
        for s in ["a", "a:3,b", "a:2:pub.example.com,b:1", " a : 2 , b:7 ", ""] {
            let once = hosts(s);
            let again = hosts(&once.to_string());
            assert_eq!(once, again, "round trip of {s:?}");
        }
        assert_eq!(hosts("a,b:2:p").to_string(), "a:1,b:2:p");
    }

    #[test]
    fn place_fills_hosts_in_order() {
        let peers = hosts("A:2,B:2").gen_peer_list(3).unwrap();
        let got: Vec<(usize, &str, usize, u16)> = peers
            .iter()
            .map(|p| (p.rank, p.id.host.as_str(), p.local_rank, p.id.port))
            .collect();
        assert_eq!(
            got,
            vec![(0, "A", 0, 10000), (1, "A", 1, 10001), (2, "B", 0, 10000)]
        );
        assert!(peers.iter().all(|p| p.cluster_size == 3));
    }

    #[test]
    fn place_leaves_trailing_hosts_empty() {
        let peers = hosts("A:4,B:4,C:4").gen_peer_list(4).unwrap();
        assert_eq!(peers.hosts(), vec!["A"]);
    }

    #[test]
    fn place_exact_capacity() {
        let hl = hosts("A:1,B:2,C:3");
        let peers = hl.gen_peer_list(6).unwrap();
        assert_eq!(peers.len(), 6);
        let ranks: Vec<usize> = peers.iter().map(|p| p.rank).collect();
        assert_eq!(ranks, (0..6).collect::<Vec<_>>());
        assert_eq!(peers.on_host("C").map(|p| p.local_rank).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn place_is_deterministic() {
        let hl = hosts("x:3,y:1,z:5");
        for n in 0..=hl.total_capacity() {
            assert_eq!(hl.gen_peer_list(n).unwrap(), hl.gen_peer_list(n).unwrap());
        }
    }

    #[test]
    fn place_over_capacity_fails() {
        let err = hosts("A:2,B:2").gen_peer_list(5).unwrap_err();
        assert_eq!(
            err,
            PlanError::InsufficientCapacity {
                requested: 5,
                available: 4
            }
        );
    }

    #[test]
    fn place_custom_port_base() {
        let peers = hosts("A:2").gen_peer_list_from(2, 20000).unwrap();
        assert_eq!(peers.as_slice()[1].id.port, 20001);
        let err = hosts("A:3").gen_peer_list_from(3, u16::MAX - 1).unwrap_err();
        assert!(matches!(err, PlanError::PortOverflow { local_rank: 2, .. }));
    }

    #[test]
    fn humanize_lists_every_host() {
        let s = hosts("a:2:p,b").humanize();
        assert_eq!(s, "<ip=a, slots=2, pub_ip=p>, <ip=b, slots=1, pub_ip=>");
    }
}
