//! The shared host pool.
//!
//! One gate guards both the availability check and the take, so two
//! requesters can never both see enough hosts and then take the same ones.
//! The gate is never held while a requester sleeps between polls.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::debug;

use swarm_core::{humanize_hosts, HostList, HostRecord};
use swarm_runner::RunContext;

use crate::error::PoolError;

struct PoolInner {
    free: Mutex<VecDeque<HostRecord>>,
    capacity: usize,
    peak_in_use: AtomicUsize,
}

impl PoolInner {
    fn gate(&self) -> MutexGuard<'_, VecDeque<HostRecord>> {
        // The queue is never left half-updated; poisoning is ignored.
        self.free.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn give_back(&self, hosts: Vec<HostRecord>) {
        let mut free = self.gate();
        debug!(hosts = %humanize_hosts(&hosts), "returning hosts to pool");
        free.extend(hosts);
    }
}

/// A bounded pool of whole hosts shared by concurrent experiments.
#[derive(Clone)]
pub struct HostPool {
    inner: Arc<PoolInner>,
}

impl HostPool {
    pub fn new(hosts: HostList) -> Self {
        let hosts = hosts.into_inner();
        Self {
            inner: Arc::new(PoolInner {
                capacity: hosts.len(),
                free: Mutex::new(hosts.into()),
                peak_in_use: AtomicUsize::new(0),
            }),
        }
    }

    /// Total number of hosts the pool was created with.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn available(&self) -> usize {
        self.inner.gate().len()
    }

    pub fn in_use(&self) -> usize {
        self.inner.capacity - self.available()
    }

    /// Highest number of hosts ever borrowed at the same time.
    pub fn peak_in_use(&self) -> usize {
        self.inner.peak_in_use.load(Ordering::SeqCst)
    }

    /// Take `n` hosts if they are all available right now.
    pub fn try_require(&self, n: usize) -> Result<Option<HostLease>, PoolError> {
        if n > self.inner.capacity {
            return Err(PoolError::Exceeds {
                requested: n,
                capacity: self.inner.capacity,
            });
        }

        let mut free = self.inner.gate();
        if free.len() < n {
            return Ok(None);
        }
        let hosts: Vec<HostRecord> = free.drain(..n).collect();
        let in_use = self.inner.capacity - free.len();
        drop(free);

        self.inner.peak_in_use.fetch_max(in_use, Ordering::SeqCst);
        Ok(Some(HostLease {
            pool: Arc::clone(&self.inner),
            hosts,
        }))
    }

    /// Wait until `n` hosts are available at once and take them.
    ///
    /// Retries every `poll_interval`. There is no queue, so under heavy
    /// contention a large request can be overtaken by smaller ones.
    pub async fn require_n(
        &self,
        n: usize,
        ctx: &RunContext,
        poll_interval: Duration,
    ) -> Result<HostLease, PoolError> {
        loop {
            if let Some(lease) = self.try_require(n)? {
                return Ok(lease);
            }
            tokio::select! {
                reason = ctx.done() => {
                    return Err(PoolError::Cancelled { requested: n, reason });
                }
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }
}

/// Hosts borrowed from a [`HostPool`]; they go back when the lease drops.
pub struct HostLease {
    pool: Arc<PoolInner>,
    hosts: Vec<HostRecord>,
}

impl HostLease {
    pub fn hosts(&self) -> &[HostRecord] {
        &self.hosts
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Return the hosts now rather than at end of scope.
    pub fn release(self) {}
}

impl Drop for HostLease {
    fn drop(&mut self) {
        let hosts = std::mem::take(&mut self.hosts);
        if !hosts.is_empty() {
            self.pool.give_back(hosts);
        }
    }
}

impl std::fmt::Debug for HostLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostLease").field("hosts", &self.hosts).finish()
    }
}
