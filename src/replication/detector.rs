//! Failure Detector
//!
//! Periodically probes peers with the sync Health RPC and keeps a
//! reachability table. A single failed probe marks a peer unreachable; a
//! single successful one brings it back.

use crate::replication::transport::SyncClient;
use crate::replication::types::ClusterTopology;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Reachability of a peer as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    Alive,
    Unreachable,
}

/// Probe status for one peer.
#[derive(Debug, Clone)]
pub struct PeerStatus {
    pub reachability: Reachability,
    /// Last probe (or last state change) timestamp
    pub last_check: Instant,
    /// Last probe latency
    pub latency_ms: Option<u64>,
    /// Last error message
    pub last_error: Option<String>,
}

impl Default for PeerStatus {
    fn default() -> Self {
        Self {
            reachability: Reachability::Alive,
            last_check: Instant::now(),
            latency_ms: None,
            last_error: None,
        }
    }
}

/// A peer whose reachability flipped during a probe cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub rank: usize,
    pub from: Reachability,
    pub to: Reachability,
}

impl Transition {
    /// Peer went from unreachable back to alive.
    pub fn is_recovery(&self) -> bool {
        self.from == Reachability::Unreachable && self.to == Reachability::Alive
    }
}

/// Failure detector for the cluster's peers.
pub struct FailureDetector {
    topology: Arc<ClusterTopology>,
    timeout: Duration,
    /// Status per rank; the local entry is never probed
    status: RwLock<Vec<PeerStatus>>,
}

impl FailureDetector {
    /// Create a detector. Every peer starts out assumed alive.
    pub fn new(topology: Arc<ClusterTopology>, timeout: Duration) -> Self {
        let status = vec![PeerStatus::default(); topology.len()];
        Self {
            topology,
            timeout,
            status: RwLock::new(status),
        }
    }

    /// Whether `rank` is believed alive. The local node always is.
    pub fn is_alive(&self, rank: usize) -> bool {
        if rank == self.topology.local_rank() {
            return true;
        }
        self.status
            .read()
            .get(rank)
            .map(|s| s.reachability == Reachability::Alive)
            .unwrap_or(false)
    }

    pub fn status(&self, rank: usize) -> Option<PeerStatus> {
        self.status.read().get(rank).cloned()
    }

    /// Ranks of other peers currently believed alive.
    pub fn alive_peers(&self) -> Vec<usize> {
        self.topology
            .others()
            .map(|p| p.priority_rank)
            .filter(|&rank| self.is_alive(rank))
            .collect()
    }

    /// Record an observation. Returns the transition if reachability flipped.
    pub fn mark(&self, rank: usize, reachability: Reachability) -> Option<Transition> {
        if rank == self.topology.local_rank() {
            return None;
        }
        let mut status = self.status.write();
        let entry = status.get_mut(rank)?;
        let previous = entry.reachability;
        entry.reachability = reachability;
        entry.last_check = Instant::now();
        if reachability == Reachability::Alive {
            entry.last_error = None;
        }

        if previous == reachability {
            return None;
        }
        tracing::info!(
            "peer reachability changed peer={} from={:?} to={:?}",
            rank,
            previous,
            reachability
        );
        Some(Transition {
            rank,
            from: previous,
            to: reachability,
        })
    }

    /// Probe a single peer with the Health RPC.
    pub async fn probe(&self, rank: usize) -> Reachability {
        let Some(peer) = self.topology.peer(rank) else {
            return Reachability::Unreachable;
        };
        let client = SyncClient::new(peer.sync_address.clone(), self.timeout);
        let start = Instant::now();

        match client.health().await {
            Ok(()) => {
                if let Some(entry) = self.status.write().get_mut(rank) {
                    entry.latency_ms = Some(start.elapsed().as_millis() as u64);
                }
                Reachability::Alive
            }
            Err(e) => {
                tracing::debug!("health probe failed peer={} error={}", rank, e);
                if let Some(entry) = self.status.write().get_mut(rank) {
                    entry.last_error = Some(e.to_string());
                    entry.latency_ms = None;
                }
                Reachability::Unreachable
            }
        }
    }

    /// Probe every other peer concurrently and apply the results.
    pub async fn run_cycle(&self) -> Vec<Transition> {
        let ranks: Vec<usize> = self.topology.others().map(|p| p.priority_rank).collect();
        let results = futures::future::join_all(ranks.iter().map(|&rank| self.probe(rank))).await;

        ranks
            .into_iter()
            .zip(results)
            .filter_map(|(rank, reachability)| self.mark(rank, reachability))
            .collect()
    }
}
