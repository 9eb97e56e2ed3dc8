//! Leadership
//!
//! The leader is the lowest-ranked node this node believes is alive. Every
//! node uses the same cluster ordering, so healthy nodes converge on the same
//! leader without an election.

use parking_lot::RwLock;
use std::time::SystemTime;
use tokio::sync::watch;

/// Role of the local node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Leader,
}

/// The local node's current belief about who leads.
#[derive(Debug, Clone)]
pub struct LeadershipClaim {
    pub leader: usize,
    /// Rank whose announcement (or local recomputation) set this belief
    pub announced_by: usize,
    pub timestamp: SystemTime,
}

/// A change of leader as seen by the local node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaderChange {
    pub previous: usize,
    pub current: usize,
}

/// Result of handling a SetLeader announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetLeaderOutcome {
    Adopted,
    /// The announced rank is not better than the current belief
    Ignored,
}

/// Lowest rank below `local` that is alive, else `local` itself.
pub fn compute_leader(local: usize, is_alive: impl Fn(usize) -> bool) -> usize {
    (0..local).find(|&rank| is_alive(rank)).unwrap_or(local)
}

/// Leadership state of the local node.
pub struct Leadership {
    local: usize,
    claim: RwLock<LeadershipClaim>,
    leader_tx: watch::Sender<usize>,
}

impl Leadership {
    /// Start out believing rank 0 leads.
    pub fn new(local: usize) -> Self {
        let (leader_tx, _) = watch::channel(0);
        Self {
            local,
            claim: RwLock::new(LeadershipClaim {
                leader: 0,
                announced_by: local,
                timestamp: SystemTime::now(),
            }),
            leader_tx,
        }
    }

    pub fn local_rank(&self) -> usize {
        self.local
    }

    pub fn leader(&self) -> usize {
        self.claim.read().leader
    }

    pub fn claim(&self) -> LeadershipClaim {
        self.claim.read().clone()
    }

    pub fn is_leader(&self) -> bool {
        self.leader() == self.local
    }

    pub fn role(&self) -> Role {
        if self.is_leader() {
            Role::Leader
        } else {
            Role::Follower
        }
    }

    /// Watch the current leader rank.
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.leader_tx.subscribe()
    }

    /// Recompute the leader from the detector's view.
    pub fn recompute(&self, is_alive: impl Fn(usize) -> bool) -> Option<LeaderChange> {
        let computed = compute_leader(self.local, is_alive);
        self.set(computed, self.local)
    }

    /// Handle a SetLeader announcement from `announced_by`.
    ///
    /// Only a strictly better (lower) rank than the current belief is adopted.
    pub fn observe_announcement(&self, leader: usize, announced_by: usize) -> SetLeaderOutcome {
        if leader >= self.leader() {
            tracing::debug!(
                "ignoring leader announcement leader={} from={} current={}",
                leader,
                announced_by,
                self.leader()
            );
            return SetLeaderOutcome::Ignored;
        }
        match self.set(leader, announced_by) {
            Some(_) => SetLeaderOutcome::Adopted,
            None => SetLeaderOutcome::Ignored,
        }
    }

    fn set(&self, leader: usize, announced_by: usize) -> Option<LeaderChange> {
        let previous = {
            let mut claim = self.claim.write();
            if claim.leader == leader {
                return None;
            }
            let previous = claim.leader;
            *claim = LeadershipClaim {
                leader,
                announced_by,
                timestamp: SystemTime::now(),
            };
            previous
        };

        self.leader_tx.send_replace(leader);
        tracing::info!(
            "leader changed node={} previous={} current={} source={}",
            self.local,
            previous,
            leader,
            announced_by
        );
        Some(LeaderChange {
            previous,
            current: leader,
        })
    }
}
