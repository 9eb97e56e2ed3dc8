//! Sync Service
//!
//! Server-side handlers for the RPCs peers send each other: health probes,
//! leadership announcements, whole-snapshot merges and replicated mutations.

use crate::domain::entities::{MergeOutcome, Snapshot};
use crate::replication::coordinator::ReplicationCoordinator;
use crate::replication::detector::{FailureDetector, Reachability};
use crate::replication::leadership::{Leadership, SetLeaderOutcome};
use crate::replication::store::StoreHandle;
use crate::replication::types::{ReplicationError, SyncRequest, SyncResponse};
use std::sync::Arc;

/// Handlers for inbound sync RPCs.
#[derive(Clone)]
pub struct SyncService {
    store: StoreHandle,
    leadership: Arc<Leadership>,
    detector: Arc<FailureDetector>,
    coordinator: Arc<ReplicationCoordinator>,
}

impl SyncService {
    pub fn new(
        store: StoreHandle,
        leadership: Arc<Leadership>,
        detector: Arc<FailureDetector>,
        coordinator: Arc<ReplicationCoordinator>,
    ) -> Self {
        Self {
            store,
            leadership,
            detector,
            coordinator,
        }
    }

    /// Dispatch one request.
    pub fn handle(&self, request: SyncRequest) -> SyncResponse {
        tracing::debug!("sync request {}", request.name());
        match request {
            SyncRequest::Health => SyncResponse::Empty,
            SyncRequest::SetLeader {
                leader,
                announced_by,
            } => {
                self.set_leader(leader, announced_by);
                SyncResponse::Empty
            }
            SyncRequest::MergeState { from, snapshot } => match self.merge_state(from, snapshot) {
                Ok(merged) => SyncResponse::State(merged),
                Err(e) => SyncResponse::Error(e.to_string()),
            },
            other => match other.into_mutation() {
                Some(mutation) => SyncResponse::Ack {
                    version: self.store.apply(&mutation),
                },
                None => SyncResponse::Error("unsupported request".to_string()),
            },
        }
    }

    /// Adopt the announced leader if it outranks the current belief.
    pub fn set_leader(&self, leader: usize, announced_by: usize) -> SetLeaderOutcome {
        let outcome = self.leadership.observe_announcement(leader, announced_by);
        if outcome == SetLeaderOutcome::Adopted {
            // An announcement is proof of life
            self.detector.mark(announced_by, Reachability::Alive);
        }
        outcome
    }

    /// Merge an incoming snapshot by version and return the result.
    ///
    /// On the leader, the merged snapshot is then pushed to every other
    /// reachable follower so one rejoin re-converges the whole cluster.
    pub fn merge_state(&self, from: usize, incoming: Snapshot) -> Result<Snapshot, ReplicationError> {
        if !incoming.verify() {
            tracing::warn!("rejecting corrupt snapshot from node={}", from);
            return Err(ReplicationError::CorruptSnapshot);
        }

        let incoming_version = incoming.version;
        let (merged, outcome) = self.store.merge(incoming);
        self.detector.mark(from, Reachability::Alive);

        tracing::info!(
            "merge from node={} incoming_version={} result_version={} outcome={:?}",
            from,
            incoming_version,
            merged.version,
            outcome
        );

        if self.leadership.is_leader() {
            let coordinator = self.coordinator.clone();
            tokio::spawn(async move {
                coordinator.push_snapshot(Some(from)).await;
            });
        } else if outcome == MergeOutcome::AdoptedIncoming {
            tracing::debug!("follower adopted snapshot version={}", merged.version);
        }

        Ok(merged)
    }
}
