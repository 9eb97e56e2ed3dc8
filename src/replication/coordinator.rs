//! Replication Coordinator
//!
//! Leader-side propagation of mutations to followers, leadership
//! announcements and snapshot pushes.
//!
//! Each follower has its own worker task and connection, fed through a
//! channel. Mutations and snapshot pushes are enqueued while the store lock
//! is held, so every follower receives them in the order the leader applied
//! them. The network wait happens after the lock is released and is bounded
//! by the RPC timeout.

use crate::domain::entities::{MergeOutcome, Mutation};
use crate::replication::detector::{FailureDetector, Reachability};
use crate::replication::store::StoreHandle;
use crate::replication::transport::{unexpected, SyncClient, SyncConnection};
use crate::replication::types::{
    ClusterTopology, PeerDescriptor, ReplicationError, SyncRequest, SyncResponse,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Result of propagating one mutation.
#[derive(Debug)]
pub struct ReplicationReport {
    /// Leader version after applying the mutation
    pub version: u64,
    /// Followers that acknowledged
    pub acknowledged: Vec<usize>,
    /// Followers that acknowledged at a different version and were sent the
    /// leader's snapshot
    pub resynced: Vec<usize>,
    /// Followers that failed; they catch up on their next merge
    pub failed: Vec<(usize, ReplicationError)>,
}

struct ReplicationJob {
    request: SyncRequest,
    /// Follower version after handling the request
    reply: oneshot::Sender<Result<u64, ReplicationError>>,
}

struct FollowerLink {
    rank: usize,
    node: String,
    tx: mpsc::UnboundedSender<ReplicationJob>,
}

impl FollowerLink {
    /// Queue a request behind everything already sent to this follower.
    fn enqueue(&self, request: SyncRequest) -> Option<oneshot::Receiver<Result<u64, ReplicationError>>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(ReplicationJob { request, reply }).ok().map(|_| rx)
    }
}

/// Coordinates outbound replication for the local node.
pub struct ReplicationCoordinator {
    topology: Arc<ClusterTopology>,
    store: StoreHandle,
    detector: Arc<FailureDetector>,
    rpc_timeout: Duration,
    links: Vec<FollowerLink>,
}

impl ReplicationCoordinator {
    /// Create the coordinator and spawn one worker per other peer.
    pub fn new(
        topology: Arc<ClusterTopology>,
        store: StoreHandle,
        detector: Arc<FailureDetector>,
        rpc_timeout: Duration,
    ) -> Self {
        let links = topology
            .others()
            .map(|peer| {
                let (tx, rx) = mpsc::unbounded_channel();
                tokio::spawn(follower_worker(peer.clone(), rpc_timeout, rx));
                FollowerLink {
                    rank: peer.priority_rank,
                    node: peer.node_id.to_string(),
                    tx,
                }
            })
            .collect();

        Self {
            topology,
            store,
            detector,
            rpc_timeout,
            links,
        }
    }

    fn link(&self, rank: usize) -> Option<&FollowerLink> {
        self.links.iter().find(|link| link.rank == rank)
    }

    /// Apply a mutation locally and propagate it to every reachable follower.
    ///
    /// The local apply always commits. Each follower gets exactly one attempt;
    /// a follower that fails or times out is marked unreachable and is not
    /// retried. A follower that acknowledges at a version other than the
    /// leader's has drifted and is sent the leader's snapshot.
    pub async fn replicate(&self, mutation: Mutation) -> ReplicationReport {
        let request = SyncRequest::from(mutation.clone());

        let (version, pending) = self.store.apply_with(&mutation, |version| {
            let pending: Vec<_> = self
                .links
                .iter()
                .filter(|link| self.detector.is_alive(link.rank))
                .filter_map(|link| link.enqueue(request.clone()).map(|rx| (link, rx)))
                .collect();
            (version, pending)
        });

        let waits = pending
            .into_iter()
            .map(|(link, rx)| async move { (link.rank, self.await_reply(link, rx).await) });
        let results = futures::future::join_all(waits).await;

        let mut report = ReplicationReport {
            version,
            acknowledged: Vec::new(),
            resynced: Vec::new(),
            failed: Vec::new(),
        };
        for (rank, result) in results {
            match result {
                Ok(follower_version) => {
                    if follower_version != version {
                        tracing::warn!(
                            "follower={} acked {} at version={} leader_version={}",
                            rank,
                            request.name(),
                            follower_version,
                            version
                        );
                        report.resynced.push(rank);
                    }
                    report.acknowledged.push(rank);
                }
                Err(e) => {
                    tracing::warn!(
                        "{} not replicated to follower={} error={}",
                        request.name(),
                        rank,
                        e
                    );
                    self.detector.mark(rank, Reachability::Unreachable);
                    report.failed.push((rank, e));
                }
            }
        }

        let resyncs = report.resynced.iter().map(|&rank| self.push_snapshot_to(rank));
        futures::future::join_all(resyncs).await;

        tracing::debug!(
            "replicated {} version={} acked={} resynced={} failed={}",
            request.name(),
            version,
            report.acknowledged.len(),
            report.resynced.len(),
            report.failed.len()
        );
        report
    }

    async fn await_reply(
        &self,
        link: &FollowerLink,
        rx: oneshot::Receiver<Result<u64, ReplicationError>>,
    ) -> Result<u64, ReplicationError> {
        match tokio::time::timeout(self.rpc_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ReplicationError::PeerUnreachable {
                peer: link.node.clone(),
                reason: "replication worker stopped".to_string(),
            }),
            Err(_) => Err(ReplicationError::PropagationTimeout {
                peer: link.node.clone(),
            }),
        }
    }

    /// Tell every other node that the local node leads. Failures are ignored.
    pub async fn announce_leadership(&self) {
        let local = self.topology.local_rank();
        let calls = self.topology.others().map(|peer| async move {
            let client = SyncClient::new(peer.sync_address.clone(), self.rpc_timeout);
            if let Err(e) = client.set_leader(local, local).await {
                tracing::debug!("leader announcement to {} failed: {}", peer.node_id, e);
            }
        });
        futures::future::join_all(calls).await;
        tracing::info!("announced leadership node={}", local);
    }

    /// Push the current snapshot to every follower believed reachable,
    /// except `except`.
    pub async fn push_snapshot(&self, except: Option<usize>) {
        let calls = self
            .links
            .iter()
            .filter(|link| Some(link.rank) != except)
            .filter(|link| self.detector.is_alive(link.rank))
            .map(|link| self.push_snapshot_to(link.rank));
        futures::future::join_all(calls).await;
    }

    /// Push the current snapshot to one follower.
    ///
    /// The follower merges it by version; its reply is not merged back.
    pub async fn push_snapshot_to(&self, rank: usize) {
        let Some(link) = self.link(rank) else {
            return;
        };
        let from = self.topology.local_rank();
        let Some(rx) = self
            .store
            .snapshot_with(|snapshot| link.enqueue(SyncRequest::MergeState { from, snapshot }))
        else {
            return;
        };

        match self.await_reply(link, rx).await {
            Ok(follower_version) => tracing::debug!(
                "pushed snapshot to {} follower_version={}",
                link.node,
                follower_version
            ),
            Err(e) => {
                tracing::warn!("snapshot push to {} failed: {}", link.node, e);
                self.detector.mark(rank, Reachability::Unreachable);
            }
        }
    }

    /// Send the local snapshot to `leader` and adopt the merged result.
    pub async fn merge_with_leader(&self, leader: usize) -> Result<MergeOutcome, ReplicationError> {
        let peer = self
            .topology
            .peer(leader)
            .ok_or_else(|| ReplicationError::Protocol(format!("unknown leader rank {}", leader)))?;

        let client = SyncClient::new(peer.sync_address.clone(), self.rpc_timeout);
        let merged = match client
            .merge_state(self.topology.local_rank(), self.store.snapshot())
            .await
        {
            Ok(merged) => merged,
            Err(e) => {
                self.detector.mark(leader, Reachability::Unreachable);
                return Err(e);
            }
        };

        if !merged.verify() {
            return Err(ReplicationError::CorruptSnapshot);
        }
        let (_, outcome) = self.store.merge(merged);
        tracing::info!(
            "merged with leader={} outcome={:?} version={}",
            leader,
            outcome,
            self.store.version()
        );
        Ok(outcome)
    }
}

/// Deliver jobs to one follower in order over a reused connection.
async fn follower_worker(
    peer: PeerDescriptor,
    timeout: Duration,
    mut rx: mpsc::UnboundedReceiver<ReplicationJob>,
) {
    let mut conn: Option<SyncConnection> = None;

    while let Some(job) = rx.recv().await {
        // Caller already gave up; the follower catches up by merge instead
        if job.reply.is_closed() {
            continue;
        }
        let result = deliver(&peer, timeout, &mut conn, &job.request).await;
        let _ = job.reply.send(result);
    }

    tracing::debug!("replication worker for {} stopped", peer.node_id);
}

async fn deliver(
    peer: &PeerDescriptor,
    timeout: Duration,
    conn: &mut Option<SyncConnection>,
    request: &SyncRequest,
) -> Result<u64, ReplicationError> {
    let mut active = match conn.take() {
        Some(active) => active,
        None => SyncConnection::connect(&peer.sync_address, timeout).await?,
    };

    let version = match active.call(request).await? {
        SyncResponse::Ack { version } => version,
        SyncResponse::State(merged) if matches!(request, SyncRequest::MergeState { .. }) => {
            merged.version
        }
        other => return Err(unexpected(request.name(), other)),
    };
    *conn = Some(active);
    Ok(version)
}
