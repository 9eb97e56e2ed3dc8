//! Replica Node
//!
//! Orchestrates all replication components (detector, leadership, sync
//! service, coordinator) together with the client front end, and owns the
//! node's lifecycle.

use crate::adapters::inbound::{ClientServer, SyncServer};
use crate::application::ChatService;
use crate::domain::entities::MergeOutcome;
use crate::domain::ports::{SnapshotRepository, StateStore};
use crate::infrastructure::ShutdownController;
use crate::replication::config::ReplicationConfig;
use crate::replication::coordinator::ReplicationCoordinator;
use crate::replication::detector::{FailureDetector, Transition};
use crate::replication::leadership::Leadership;
use crate::replication::store::StoreHandle;
use crate::replication::sync::SyncService;
use crate::replication::types::{ClusterTopology, NodeId};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// How long `stop` waits for open sessions to close.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// A replica node: one member of the cluster.
pub struct ReplicaNode {
    config: ReplicationConfig,
    topology: Arc<ClusterTopology>,
    store: StoreHandle,
    leadership: Arc<Leadership>,
    detector: Arc<FailureDetector>,
    coordinator: Arc<ReplicationCoordinator>,
    repository: Option<Arc<dyn SnapshotRepository>>,
    shutdown: ShutdownController,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ReplicaNode {
    /// Create a node over `store`. Must be called within a Tokio runtime.
    pub fn new<S: StateStore>(config: ReplicationConfig, store: S) -> anyhow::Result<Self> {
        let topology = Arc::new(config.topology()?);
        let store = StoreHandle::new(store);
        let leadership = Arc::new(Leadership::new(topology.local_rank()));
        let detector = Arc::new(FailureDetector::new(topology.clone(), config.rpc_timeout));
        let coordinator = Arc::new(ReplicationCoordinator::new(
            topology.clone(),
            store.clone(),
            detector.clone(),
            config.rpc_timeout,
        ));

        Ok(Self {
            config,
            topology,
            store,
            leadership,
            detector,
            coordinator,
            repository: None,
            shutdown: ShutdownController::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Load the snapshot from `repository` at start and save it on stop.
    pub fn with_repository(mut self, repository: Arc<dyn SnapshotRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn node_id(&self) -> &NodeId {
        &self.topology.local().node_id
    }

    pub fn rank(&self) -> usize {
        self.topology.local_rank()
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    pub fn leadership(&self) -> &Arc<Leadership> {
        &self.leadership
    }

    pub fn detector(&self) -> &Arc<FailureDetector> {
        &self.detector
    }

    pub fn coordinator(&self) -> &Arc<ReplicationCoordinator> {
        &self.coordinator
    }

    pub fn shutdown_controller(&self) -> &ShutdownController {
        &self.shutdown
    }

    pub fn is_leader(&self) -> bool {
        self.leadership.is_leader()
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.is_shutdown()
    }

    /// Bind the configured addresses and start the node.
    #[cfg_attr(coverage_nightly, coverage(off))]
    pub async fn start(&self) -> anyhow::Result<()> {
        let local = self.topology.local();
        let sync_listener = TcpListener::bind(&local.sync_address).await?;
        let client_listener = TcpListener::bind(&local.client_address).await?;
        self.start_with_listeners(sync_listener, client_listener).await
    }

    /// Start the node on already-bound listeners.
    pub async fn start_with_listeners(
        &self,
        sync_listener: TcpListener,
        client_listener: TcpListener,
    ) -> anyhow::Result<()> {
        tracing::info!(
            "starting replica node_id={} rank={} peers={}",
            self.node_id(),
            self.rank(),
            self.topology.len()
        );

        self.load_snapshot().await?;

        // Servers
        let sync_service = SyncService::new(
            self.store.clone(),
            self.leadership.clone(),
            self.detector.clone(),
            self.coordinator.clone(),
        );
        let sync_server = SyncServer::new(sync_service, self.shutdown.clone());
        self.spawn(async move {
            if let Err(e) = sync_server.run(sync_listener).await {
                tracing::error!("sync server failed: {:?}", e);
            }
        });

        let chat_service = Arc::new(ChatService::new(
            self.store.clone(),
            self.leadership.clone(),
            self.coordinator.clone(),
        ));
        let client_server = ClientServer::new(chat_service, self.shutdown.clone());
        self.spawn(async move {
            if let Err(e) = client_server.run(client_listener).await {
                tracing::error!("client server failed: {:?}", e);
            }
        });

        // Initial leadership
        self.detector.run_cycle().await;
        let detector = self.detector.clone();
        self.leadership.recompute(|rank| detector.is_alive(rank));
        act_on_leader(&self.coordinator, self.rank(), self.leadership.leader()).await;

        self.start_detection_loop();
        self.start_leader_watch();

        tracing::info!(
            "replica started node_id={} leader={} version={} alive_peers={:?}",
            self.node_id(),
            self.leadership.leader(),
            self.store.version(),
            self.detector.alive_peers()
        );
        Ok(())
    }

    /// Stop loops and servers, then persist the snapshot.
    pub async fn stop(&self) -> anyhow::Result<()> {
        tracing::info!("stopping replica node_id={}", self.node_id());
        self.shutdown.shutdown();

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        futures::future::join_all(tasks).await;
        self.shutdown.wait_for_drain(DRAIN_TIMEOUT).await;

        if let Some(repository) = &self.repository {
            repository.save(&self.store.snapshot()).await?;
        }
        tracing::info!("replica stopped node_id={}", self.node_id());
        Ok(())
    }

    async fn load_snapshot(&self) -> anyhow::Result<()> {
        let Some(repository) = &self.repository else {
            return Ok(());
        };
        if let Some(snapshot) = repository.load().await? {
            let version = snapshot.version;
            if self.store.merge(snapshot).1 == MergeOutcome::AdoptedIncoming {
                tracing::info!("loaded persisted snapshot version={}", version);
            }
        }
        Ok(())
    }

    fn spawn<F>(&self, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.tasks.lock().push(tokio::spawn(future));
    }

    /// Probe peers every interval and recompute the leader. While leading,
    /// push the snapshot to any follower that just came back.
    #[cfg_attr(coverage_nightly, coverage(off))]
    fn start_detection_loop(&self) {
        let detector = self.detector.clone();
        let leadership = self.leadership.clone();
        let coordinator = self.coordinator.clone();
        let shutdown = self.shutdown.clone();
        let probe_interval = self.config.probe_interval;

        self.spawn(async move {
            let mut timer = interval(probe_interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = timer.tick() => {}
                    _ = shutdown.cancelled() => break,
                }

                let transitions = detector.run_cycle().await;
                for lost in transitions.iter().filter(|t| !t.is_recovery()) {
                    let reason = detector.status(lost.rank).and_then(|s| s.last_error);
                    tracing::warn!("peer {} lost: {}", lost.rank, reason.unwrap_or_default());
                }
                leadership.recompute(|rank| detector.is_alive(rank));

                if leadership.is_leader() {
                    resync_recovered(&coordinator, &transitions);
                }
            }
            tracing::debug!("detection loop stopped");
        });
    }

    /// React to every leader change: announce when this node takes over,
    /// merge with the new leader otherwise.
    #[cfg_attr(coverage_nightly, coverage(off))]
    fn start_leader_watch(&self) {
        let mut leader_rx = self.leadership.subscribe();
        leader_rx.borrow_and_update();
        let coordinator = self.coordinator.clone();
        let shutdown = self.shutdown.clone();
        let local = self.rank();

        self.spawn(async move {
            loop {
                tokio::select! {
                    changed = leader_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = shutdown.cancelled() => break,
                }
                let leader = *leader_rx.borrow_and_update();
                act_on_leader(&coordinator, local, leader).await;
            }
            tracing::debug!("leader watch stopped");
        });
    }
}

/// Push the snapshot to each recovered follower in the background, so a
/// slow follower never holds up the next probe cycle.
fn resync_recovered(coordinator: &Arc<ReplicationCoordinator>, transitions: &[Transition]) {
    for transition in transitions.iter().filter(|t| t.is_recovery()) {
        tracing::info!("follower {} recovered, pushing snapshot", transition.rank);
        let coordinator = coordinator.clone();
        let rank = transition.rank;
        tokio::spawn(async move {
            coordinator.push_snapshot_to(rank).await;
        });
    }
}

async fn act_on_leader(coordinator: &ReplicationCoordinator, local: usize, leader: usize) {
    if leader == local {
        coordinator.announce_leadership().await;
    } else if let Err(e) = coordinator.merge_with_leader(leader).await {
        tracing::warn!("merge with leader={} failed: {}", leader, e);
    }
}
