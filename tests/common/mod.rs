//! Shared helpers for cluster integration tests.

#![allow(dead_code)]

use chat_replica::adapters::outbound::MemoryStateStore;
use chat_replica::domain::ports::SnapshotRepository;
use chat_replica::{Mutation, ReplicaNode, ReplicationConfig, ServerAddress};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

pub const PROBE_INTERVAL: Duration = Duration::from_millis(50);
pub const RPC_TIMEOUT: Duration = Duration::from_millis(200);

/// A cluster of in-process replicas on ephemeral loopback ports.
pub struct TestCluster {
    pub servers: Vec<ServerAddress>,
    nodes: Vec<Option<ReplicaNode>>,
}

impl TestCluster {
    /// Bind every address first so the full server list is known, then start
    /// the nodes in rank order.
    pub async fn start(size: usize) -> Self {
        let mut listeners = Vec::with_capacity(size);
        let mut servers = Vec::with_capacity(size);
        for _ in 0..size {
            let client = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let sync = TcpListener::bind("127.0.0.1:0").await.unwrap();
            servers.push(ServerAddress::new(
                client.local_addr().unwrap().to_string(),
                sync.local_addr().unwrap().to_string(),
            ));
            listeners.push((sync, client));
        }

        let mut cluster = Self {
            servers,
            nodes: Vec::with_capacity(size),
        };
        for (rank, (sync, client)) in listeners.into_iter().enumerate() {
            let node = ReplicaNode::new(cluster.config(rank), MemoryStateStore::new()).unwrap();
            node.start_with_listeners(sync, client).await.unwrap();
            cluster.nodes.push(Some(node));
        }
        cluster
    }

    pub fn config(&self, rank: usize) -> ReplicationConfig {
        ReplicationConfig::new(rank, self.servers.clone())
            .probe_interval(PROBE_INTERVAL)
            .rpc_timeout(RPC_TIMEOUT)
    }

    pub fn node(&self, rank: usize) -> &ReplicaNode {
        self.nodes[rank].as_ref().expect("node is stopped")
    }

    pub fn client_addresses(&self) -> Vec<String> {
        self.servers.iter().map(|s| s.address.clone()).collect()
    }

    pub async fn stop(&mut self, rank: usize) {
        let node = self.nodes[rank].take().expect("node already stopped");
        node.stop().await.unwrap();
    }

    /// Start a fresh process for `rank` on its configured addresses.
    pub async fn restart(&mut self, rank: usize, repository: Option<Arc<dyn SnapshotRepository>>) {
        assert!(self.nodes[rank].is_none(), "node {} still running", rank);
        let mut node = ReplicaNode::new(self.config(rank), MemoryStateStore::new()).unwrap();
        if let Some(repository) = repository {
            node = node.with_repository(repository);
        }
        node.start().await.unwrap();
        self.nodes[rank] = Some(node);
    }

    /// Ranks of the nodes still running.
    pub fn running(&self) -> Vec<usize> {
        (0..self.nodes.len())
            .filter(|&rank| self.nodes[rank].is_some())
            .collect()
    }

    /// True when every running node believes `leader` leads.
    pub fn agree_on_leader(&self, leader: usize) -> bool {
        self.running()
            .into_iter()
            .all(|rank| self.node(rank).leadership().leader() == leader)
    }

    pub async fn shutdown(mut self) {
        for rank in self.running() {
            self.stop(rank).await;
        }
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

pub fn add_user(username: &str) -> Mutation {
    Mutation::AddUser {
        username: username.to_string(),
        password_hash: format!("hash-{}", username).into_bytes(),
        salt: format!("salt-{}", username).into_bytes(),
    }
}
