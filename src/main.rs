//! chat-replica - Replicated chat server node
//!
//! This is the composition root that wires together all the components.

use chat_replica::adapters::outbound::{MemoryStateStore, SqliteSnapshotRepository};
use chat_replica::config::{load_cluster, load_config};
use chat_replica::infrastructure::shutdown_signal;
use chat_replica::ReplicaNode;
use std::sync::Arc;
use tracing_subscriber::fmt::format::FmtSpan;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration from environment
    let cfg = load_config()?;

    // Setup logging
    let log_level = if cfg.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_span_events(FmtSpan::CLOSE)
        .init();

    let cluster = load_cluster(&cfg.cluster_config_path)?;
    let replication = cfg.replication(cluster)?;

    tracing::info!(
        "starting chat-replica node_index={} cluster={} data_path={}",
        cfg.node_index,
        cfg.cluster_config_path,
        cfg.data_path
    );

    // ===== COMPOSITION ROOT =====

    // Snapshot persistence (SQLite)
    let repository = Arc::new(SqliteSnapshotRepository::new(cfg.data_path.clone()));
    repository.init_db()?;

    // Replica node over the in-memory store
    let node = ReplicaNode::new(replication, MemoryStateStore::new())?.with_repository(repository);
    node.start().await?;

    // Run until Ctrl+C / SIGTERM
    shutdown_signal(node.shutdown_controller().clone()).await;
    node.stop().await
}
