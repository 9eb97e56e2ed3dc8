//! Integration tests for replication and failover across real nodes.

mod common;

use chat_replica::adapters::outbound::SqliteSnapshotRepository;
use chat_replica::domain::entities::{Account, StoreState};
use chat_replica::domain::ports::SnapshotRepository;
use chat_replica::Snapshot;
use common::{add_user, wait_until, TestCluster};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const SETTLE: Duration = Duration::from_secs(5);

fn has_user(cluster: &TestCluster, rank: usize, username: &str) -> bool {
    cluster.node(rank).store().account(username).is_some()
}

async fn seeded_repository(dir: &TempDir, snapshot: Snapshot) -> Arc<dyn SnapshotRepository> {
    let path = dir.path().join("node.db");
    let repository = SqliteSnapshotRepository::new(path.to_string_lossy().to_string());
    repository.init_db().unwrap();
    repository.save(&snapshot).await.unwrap();
    Arc::new(repository)
}

fn snapshot_with(version: u64, usernames: &[&str]) -> Snapshot {
    let mut state = StoreState::default();
    for name in usernames {
        state.accounts.insert(
            name.to_string(),
            Account::new(*name, b"hash".to_vec(), b"salt".to_vec()),
        );
    }
    Snapshot::new(version, state)
}

#[tokio::test]
async fn test_cluster_elects_rank_zero() {
    let cluster = TestCluster::start(3).await;

    assert!(wait_until(SETTLE, || cluster.agree_on_leader(0)).await);
    assert!(cluster.node(0).is_leader());
    assert!(!cluster.node(1).is_leader());
    assert!(!cluster.node(2).is_leader());

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_leader_replicates_to_followers() {
    let cluster = TestCluster::start(3).await;
    assert!(wait_until(SETTLE, || cluster.agree_on_leader(0)).await);

    let report = cluster.node(0).coordinator().replicate(add_user("alice")).await;
    assert_eq!(report.version, 1);

    assert!(wait_until(SETTLE, || has_user(&cluster, 1, "alice") && has_user(&cluster, 2, "alice")).await);

    // Followers store the leader's hash and salt verbatim
    let leader_copy = cluster.node(0).store().account("alice").unwrap();
    let follower_copy = cluster.node(2).store().account("alice").unwrap();
    assert_eq!(leader_copy, follower_copy);
    assert_eq!(cluster.node(1).store().version(), 1);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_next_rank_takes_over_when_leader_stops() {
    let mut cluster = TestCluster::start(3).await;
    assert!(wait_until(SETTLE, || cluster.agree_on_leader(0)).await);

    cluster.stop(0).await;
    assert!(wait_until(SETTLE, || cluster.agree_on_leader(1)).await);
    assert!(cluster.node(1).is_leader());

    cluster.node(1).coordinator().replicate(add_user("bob")).await;
    assert!(wait_until(SETTLE, || has_user(&cluster, 2, "bob")).await);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_returning_rank_zero_resumes_and_catches_up() {
    let mut cluster = TestCluster::start(3).await;
    assert!(wait_until(SETTLE, || cluster.agree_on_leader(0)).await);

    cluster.stop(0).await;
    assert!(wait_until(SETTLE, || cluster.agree_on_leader(1)).await);
    cluster.node(1).coordinator().replicate(add_user("carol")).await;

    cluster.restart(0, None).await;
    assert!(wait_until(SETTLE, || cluster.agree_on_leader(0)).await);

    // The followers' newer state is merged into the returning leader
    assert!(wait_until(SETTLE, || has_user(&cluster, 0, "carol")).await);
    assert_eq!(cluster.node(0).store().version(), cluster.node(1).store().version());

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_stale_follower_adopts_leader_state_on_rejoin() {
    let dir = TempDir::new().unwrap();
    let mut cluster = TestCluster::start(3).await;
    assert!(wait_until(SETTLE, || cluster.agree_on_leader(0)).await);

    cluster.stop(2).await;
    for name in ["u1", "u2", "u3", "u4", "u5", "u6", "u7", "u8", "u9"] {
        cluster.node(0).coordinator().replicate(add_user(name)).await;
    }
    assert_eq!(cluster.node(0).store().version(), 9);

    // Node 2 comes back with an older snapshot holding a user nobody else has
    let repository = seeded_repository(&dir, snapshot_with(5, &["ghost"])).await;
    cluster.restart(2, Some(repository)).await;

    assert!(wait_until(SETTLE, || cluster.node(2).store().version() == 9).await);
    assert!(has_user(&cluster, 2, "u9"));
    assert!(!has_user(&cluster, 2, "ghost"));
    assert!(!has_user(&cluster, 0, "ghost"));

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_newer_follower_state_wins_on_rejoin() {
    let dir = TempDir::new().unwrap();
    let mut cluster = TestCluster::start(3).await;
    assert!(wait_until(SETTLE, || cluster.agree_on_leader(0)).await);

    cluster.stop(2).await;
    cluster.node(0).coordinator().replicate(add_user("dave")).await;

    let repository = seeded_repository(&dir, snapshot_with(100, &["veteran"])).await;
    cluster.restart(2, Some(repository)).await;

    // Leader adopts the higher version and pushes it to the other follower
    assert!(wait_until(SETTLE, || has_user(&cluster, 0, "veteran")).await);
    assert!(wait_until(SETTLE, || has_user(&cluster, 1, "veteran")).await);
    assert!(!has_user(&cluster, 0, "dave"));
    assert_eq!(cluster.node(1).store().version(), 100);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_stop_persists_snapshot() {
    let dir = TempDir::new().unwrap();
    let mut cluster = TestCluster::start(2).await;
    assert!(wait_until(SETTLE, || cluster.agree_on_leader(0)).await);

    cluster.stop(1).await;
    let repository = seeded_repository(&dir, Snapshot::empty()).await;
    cluster.restart(1, Some(repository.clone())).await;

    cluster.node(0).coordinator().replicate(add_user("erin")).await;
    assert!(wait_until(SETTLE, || has_user(&cluster, 1, "erin")).await);

    cluster.stop(1).await;
    let saved = repository.load().await.unwrap().unwrap();
    assert!(saved.verify());
    assert!(saved.state.accounts.contains_key("erin"));

    cluster.shutdown().await;
}
