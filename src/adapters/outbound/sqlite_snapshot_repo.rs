//! SQLite Snapshot Repository
//!
//! Implements SnapshotRepository using a single-row SQLite table.
//! The node loads it at start and saves it on graceful shutdown.

use crate::domain::entities::{Snapshot, StoreState};
use crate::domain::ports::SnapshotRepository;
use anyhow::Result;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

/// SQLite-backed snapshot repository.
pub struct SqliteSnapshotRepository {
    db_path: String,
}

impl SqliteSnapshotRepository {
    /// Create a repository for the given database file.
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    /// Create the snapshot table if needed.
    pub fn init_db(&self) -> Result<()> {
        let conn = Connection::open(&self.db_path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS chat_snapshot (
                id INTEGER PRIMARY KEY CHECK (id = 0),
                version INTEGER NOT NULL,
                checksum INTEGER NOT NULL,
                state BLOB NOT NULL,
                saved_at INTEGER NOT NULL
            )",
            [],
        )?;
        tracing::info!("snapshot store initialized, db_path={}", self.db_path);
        Ok(())
    }

    fn load_blocking(db_path: &str) -> Result<Option<Snapshot>> {
        let conn = Connection::open(db_path)?;
        let row: Option<(i64, i64, Vec<u8>)> = conn
            .query_row(
                "SELECT version, checksum, state FROM chat_snapshot WHERE id = 0",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((version, checksum, blob)) = row else {
            return Ok(None);
        };

        let state: StoreState = bincode::deserialize(&blob)?;
        let snapshot = Snapshot {
            version: version as u64,
            state,
            checksum: checksum as u32,
        };
        if !snapshot.verify() {
            anyhow::bail!("stored snapshot checksum verification failed");
        }
        Ok(Some(snapshot))
    }

    fn save_blocking(db_path: &str, snapshot: &Snapshot) -> Result<()> {
        let blob = bincode::serialize(&snapshot.state)?;
        let saved_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)?
            .as_secs() as i64;

        let conn = Connection::open(db_path)?;
        conn.execute(
            "INSERT OR REPLACE INTO chat_snapshot (id, version, checksum, state, saved_at)
             VALUES (0, ?, ?, ?, ?)",
            params![
                snapshot.version as i64,
                snapshot.checksum as i64,
                blob,
                saved_at
            ],
        )?;
        Ok(())
    }
}

#[async_trait]
impl SnapshotRepository for SqliteSnapshotRepository {
    async fn load(&self) -> Result<Option<Snapshot>> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || Self::load_blocking(&db_path)).await?
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let db_path = self.db_path.clone();
        let version = snapshot.version;
        let snapshot = snapshot.clone();
        tokio::task::spawn_blocking(move || Self::save_blocking(&db_path, &snapshot)).await??;
        tracing::info!("snapshot saved version={} db_path={}", version, self.db_path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::Account;
    use tempfile::NamedTempFile;

    fn sample_snapshot() -> Snapshot {
        let mut state = StoreState::default();
        state
            .accounts
            .insert("alice".to_string(), Account::new("alice", vec![1, 2, 3], vec![4, 5]));
        Snapshot::new(42, state)
    }

    #[tokio::test]
    async fn test_load_empty() {
        let temp = NamedTempFile::new().unwrap();
        let repo = SqliteSnapshotRepository::new(temp.path().to_str().unwrap());
        repo.init_db().unwrap();

        assert!(repo.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let temp = NamedTempFile::new().unwrap();
        let repo = SqliteSnapshotRepository::new(temp.path().to_str().unwrap());
        repo.init_db().unwrap();

        let snapshot = sample_snapshot();
        repo.save(&snapshot).await.unwrap();

        let loaded = repo.load().await.unwrap().unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let temp = NamedTempFile::new().unwrap();
        let repo = SqliteSnapshotRepository::new(temp.path().to_str().unwrap());
        repo.init_db().unwrap();

        repo.save(&sample_snapshot()).await.unwrap();
        repo.save(&Snapshot::empty()).await.unwrap();

        let loaded = repo.load().await.unwrap().unwrap();
        assert_eq!(loaded.version, 0);
        assert!(loaded.state.accounts.is_empty());
    }

    #[tokio::test]
    async fn test_load_rejects_corrupt_checksum() {
        let temp = NamedTempFile::new().unwrap();
        let path = temp.path().to_str().unwrap().to_string();
        let repo = SqliteSnapshotRepository::new(&path);
        repo.init_db().unwrap();
        repo.save(&sample_snapshot()).await.unwrap();

        let conn = Connection::open(&path).unwrap();
        conn.execute("UPDATE chat_snapshot SET checksum = 1 WHERE id = 0", [])
            .unwrap();

        assert!(repo.load().await.is_err());
    }
}
