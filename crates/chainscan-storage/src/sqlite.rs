//! SQLite storage backend for chainscan.
//!
//! Persists per-chain checkpoints and pending block numbers to a single
//! SQLite file. Uses `sqlx` with WAL mode and full sync, so every committed
//! write survives a crash and a torn write never replaces the previous value.
//!
//! # Usage
//! ```rust,no_run
//! use chainscan_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./chainscan.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use chainscan_core::checkpoint::{Checkpoint, CheckpointStore};
use chainscan_core::error::ScanError;
use chainscan_core::types::BlockNumber;

fn io_err(e: sqlx::Error) -> ScanError {
    ScanError::CheckpointWriteFailed(e.to_string())
}

fn to_sql(block: BlockNumber) -> Result<i64, ScanError> {
    i64::try_from(block)
        .map_err(|_| ScanError::CheckpointWriteFailed(format!("block number {block} out of range")))
}

/// SQLite-backed storage for checkpoints and pending block numbers.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./chainscan.db"`) or a full
    /// SQLite URL (`"sqlite:./chainscan.db"`).
    pub async fn open(path: &str) -> Result<Self, ScanError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}")
        };
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(io_err)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(io_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        info!(path, "Opened SQLite checkpoint store");
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// All data is lost when the pool is dropped. Ideal for tests.
    pub async fn in_memory() -> Result<Self, ScanError> {
        // Every in-memory connection is its own database; keep exactly one.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(io_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Create tables if missing.
    async fn init_schema(&self) -> Result<(), ScanError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS scan_checkpoints (
                chain_id     TEXT    NOT NULL PRIMARY KEY,
                block_number INTEGER NOT NULL,
                updated_at   INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(io_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS pending_blocks (
                chain_id     TEXT    NOT NULL,
                block_number INTEGER NOT NULL,
                PRIMARY KEY (chain_id, block_number)
            ) WITHOUT ROWID;",
        )
        .execute(&self.pool)
        .await
        .map_err(io_err)?;

        Ok(())
    }
}

// ─── CheckpointStore impl ────────────────────────────────────────────────────

#[async_trait]
impl CheckpointStore for SqliteStorage {
    async fn load(&self, chain_id: &str) -> Result<Option<Checkpoint>, ScanError> {
        let row = sqlx::query(
            "SELECT chain_id, block_number, updated_at
             FROM scan_checkpoints WHERE chain_id = ?",
        )
        .bind(chain_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(io_err)?;

        Ok(row.map(|r| Checkpoint {
            chain_id: r.get("chain_id"),
            block_number: r.get::<i64, _>("block_number") as u64,
            updated_at: r.get("updated_at"),
        }))
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), ScanError> {
        sqlx::query(
            "INSERT OR REPLACE INTO scan_checkpoints (chain_id, block_number, updated_at)
             VALUES (?, ?, ?)",
        )
        .bind(&checkpoint.chain_id)
        .bind(to_sql(checkpoint.block_number)?)
        .bind(checkpoint.updated_at)
        .execute(&self.pool)
        .await
        .map_err(io_err)?;

        debug!(
            chain_id = %checkpoint.chain_id,
            block = checkpoint.block_number,
            "checkpoint saved"
        );
        Ok(())
    }

    async fn insert_pending(&self, chain_id: &str, blocks: &[BlockNumber]) -> Result<(), ScanError> {
        let mut tx = self.pool.begin().await.map_err(io_err)?;
        for &block in blocks {
            sqlx::query("INSERT OR IGNORE INTO pending_blocks (chain_id, block_number) VALUES (?, ?)")
                .bind(chain_id)
                .bind(to_sql(block)?)
                .execute(&mut *tx)
                .await
                .map_err(io_err)?;
        }
        tx.commit().await.map_err(io_err)?;
        Ok(())
    }

    async fn remove_pending(&self, chain_id: &str, blocks: &[BlockNumber]) -> Result<(), ScanError> {
        let mut tx = self.pool.begin().await.map_err(io_err)?;
        for &block in blocks {
            sqlx::query("DELETE FROM pending_blocks WHERE chain_id = ? AND block_number = ?")
                .bind(chain_id)
                .bind(to_sql(block)?)
                .execute(&mut *tx)
                .await
                .map_err(io_err)?;
        }
        tx.commit().await.map_err(io_err)?;
        Ok(())
    }

    async fn load_pending(&self, chain_id: &str) -> Result<Vec<BlockNumber>, ScanError> {
        let rows = sqlx::query(
            "SELECT block_number FROM pending_blocks
             WHERE chain_id = ? ORDER BY block_number",
        )
        .bind(chain_id)
        .fetch_all(&self.pool)
        .await
        .map_err(io_err)?;

        Ok(rows
            .iter()
            .map(|r| r.get::<i64, _>("block_number") as u64)
            .collect())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chainscan_core::checkpoint::CheckpointManager;
    use std::sync::Arc;

    fn temp_db(name: &str) -> std::path::PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("chainscan-{name}-{}.db", std::process::id()));
        p
    }

    fn remove_db(path: &std::path::Path) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{suffix}", path.display()));
        }
    }

    // ── CheckpointStore ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn checkpoint_upsert() {
        let store = SqliteStorage::in_memory().await.unwrap();

        store.save(Checkpoint { chain_id: "eth".into(), block_number: 100, updated_at: 0 }).await.unwrap();
        store.save(Checkpoint { chain_id: "eth".into(), block_number: 200, updated_at: 1 }).await.unwrap();

        // Only one row; second save overwrites the first
        let loaded = store.load("eth").await.unwrap().unwrap();
        assert_eq!(loaded.block_number, 200);
        assert_eq!(loaded.updated_at, 1);
    }

    #[tokio::test]
    async fn checkpoint_missing_returns_none() {
        let store = SqliteStorage::in_memory().await.unwrap();
        assert!(store.load("unknown-chain").await.unwrap().is_none());
    }

    // ── Pending set ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn pending_insert_is_idempotent_and_ordered() {
        let store = SqliteStorage::in_memory().await.unwrap();
        store.insert_pending("eth", &[12, 10, 11]).await.unwrap();
        store.insert_pending("eth", &[11, 13]).await.unwrap();
        store.insert_pending("base", &[1]).await.unwrap();

        assert_eq!(store.load_pending("eth").await.unwrap(), vec![10, 11, 12, 13]);
        assert_eq!(store.load_pending("base").await.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn pending_remove_ignores_absent() {
        let store = SqliteStorage::in_memory().await.unwrap();
        store.insert_pending("eth", &[1, 2, 3]).await.unwrap();
        store.remove_pending("eth", &[2, 99]).await.unwrap();
        store.remove_pending("eth", &[2]).await.unwrap();
        assert_eq!(store.load_pending("eth").await.unwrap(), vec![1, 3]);
    }

    #[tokio::test]
    async fn huge_block_number_is_rejected() {
        let store = SqliteStorage::in_memory().await.unwrap();
        let err = store.insert_pending("eth", &[u64::MAX]).await.unwrap_err();
        assert!(err.is_storage());
        assert!(store.load_pending("eth").await.unwrap().is_empty());
    }

    // ── Persistence ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn state_survives_reopen() {
        let path = temp_db("reopen");
        remove_db(&path);
        let path_str = path.display().to_string();

        {
            let store = Arc::new(SqliteStorage::open(&path_str).await.unwrap());
            let mgr = CheckpointManager::new(store.clone());
            mgr.advance_checkpoint("eth", 5_000).await.unwrap();
            mgr.enqueue_pending("eth", &(4_990..5_000).collect::<Vec<_>>()).await.unwrap();
            mgr.ack("eth", &[4_990]).await.unwrap();
            store.pool.close().await;
        }

        let store = Arc::new(SqliteStorage::open(&path_str).await.unwrap());
        let mgr = CheckpointManager::new(store.clone());
        assert_eq!(mgr.checkpoint("eth").await.unwrap(), Some(5_000));
        assert_eq!(mgr.pending_count("eth").await.unwrap(), 9);
        assert_eq!(
            mgr.restart_look_back("eth", 100).await.unwrap(),
            Some((4_891..4_991, 100))
        );
        store.pool.close().await;
        remove_db(&path);
    }
}
