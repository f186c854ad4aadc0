//! chainscan-storage — durable backends for the chainscan checkpoint store.
//!
//! Backends:
//! - [`sqlite`] — SQLite via `sqlx` (embedded, single-file persistence)
//! - in-memory — [`chainscan_core::MemoryCheckpointStore`] (dev/testing, no persistence)

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;
