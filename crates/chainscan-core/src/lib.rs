//! chainscan-core — per-chain block scanning and checkpointing for a
//! cross-chain bridge.
//!
//! # Architecture
//!
//! ```text
//! Scheduler (per chain × {height, scan}, try-lock guarded)
//!      │
//!      ▼
//! ScanEngine ── ChainRegistry ── ChainHandle ── ChainAdapter (lazy, per endpoint)
//!      ├── HeightTracker     (head → safety height → enqueue → advance checkpoint)
//!      ├── ScanExecutor      (pending → fetch → receipts → extract → filter → deliver → ack)
//!      └── CheckpointManager (checkpoint + pending set over a durable CheckpointStore)
//! ```
//!
//! Chain specifics live behind [`ChainAdapter`]; downstream consumers plug in
//! through [`WatchPredicate`] and [`TransferSink`].

pub mod adapter;
pub mod checkpoint;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod guard;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod sink;
pub mod tracker;
pub mod types;
pub mod watch;

pub use adapter::{AdapterFactory, ChainAdapter};
pub use checkpoint::{Checkpoint, CheckpointManager, CheckpointStore, MemoryCheckpointStore};
pub use config::{ChainConfig, EngineConfig, FeeModel, FetchConfig, LogConfig, SchedulerConfig, StorageConfig};
pub use engine::{ScanEngine, TickOutcome};
pub use error::ScanError;
pub use executor::{ScanExecutor, ScanReport};
pub use guard::{TickGuard, TickKind};
pub use registry::{ChainHandle, ChainRegistry};
pub use retry::RetryPolicy;
pub use scheduler::Scheduler;
pub use sink::{ChannelSink, TransferBatch, TransferSink};
pub use tracker::{HeightTick, HeightTracker};
pub use types::{Block, BlockNumber, Receipt, Transaction, TransferCandidate, TransferStatus};
pub use watch::{StaticWatchList, WatchPredicate};
