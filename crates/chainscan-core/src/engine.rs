//! The scan engine — ties the registry, checkpoint store, height tracker and
//! scan executor together and exposes the read-only status surface.

use std::sync::Arc;

use tracing::debug;

use crate::checkpoint::{CheckpointManager, CheckpointStore};
use crate::error::ScanError;
use crate::executor::{ScanExecutor, ScanReport};
use crate::guard::TickKind;
use crate::registry::ChainRegistry;
use crate::sink::TransferSink;
use crate::tracker::{HeightTick, HeightTracker};
use crate::types::{BlockNumber, TransferCandidate};
use crate::watch::WatchPredicate;

/// Outcome of a guarded tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome<T> {
    /// The tick ran to completion.
    Ran(T),
    /// A previous tick of the same chain and kind was still running.
    Skipped,
}

impl<T> TickOutcome<T> {
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped)
    }

    /// The report of a tick that ran.
    pub fn ran(self) -> Option<T> {
        match self {
            Self::Ran(report) => Some(report),
            Self::Skipped => None,
        }
    }
}

pub struct ScanEngine {
    registry: Arc<ChainRegistry>,
    checkpoints: Arc<CheckpointManager>,
    tracker: HeightTracker,
    executor: ScanExecutor,
}

impl ScanEngine {
    pub fn new(
        registry: Arc<ChainRegistry>,
        store: Arc<dyn CheckpointStore>,
        watch: Arc<dyn WatchPredicate>,
        sink: Arc<dyn TransferSink>,
    ) -> Self {
        let checkpoints = Arc::new(CheckpointManager::new(store));
        Self {
            registry,
            tracker: HeightTracker::new(checkpoints.clone()),
            executor: ScanExecutor::new(checkpoints.clone(), watch, sink),
            checkpoints,
        }
    }

    pub fn registry(&self) -> &ChainRegistry {
        &self.registry
    }

    // ─── Guarded ticks ───────────────────────────────────────────────────────

    /// Run one height tick for `chain`, unless one is already in flight.
    pub async fn height_tick(&self, chain: &str) -> Result<TickOutcome<HeightTick>, ScanError> {
        let handle = self.registry.get(chain)?;
        let Some(_permit) = handle.guard(TickKind::Height).try_enter() else {
            debug!(chain, kind = %TickKind::Height, "Tick skipped, previous still running");
            return Ok(TickOutcome::Skipped);
        };
        self.tracker.tick(&handle).await.map(TickOutcome::Ran)
    }

    /// Run one scan tick for `chain`, unless one is already in flight.
    pub async fn scan_tick(&self, chain: &str) -> Result<TickOutcome<ScanReport>, ScanError> {
        let handle = self.registry.get(chain)?;
        let Some(_permit) = handle.guard(TickKind::Scan).try_enter() else {
            debug!(chain, kind = %TickKind::Scan, "Tick skipped, previous still running");
            return Ok(TickOutcome::Skipped);
        };
        self.executor.tick(&handle).await.map(TickOutcome::Ran)
    }

    // ─── Status / control ────────────────────────────────────────────────────

    /// The durable checkpoint, `None` before the first height tick of a new chain.
    pub async fn checkpoint(&self, chain: &str) -> Result<Option<BlockNumber>, ScanError> {
        self.registry.get(chain)?;
        self.checkpoints.checkpoint(chain).await
    }

    /// Number of block numbers still owed a scan.
    pub async fn pending_count(&self, chain: &str) -> Result<usize, ScanError> {
        self.registry.get(chain)?;
        self.checkpoints.pending_count(chain).await
    }

    /// Head height cached by the last successful height tick.
    pub fn head_height(&self, chain: &str) -> Result<BlockNumber, ScanError> {
        Ok(self.registry.get(chain)?.head_height())
    }

    /// Fetch, extract, filter and deliver explicit blocks, bypassing the
    /// pending set. The checkpoint is left untouched.
    pub async fn manual_scan(
        &self,
        chain: &str,
        blocks: &[BlockNumber],
    ) -> Result<Vec<TransferCandidate>, ScanError> {
        let handle = self.registry.get(chain)?;
        self.executor.manual_scan(&handle, blocks).await
    }
}
