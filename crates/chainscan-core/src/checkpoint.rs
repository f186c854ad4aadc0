//! Checkpoint store — durable per-chain scan progress.
//!
//! Each chain namespace holds:
//! - a **checkpoint**: every block strictly below it has been enqueued and
//!   eventually acknowledged;
//! - a **pending set**: block numbers still owed a scan.
//!
//! [`CheckpointManager`] fronts a durable [`CheckpointStore`] backend with an
//! in-memory mirror of the pending set. Every mutation hits the backend first
//! and the mirror only after the backend accepted it, so a failed write
//! leaves both unchanged.

use std::collections::{BTreeSet, HashMap};
use std::ops::Range;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::error::ScanError;
use crate::types::BlockNumber;

/// A persisted checkpoint for one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Chain identifier (e.g. `"ethereum"`).
    pub chain_id: String,
    /// Exclusive lower bound of unscanned blocks.
    pub block_number: BlockNumber,
    /// Unix timestamp of when this checkpoint was saved.
    pub updated_at: i64,
}

impl Checkpoint {
    pub fn now(chain_id: impl Into<String>, block_number: BlockNumber) -> Self {
        Self {
            chain_id: chain_id.into(),
            block_number,
            updated_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Durable backend for checkpoints and pending block numbers.
///
/// Implementations include [`MemoryCheckpointStore`] and the SQLite store in
/// `chainscan-storage`. `save` must be atomic: a torn write may not corrupt
/// the previous value.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the checkpoint of a chain.
    async fn load(&self, chain_id: &str) -> Result<Option<Checkpoint>, ScanError>;

    /// Save (upsert) a checkpoint.
    async fn save(&self, checkpoint: Checkpoint) -> Result<(), ScanError>;

    /// Insert block numbers into the chain's pending set (idempotent).
    async fn insert_pending(&self, chain_id: &str, blocks: &[BlockNumber]) -> Result<(), ScanError>;

    /// Delete block numbers from the chain's pending set (idempotent).
    async fn remove_pending(&self, chain_id: &str, blocks: &[BlockNumber]) -> Result<(), ScanError>;

    /// Enumerate the chain's pending set in ascending order.
    async fn load_pending(&self, chain_id: &str) -> Result<Vec<BlockNumber>, ScanError>;
}

// ─── Per-chain state ──────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct ChainScanState {
    loaded: bool,
    checkpoint: Option<BlockNumber>,
    pending: BTreeSet<BlockNumber>,
    /// Consecutive failed scans per pending block. Process-local.
    failures: HashMap<BlockNumber, u32>,
    /// A durable checkpoint existed when this process first touched the chain.
    restored: bool,
    look_back_taken: bool,
}

type Slot = Arc<tokio::sync::Mutex<ChainScanState>>;

/// Mirrors durable scan state in memory and serialises every per-chain
/// read-modify-write.
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
    chains: Mutex<HashMap<String, Slot>>,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            store,
            chains: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the chain's slot, loading it from the backend on first use.
    async fn slot(&self, chain: &str) -> Result<Slot, ScanError> {
        let slot = self
            .chains
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(chain.to_string())
            .or_default()
            .clone();

        {
            let mut state = slot.lock().await;
            if !state.loaded {
                let checkpoint = self.store.load(chain).await?.map(|cp| cp.block_number);
                let pending: BTreeSet<_> = self.store.load_pending(chain).await?.into_iter().collect();
                info!(
                    chain,
                    checkpoint = ?checkpoint,
                    pending = pending.len(),
                    "Loaded scan state"
                );
                state.restored = checkpoint.is_some();
                state.checkpoint = checkpoint;
                state.pending = pending;
                state.loaded = true;
            }
        }
        Ok(slot)
    }

    // ─── Checkpoint ──────────────────────────────────────────────────────────

    /// The durable checkpoint, if one exists. Never bootstraps.
    pub async fn checkpoint(&self, chain: &str) -> Result<Option<BlockNumber>, ScanError> {
        let slot = self.slot(chain).await?;
        let state = slot.lock().await;
        Ok(state.checkpoint)
    }

    /// The durable checkpoint; on first run it is bootstrapped to
    /// `head - batch_limit`, persisted and returned.
    pub async fn get_checkpoint(
        &self,
        chain: &str,
        head: BlockNumber,
        batch_limit: u64,
    ) -> Result<BlockNumber, ScanError> {
        let slot = self.slot(chain).await?;
        let mut state = slot.lock().await;
        if let Some(cp) = state.checkpoint {
            return Ok(cp);
        }
        let initial = head.saturating_sub(batch_limit);
        self.store.save(Checkpoint::now(chain, initial)).await?;
        state.checkpoint = Some(initial);
        info!(chain, head, checkpoint = initial, "Bootstrapped checkpoint");
        Ok(initial)
    }

    /// Persist a new checkpoint. Values not above the current one are ignored,
    /// so the checkpoint never moves backwards.
    pub async fn advance_checkpoint(&self, chain: &str, new_value: BlockNumber) -> Result<(), ScanError> {
        let slot = self.slot(chain).await?;
        let mut state = slot.lock().await;
        if state.checkpoint.is_some_and(|cp| new_value <= cp) {
            debug!(chain, current = ?state.checkpoint, new_value, "Checkpoint not advanced");
            return Ok(());
        }
        self.store.save(Checkpoint::now(chain, new_value)).await?;
        state.checkpoint = Some(new_value);
        debug!(chain, checkpoint = new_value, "Checkpoint advanced");
        Ok(())
    }

    /// One-time restart look-back: enqueue the `size` block numbers
    /// immediately below the lowest known position (`min(checkpoint,
    /// min(pending))`). Returns the window and how many numbers were new.
    ///
    /// Does nothing when the chain had no durable checkpoint at process
    /// start, and nothing after it once succeeded for a chain. The
    /// checkpoint itself is not moved.
    pub async fn restart_look_back(
        &self,
        chain: &str,
        size: u64,
    ) -> Result<Option<(Range<BlockNumber>, usize)>, ScanError> {
        let slot = self.slot(chain).await?;
        let mut state = slot.lock().await;
        if state.look_back_taken {
            return Ok(None);
        }
        let window = match (state.restored, state.checkpoint) {
            (true, Some(checkpoint)) => {
                let lowest = state
                    .pending
                    .first()
                    .map_or(checkpoint, |&first| first.min(checkpoint));
                let start = lowest.saturating_sub(size);
                (start < lowest).then_some(start..lowest)
            }
            _ => None,
        };
        let Some(window) = window else {
            state.look_back_taken = true;
            return Ok(None);
        };
        let blocks: Vec<BlockNumber> = window.clone().collect();
        let added = self.insert_locked(chain, &mut state, &blocks).await?;
        state.look_back_taken = true;
        Ok(Some((window, added)))
    }

    // ─── Pending set ─────────────────────────────────────────────────────────

    /// Add block numbers to the pending set. Returns how many were new.
    pub async fn enqueue_pending(&self, chain: &str, blocks: &[BlockNumber]) -> Result<usize, ScanError> {
        let slot = self.slot(chain).await?;
        let mut state = slot.lock().await;
        self.insert_locked(chain, &mut state, blocks).await
    }

    async fn insert_locked(
        &self,
        chain: &str,
        state: &mut ChainScanState,
        blocks: &[BlockNumber],
    ) -> Result<usize, ScanError> {
        let fresh: Vec<BlockNumber> = blocks
            .iter()
            .copied()
            .filter(|b| !state.pending.contains(b))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if fresh.is_empty() {
            return Ok(0);
        }
        self.store.insert_pending(chain, &fresh).await?;
        state.pending.extend(fresh.iter().copied());
        trace!(chain, added = fresh.len(), pending = state.pending.len(), "Enqueued pending blocks");
        Ok(fresh.len())
    }

    /// Up to `limit` pending block numbers. Does not remove them.
    ///
    /// Blocks are ordered by how often they already failed, then by number,
    /// so blocks that keep failing cannot crowd newer ones out of a batch.
    pub async fn dequeue_pending(&self, chain: &str, limit: u64) -> Result<Vec<BlockNumber>, ScanError> {
        let slot = self.slot(chain).await?;
        let state = slot.lock().await;
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        if state.failures.is_empty() {
            return Ok(state.pending.iter().copied().take(limit).collect());
        }
        let mut order: Vec<(u32, BlockNumber)> = state
            .pending
            .iter()
            .map(|b| (state.failures.get(b).copied().unwrap_or(0), *b))
            .collect();
        order.sort_unstable();
        let mut batch: Vec<BlockNumber> = order.into_iter().take(limit).map(|(_, b)| b).collect();
        batch.sort_unstable();
        Ok(batch)
    }

    /// Mark blocks as scanned: delete them from the durable pending set and
    /// the mirror. Acking an absent block is a no-op.
    pub async fn ack(&self, chain: &str, blocks: &[BlockNumber]) -> Result<(), ScanError> {
        if blocks.is_empty() {
            return Ok(());
        }
        let slot = self.slot(chain).await?;
        let mut state = slot.lock().await;
        self.store.remove_pending(chain, blocks).await?;
        for b in blocks {
            state.pending.remove(b);
            state.failures.remove(b);
        }
        debug!(chain, acked = blocks.len(), pending = state.pending.len(), "Acked blocks");
        Ok(())
    }

    /// Leave blocks pending for a later tick and count the failure. An
    /// already acked block is not resurrected.
    pub async fn noack(&self, chain: &str, blocks: &[BlockNumber]) -> Result<(), ScanError> {
        if blocks.is_empty() {
            return Ok(());
        }
        let slot = self.slot(chain).await?;
        let mut state = slot.lock().await;
        let mut still_pending = 0;
        for b in blocks {
            if state.pending.contains(b) {
                *state.failures.entry(*b).or_default() += 1;
                still_pending += 1;
            }
        }
        debug!(chain, noacked = blocks.len(), still_pending, "Blocks left pending");
        Ok(())
    }

    /// Number of block numbers still owed a scan.
    pub async fn pending_count(&self, chain: &str) -> Result<usize, ScanError> {
        let slot = self.slot(chain).await?;
        let state = slot.lock().await;
        Ok(state.pending.len())
    }

    /// Returns `true` if `block` is currently pending.
    pub async fn is_pending(&self, chain: &str, block: BlockNumber) -> Result<bool, ScanError> {
        let slot = self.slot(chain).await?;
        let state = slot.lock().await;
        Ok(state.pending.contains(&block))
    }
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

/// In-memory checkpoint store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    checkpoints: Mutex<HashMap<String, Checkpoint>>,
    pending: Mutex<HashMap<String, BTreeSet<BlockNumber>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, chain_id: &str) -> Result<Option<Checkpoint>, ScanError> {
        Ok(self
            .checkpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(chain_id)
            .cloned())
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), ScanError> {
        self.checkpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(checkpoint.chain_id.clone(), checkpoint);
        Ok(())
    }

    async fn insert_pending(&self, chain_id: &str, blocks: &[BlockNumber]) -> Result<(), ScanError> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(chain_id.to_string())
            .or_default()
            .extend(blocks.iter().copied());
        Ok(())
    }

    async fn remove_pending(&self, chain_id: &str, blocks: &[BlockNumber]) -> Result<(), ScanError> {
        if let Some(set) = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(chain_id)
        {
            for b in blocks {
                set.remove(b);
            }
        }
        Ok(())
    }

    async fn load_pending(&self, chain_id: &str) -> Result<Vec<BlockNumber>, ScanError> {
        Ok(self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(chain_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn manager() -> (Arc<MemoryCheckpointStore>, CheckpointManager) {
        let store = Arc::new(MemoryCheckpointStore::new());
        (store.clone(), CheckpointManager::new(store))
    }

    /// Backend whose writes can be switched to fail.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryCheckpointStore,
        fail_writes: AtomicBool,
    }

    impl FlakyStore {
        fn check(&self) -> Result<(), ScanError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                Err(ScanError::CheckpointWriteFailed("disk full".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl CheckpointStore for FlakyStore {
        async fn load(&self, chain_id: &str) -> Result<Option<Checkpoint>, ScanError> {
            self.inner.load(chain_id).await
        }
        async fn save(&self, checkpoint: Checkpoint) -> Result<(), ScanError> {
            self.check()?;
            self.inner.save(checkpoint).await
        }
        async fn insert_pending(&self, chain_id: &str, blocks: &[BlockNumber]) -> Result<(), ScanError> {
            self.check()?;
            self.inner.insert_pending(chain_id, blocks).await
        }
        async fn remove_pending(&self, chain_id: &str, blocks: &[BlockNumber]) -> Result<(), ScanError> {
            self.check()?;
            self.inner.remove_pending(chain_id, blocks).await
        }
        async fn load_pending(&self, chain_id: &str) -> Result<Vec<BlockNumber>, ScanError> {
            self.inner.load_pending(chain_id).await
        }
    }

    #[tokio::test]
    async fn bootstrap_persists_head_minus_batch() {
        let (store, mgr) = manager();
        assert_eq!(mgr.checkpoint("eth").await.unwrap(), None);

        let cp = mgr.get_checkpoint("eth", 1_000, 100).await.unwrap();
        assert_eq!(cp, 900);
        assert_eq!(store.load("eth").await.unwrap().unwrap().block_number, 900);

        // Existing checkpoint wins over a new head
        assert_eq!(mgr.get_checkpoint("eth", 5_000, 100).await.unwrap(), 900);
    }

    #[tokio::test]
    async fn bootstrap_saturates_at_genesis() {
        let (_, mgr) = manager();
        assert_eq!(mgr.get_checkpoint("eth", 30, 100).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn checkpoint_never_decreases() {
        let (_, mgr) = manager();
        mgr.advance_checkpoint("eth", 500).await.unwrap();
        mgr.advance_checkpoint("eth", 400).await.unwrap();
        assert_eq!(mgr.checkpoint("eth").await.unwrap(), Some(500));
        mgr.advance_checkpoint("eth", 501).await.unwrap();
        assert_eq!(mgr.checkpoint("eth").await.unwrap(), Some(501));
    }

    #[tokio::test]
    async fn enqueue_is_idempotent_and_dequeue_is_ordered() {
        let (store, mgr) = manager();
        assert_eq!(mgr.enqueue_pending("eth", &[5, 3, 4]).await.unwrap(), 3);
        assert_eq!(mgr.enqueue_pending("eth", &[4, 5, 6]).await.unwrap(), 1);
        assert_eq!(mgr.pending_count("eth").await.unwrap(), 4);
        assert_eq!(mgr.dequeue_pending("eth", 2).await.unwrap(), vec![3, 4]);
        // dequeue does not remove
        assert_eq!(mgr.dequeue_pending("eth", 10).await.unwrap(), vec![3, 4, 5, 6]);
        assert_eq!(store.load_pending("eth").await.unwrap(), vec![3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn ack_twice_and_noack_after_ack_do_not_resurrect() {
        let (store, mgr) = manager();
        mgr.enqueue_pending("eth", &[10, 11]).await.unwrap();
        mgr.ack("eth", &[10]).await.unwrap();
        mgr.ack("eth", &[10]).await.unwrap();
        mgr.noack("eth", &[10, 11]).await.unwrap();

        assert!(!mgr.is_pending("eth", 10).await.unwrap());
        assert!(mgr.is_pending("eth", 11).await.unwrap());
        assert_eq!(store.load_pending("eth").await.unwrap(), vec![11]);
    }

    #[tokio::test]
    async fn failed_blocks_yield_to_untried_ones() {
        let (_, mgr) = manager();
        mgr.enqueue_pending("eth", &[1, 2, 3, 4, 5]).await.unwrap();
        mgr.noack("eth", &[1, 2]).await.unwrap();
        mgr.noack("eth", &[1]).await.unwrap();

        assert_eq!(mgr.dequeue_pending("eth", 2).await.unwrap(), vec![3, 4]);
        assert_eq!(mgr.dequeue_pending("eth", 4).await.unwrap(), vec![2, 3, 4, 5]);
        mgr.ack("eth", &[3, 4, 5]).await.unwrap();
        // Fewest failures first once nothing untried is left.
        assert_eq!(mgr.dequeue_pending("eth", 1).await.unwrap(), vec![2]);

        mgr.noack("eth", &[2]).await.unwrap();
        mgr.noack("eth", &[2]).await.unwrap();
        assert_eq!(mgr.dequeue_pending("eth", 1).await.unwrap(), vec![1]);

        // A successful scan clears the count.
        mgr.ack("eth", &[2]).await.unwrap();
        mgr.enqueue_pending("eth", &[2]).await.unwrap();
        assert_eq!(mgr.dequeue_pending("eth", 1).await.unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn chains_are_isolated() {
        let (_, mgr) = manager();
        mgr.enqueue_pending("eth", &[1, 2]).await.unwrap();
        mgr.enqueue_pending("base", &[7]).await.unwrap();
        mgr.ack("eth", &[7]).await.unwrap();
        assert_eq!(mgr.pending_count("eth").await.unwrap(), 2);
        assert_eq!(mgr.pending_count("base").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn state_is_rebuilt_from_backend() {
        let store = Arc::new(MemoryCheckpointStore::new());
        {
            let mgr = CheckpointManager::new(store.clone());
            mgr.advance_checkpoint("eth", 5_000).await.unwrap();
            mgr.enqueue_pending("eth", &[4_998, 4_999]).await.unwrap();
        }
        let mgr = CheckpointManager::new(store);
        assert_eq!(mgr.checkpoint("eth").await.unwrap(), Some(5_000));
        assert_eq!(mgr.dequeue_pending("eth", 10).await.unwrap(), vec![4_998, 4_999]);
    }

    #[tokio::test]
    async fn look_back_only_once_and_only_after_restart() {
        let store = Arc::new(MemoryCheckpointStore::new());
        store.save(Checkpoint::now("eth", 5_000)).await.unwrap();
        store.insert_pending("eth", &(4_990..5_000).collect::<Vec<_>>()).await.unwrap();

        let mgr = CheckpointManager::new(store);
        assert_eq!(
            mgr.restart_look_back("eth", 100).await.unwrap(),
            Some((4_890..4_990, 100))
        );
        assert_eq!(mgr.pending_count("eth").await.unwrap(), 110);
        assert_eq!(mgr.restart_look_back("eth", 100).await.unwrap(), None);

        // A chain that never had a checkpoint gets no look-back.
        assert_eq!(mgr.restart_look_back("fresh", 100).await.unwrap(), None);
    }

    #[tokio::test]
    async fn failed_write_leaves_mirror_untouched() {
        let store = Arc::new(FlakyStore::default());
        let mgr = CheckpointManager::new(store.clone());
        mgr.enqueue_pending("eth", &[1, 2]).await.unwrap();
        mgr.advance_checkpoint("eth", 3).await.unwrap();

        store.fail_writes.store(true, Ordering::SeqCst);
        let err = mgr.ack("eth", &[1]).await.unwrap_err();
        assert!(err.is_storage());
        assert!(mgr.enqueue_pending("eth", &[9]).await.is_err());
        assert!(mgr.advance_checkpoint("eth", 10).await.is_err());

        assert_eq!(mgr.dequeue_pending("eth", 10).await.unwrap(), vec![1, 2]);
        assert_eq!(mgr.checkpoint("eth").await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn failed_look_back_is_retried() {
        let store = Arc::new(FlakyStore::default());
        store.inner.save(Checkpoint::now("eth", 200)).await.unwrap();
        let mgr = CheckpointManager::new(store.clone());

        store.fail_writes.store(true, Ordering::SeqCst);
        assert!(mgr.restart_look_back("eth", 10).await.is_err());

        store.fail_writes.store(false, Ordering::SeqCst);
        assert_eq!(
            mgr.restart_look_back("eth", 10).await.unwrap(),
            Some((190..200, 10))
        );
    }
}
