//! Height tracker — turns newly confirmed chain heights into pending block
//! numbers and advances the checkpoint over exactly what it enqueued.

use std::ops::Range;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::checkpoint::CheckpointManager;
use crate::error::ScanError;
use crate::registry::ChainHandle;
use crate::types::BlockNumber;

/// What one height tick observed and did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeightTick {
    /// Head height reported by the adapter.
    pub head: BlockNumber,
    /// `head - confirmation_depth`, saturating at 0.
    pub safety_height: BlockNumber,
    /// Checkpoint after the tick.
    pub checkpoint: BlockNumber,
    /// Block numbers newly added to the pending set.
    pub enqueued: usize,
    /// Restart look-back window re-enqueued by this tick, if any.
    pub look_back: Option<Range<BlockNumber>>,
}

impl HeightTick {
    /// `true` when the chain was already caught up.
    pub fn is_noop(&self) -> bool {
        self.enqueued == 0 && self.look_back.is_none()
    }
}

pub struct HeightTracker {
    checkpoints: Arc<CheckpointManager>,
}

impl HeightTracker {
    pub fn new(checkpoints: Arc<CheckpointManager>) -> Self {
        Self { checkpoints }
    }

    /// Run one tick for `chain`.
    ///
    /// A head that cannot be fetched in time, or is reported as 0, aborts the
    /// tick before any state is touched.
    pub async fn tick(&self, chain: &ChainHandle) -> Result<HeightTick, ScanError> {
        let config = chain.config();
        let id = chain.id();
        let adapter = chain.adapter()?;

        let head = match tokio::time::timeout(config.head_timeout(), adapter.head_height()).await {
            Err(_) => {
                return Err(ScanError::FetchTimeout {
                    what: format!("{id} head height"),
                    ms: config.head_timeout_ms,
                })
            }
            Ok(Err(e)) => return Err(e),
            Ok(Ok(0)) => return Err(ScanError::HeadUnavailable { chain: id.to_string() }),
            Ok(Ok(head)) => head,
        };
        chain.record_head(head);

        let checkpoint = self
            .checkpoints
            .get_checkpoint(id, head, config.batch_limit)
            .await?;

        let mut enqueued = 0;
        let look_back = match self.checkpoints.restart_look_back(id, config.look_back()).await? {
            Some((window, added)) => {
                info!(
                    chain = id,
                    from = window.start,
                    to = window.end,
                    added,
                    "Applied restart look-back"
                );
                enqueued += added;
                Some(window)
            }
            None => None,
        };

        let safety_height = head.saturating_sub(config.confirmation_depth);
        if safety_height <= checkpoint {
            debug!(chain = id, head, safety_height, checkpoint, "Chain caught up");
            return Ok(HeightTick {
                head,
                safety_height,
                checkpoint,
                enqueued,
                look_back,
            });
        }

        // Large gaps are closed over several ticks; the checkpoint only ever
        // covers what was actually enqueued.
        let last = safety_height.min(checkpoint + config.max_enqueue_per_tick - 1);
        let blocks: Vec<BlockNumber> = (checkpoint..=last).collect();
        enqueued += self.checkpoints.enqueue_pending(id, &blocks).await?;
        self.checkpoints.advance_checkpoint(id, last + 1).await?;

        debug!(
            chain = id,
            head,
            safety_height,
            from = checkpoint,
            to = last,
            "Enqueued confirmed blocks"
        );
        Ok(HeightTick {
            head,
            safety_height,
            checkpoint: last + 1,
            enqueued,
            look_back,
        })
    }
}
