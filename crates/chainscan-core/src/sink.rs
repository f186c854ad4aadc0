//! Downstream hand-off of filtered transfers.
//!
//! Delivery is at-least-once: a crash between a successful `deliver` and the
//! following ack redelivers the same block, so consumers must be idempotent
//! (e.g. keyed by `(chain, hash)`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ScanError;
use crate::types::{BlockNumber, TransferCandidate};

/// The transfers of one scanned block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferBatch {
    pub chain: String,
    pub block_number: BlockNumber,
    pub transfers: Vec<TransferCandidate>,
}

/// External consumer of scanned transfers.
#[async_trait]
pub trait TransferSink: Send + Sync {
    /// Hand off one block's transfers. An error keeps the block pending.
    async fn deliver(&self, batch: TransferBatch) -> Result<(), ScanError>;
}

/// Sink that forwards batches onto a bounded tokio channel.
///
/// Sending waits for channel capacity, so a slow consumer back-pressures the
/// scan ticks instead of growing memory.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<TransferBatch>,
}

impl ChannelSink {
    /// Create a sink and the receiving end of its channel.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<TransferBatch>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl TransferSink for ChannelSink {
    async fn deliver(&self, batch: TransferBatch) -> Result<(), ScanError> {
        self.tx
            .send(batch)
            .await
            .map_err(|_| ScanError::DeliveryFailed("transfer channel closed".into()))
    }
}
