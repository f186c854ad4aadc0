//! Scan executor — drains the pending set through
//! fetch → receipts → extract → filter → deliver → ack.
//!
//! Blocks of one batch are processed concurrently and independently. Any
//! failure on a block turns into a noack for that block only; store errors
//! abort the tick.

use std::sync::Arc;

use futures::{stream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::adapter::ChainAdapter;
use crate::checkpoint::CheckpointManager;
use crate::config::ChainConfig;
use crate::error::ScanError;
use crate::registry::ChainHandle;
use crate::retry::RetryPolicy;
use crate::sink::{TransferBatch, TransferSink};
use crate::types::{BlockNumber, Receipt, Transaction, TransferCandidate};
use crate::watch::{filter_watched, WatchPredicate};

/// Result of one scan tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    /// Blocks delivered and removed from the pending set (ascending).
    pub acked: Vec<BlockNumber>,
    /// Blocks that failed and stay pending (ascending).
    pub noacked: Vec<BlockNumber>,
    /// Transfers delivered downstream.
    pub transfers: usize,
}

impl ScanReport {
    /// `true` when the pending set was empty.
    pub fn is_idle(&self) -> bool {
        self.acked.is_empty() && self.noacked.is_empty()
    }
}

/// Per-tick context shared by every block of a batch.
struct BatchContext<'a> {
    chain: &'a str,
    config: &'a ChainConfig,
    adapter: Arc<dyn ChainAdapter>,
    policy: RetryPolicy,
}

pub struct ScanExecutor {
    checkpoints: Arc<CheckpointManager>,
    watch: Arc<dyn WatchPredicate>,
    sink: Arc<dyn TransferSink>,
}

impl ScanExecutor {
    pub fn new(
        checkpoints: Arc<CheckpointManager>,
        watch: Arc<dyn WatchPredicate>,
        sink: Arc<dyn TransferSink>,
    ) -> Self {
        Self {
            checkpoints,
            watch,
            sink,
        }
    }

    /// Scan up to `batch_limit` pending blocks of `chain`.
    pub async fn tick(&self, chain: &ChainHandle) -> Result<ScanReport, ScanError> {
        let config = chain.config();
        let id = chain.id();

        let blocks = self.checkpoints.dequeue_pending(id, config.batch_limit).await?;
        if blocks.is_empty() {
            return Ok(ScanReport::default());
        }

        let ctx = BatchContext {
            chain: id,
            policy: RetryPolicy::from(&config.fetch),
            adapter: chain.adapter()?,
            config: &config,
        };

        let jobs: Vec<_> = blocks
            .into_iter()
            .map(|number| {
                let ctx = &ctx;
                async move { (number, self.scan_block(ctx, number).await) }
            })
            .collect();
        let outcomes: Vec<(BlockNumber, Result<usize, ScanError>)> = stream::iter(jobs)
            .buffer_unordered(config.block_concurrency.max(1))
            .collect()
            .await;

        let mut report = ScanReport::default();
        for (number, outcome) in outcomes {
            match outcome {
                Ok(delivered) => {
                    report.acked.push(number);
                    report.transfers += delivered;
                }
                Err(e) => {
                    warn!(chain = id, block = number, error = %e, "Block scan failed, left pending");
                    report.noacked.push(number);
                }
            }
        }
        report.acked.sort_unstable();
        report.noacked.sort_unstable();

        self.checkpoints.ack(id, &report.acked).await?;
        self.checkpoints.noack(id, &report.noacked).await?;

        debug!(
            chain = id,
            acked = report.acked.len(),
            noacked = report.noacked.len(),
            transfers = report.transfers,
            "Scan tick complete"
        );
        Ok(report)
    }

    /// Run the pipeline over explicit block numbers, outside the pending set.
    ///
    /// Transfers of every block that succeeds are delivered. If any block
    /// fails, the error of the lowest failing block number is returned after
    /// the others have been delivered. The checkpoint and pending set are
    /// never touched.
    pub async fn manual_scan(
        &self,
        chain: &ChainHandle,
        blocks: &[BlockNumber],
    ) -> Result<Vec<TransferCandidate>, ScanError> {
        let config = chain.config();
        let ctx = BatchContext {
            chain: chain.id(),
            policy: RetryPolicy::from(&config.fetch),
            adapter: chain.adapter()?,
            config: &config,
        };

        let mut ordered = blocks.to_vec();
        ordered.sort_unstable();
        ordered.dedup();

        let jobs: Vec<_> = ordered
            .into_iter()
            .map(|number| {
                let ctx = &ctx;
                async move { (number, self.process_block(ctx, number).await) }
            })
            .collect();
        let outcomes: Vec<(BlockNumber, Result<Vec<TransferCandidate>, ScanError>)> =
            stream::iter(jobs)
                .buffered(config.block_concurrency.max(1))
                .collect()
                .await;

        let mut transfers = Vec::new();
        let mut first_error = None;
        for (number, outcome) in outcomes {
            let delivered = match outcome {
                Ok(found) => self.deliver(ctx.chain, number, found).await,
                Err(e) => Err(e),
            };
            match delivered {
                Ok(found) => transfers.extend(found),
                Err(e) => {
                    warn!(chain = ctx.chain, block = number, error = %e, "Manual scan failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(transfers),
        }
    }

    /// Process and deliver one block; returns the number of transfers handed off.
    async fn scan_block(&self, ctx: &BatchContext<'_>, number: BlockNumber) -> Result<usize, ScanError> {
        let transfers = self.process_block(ctx, number).await?;
        let delivered = self.deliver(ctx.chain, number, transfers).await?;
        Ok(delivered.len())
    }

    /// Fetch, extract and filter one block.
    async fn process_block(
        &self,
        ctx: &BatchContext<'_>,
        number: BlockNumber,
    ) -> Result<Vec<TransferCandidate>, ScanError> {
        let adapter = ctx.adapter.clone();
        let block = ctx
            .policy
            .run(&format!("{} block {number}", ctx.chain), || {
                let adapter = adapter.clone();
                async move { adapter.block(number).await }
            })
            .await?;

        let txs: Vec<Transaction> = block
            .transactions
            .iter()
            .filter(|tx| ctx.adapter.wants_receipt(tx))
            .cloned()
            .collect();

        // Fail fast: the first receipt that cannot be fetched fails the block.
        let fetches: Vec<_> = txs.iter().map(|tx| fetch_receipt(ctx, number, tx)).collect();
        let receipts: Vec<Receipt> = stream::iter(fetches)
            .buffered(ctx.config.receipt_concurrency.max(1))
            .try_collect()
            .await?;

        let candidates = ctx
            .adapter
            .extract_transfers(&block, &txs, &receipts)
            .map_err(|e| match e {
                ScanError::ExtractionFailed { .. } => e,
                other => ScanError::ExtractionFailed {
                    block_number: number,
                    reason: other.to_string(),
                },
            })?;
        let found = candidates.len();
        let kept = filter_watched(self.watch.as_ref(), candidates).await?;
        debug!(
            chain = ctx.chain,
            block = number,
            txs = block.tx_count(),
            receipts = receipts.len(),
            found,
            kept = kept.len(),
            "Block processed"
        );
        Ok(kept)
    }

    /// Hand a block's transfers to the sink. Blocks without matches are not
    /// delivered.
    async fn deliver(
        &self,
        chain: &str,
        number: BlockNumber,
        transfers: Vec<TransferCandidate>,
    ) -> Result<Vec<TransferCandidate>, ScanError> {
        if transfers.is_empty() {
            return Ok(transfers);
        }
        self.sink
            .deliver(TransferBatch {
                chain: chain.to_string(),
                block_number: number,
                transfers: transfers.clone(),
            })
            .await
            .map_err(|e| match e {
                ScanError::DeliveryFailed(_) => e,
                other => ScanError::DeliveryFailed(other.to_string()),
            })?;
        Ok(transfers)
    }
}

/// Fetch one receipt with retry and check that it belongs to `tx` as
/// included in block `number`.
async fn fetch_receipt(
    ctx: &BatchContext<'_>,
    number: BlockNumber,
    tx: &Transaction,
) -> Result<Receipt, ScanError> {
    let adapter = ctx.adapter.clone();
    let hash = tx.hash.clone();
    let receipt = ctx
        .policy
        .run(&format!("{} receipt {hash}", ctx.chain), || {
            let adapter = adapter.clone();
            let hash = hash.clone();
            async move { adapter.receipt(&hash).await }
        })
        .await?;
    if !receipt.tx_hash.eq_ignore_ascii_case(&tx.hash) {
        return Err(ScanError::ReceiptMismatch {
            requested: tx.hash.clone(),
            returned: receipt.tx_hash,
        });
    }
    // A receipt from another block means the node saw a reorg mid-scan.
    if receipt.block_number != number {
        return Err(ScanError::ReceiptMismatch {
            requested: format!("{} in block {number}", tx.hash),
            returned: format!("{} in block {}", receipt.tx_hash, receipt.block_number),
        });
    }
    Ok(receipt)
}
