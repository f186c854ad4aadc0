//! The chain adapter seam: everything chain-specific lives behind
//! [`ChainAdapter`], and the engine never special-cases a chain identity.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ChainConfig;
use crate::error::ScanError;
use crate::types::{Block, BlockNumber, Receipt, Transaction, TransferCandidate};

/// Per-chain access to heights, blocks and receipts, plus transfer extraction.
///
/// # Thread Safety
/// Implementations must be `Send + Sync`; one instance is shared by every
/// tick of its chain and reused across ticks.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    /// Current head height of the chain.
    async fn head_height(&self) -> Result<BlockNumber, ScanError>;

    /// Fetch block `number` with its transactions.
    async fn block(&self, number: BlockNumber) -> Result<Block, ScanError>;

    /// Fetch the receipt of transaction `tx_hash`.
    async fn receipt(&self, tx_hash: &str) -> Result<Receipt, ScanError>;

    /// Extract transfer candidates from a block, its selected transactions
    /// and their receipts (`receipts[i]` belongs to `txs[i]`).
    fn extract_transfers(
        &self,
        block: &Block,
        txs: &[Transaction],
        receipts: &[Receipt],
    ) -> Result<Vec<TransferCandidate>, ScanError>;

    /// Whether the executor should fetch a receipt for `tx` and hand it to
    /// [`extract_transfers`](Self::extract_transfers). Defaults to every transaction.
    fn wants_receipt(&self, _tx: &Transaction) -> bool {
        true
    }
}

/// Builds adapters from chain configuration.
///
/// The registry calls this lazily and again whenever a chain's endpoint changes.
pub trait AdapterFactory: Send + Sync {
    fn build(&self, config: &ChainConfig) -> Result<Arc<dyn ChainAdapter>, ScanError>;
}
