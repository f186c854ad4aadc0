//! Scriptable in-memory chain adapter for tests (`test-util` feature).
//!
//! Blocks carry one transaction per `(sender, receiver)` pair; every
//! transaction with a recipient becomes a native transfer on extraction.
//! Failures, delays and receipt mismatches can be injected per block or
//! transaction.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::adapter::{AdapterFactory, ChainAdapter};
use crate::config::ChainConfig;
use crate::error::ScanError;
use crate::types::{
    Block, BlockNumber, Receipt, Transaction, TransferCandidate, TransferStatus,
};

#[derive(Default)]
struct MockState {
    head: Option<BlockNumber>,
    blocks: HashMap<BlockNumber, Block>,
    receipts: HashMap<String, Receipt>,
    block_failures: HashMap<BlockNumber, u32>,
    block_delays: HashMap<BlockNumber, Duration>,
    block_calls: HashMap<BlockNumber, u32>,
    failing_extractions: HashSet<BlockNumber>,
    mismatched_receipts: HashSet<String>,
    receipt_failures: HashMap<String, u32>,
    receipt_delays: HashMap<String, Duration>,
    receipt_calls: HashMap<String, u32>,
    head_delay: Option<Duration>,
}

/// A fake chain driven entirely from test code.
pub struct MockChain {
    chain: String,
    state: Mutex<MockState>,
}

impl MockChain {
    pub fn new(chain: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            chain: chain.into(),
            state: Mutex::new(MockState::default()),
        })
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        f(&mut self.state.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Set the head height; `None` makes `head_height` fail.
    pub fn set_head(&self, head: Option<BlockNumber>) {
        self.with_state(|s| s.head = head);
    }

    /// Make `head_height` sleep before answering.
    pub fn delay_head(&self, delay: Duration) {
        self.with_state(|s| s.head_delay = Some(delay));
    }

    /// Add block `number` with one successful transaction per pair.
    pub fn add_block(&self, number: BlockNumber, transfers: &[(&str, &str)]) {
        let transactions: Vec<Transaction> = transfers
            .iter()
            .enumerate()
            .map(|(i, (from, to))| Transaction {
                hash: format!("0x{}{:08x}{:04x}", self.chain, number, i),
                from: (*from).to_string(),
                to: Some((*to).to_string()),
                value: "0x1".into(),
                input: "0x".into(),
                raw: serde_json::Value::Null,
            })
            .collect();
        self.with_state(|s| {
            for tx in &transactions {
                s.receipts.insert(
                    tx.hash.clone(),
                    Receipt {
                        tx_hash: tx.hash.clone(),
                        block_number: number,
                        success: true,
                        raw: serde_json::json!({ "transactionHash": tx.hash }),
                    },
                );
            }
            s.blocks.insert(
                number,
                Block {
                    number,
                    hash: format!("0x{number:064x}"),
                    parent_hash: format!("0x{:064x}", number.saturating_sub(1)),
                    timestamp: 1_700_000_000 + number as i64 * 12,
                    transactions,
                },
            );
        });
    }

    /// Add empty blocks for every number in `range`.
    pub fn add_empty_blocks(&self, range: std::ops::Range<BlockNumber>) {
        for n in range {
            self.add_block(n, &[]);
        }
    }

    /// Fail the next `times` fetches of block `number`.
    pub fn fail_block(&self, number: BlockNumber, times: u32) {
        self.with_state(|s| {
            s.block_failures.insert(number, times);
        });
    }

    /// Make every fetch of block `number` sleep for `delay` first.
    pub fn delay_block(&self, number: BlockNumber, delay: Duration) {
        self.with_state(|s| {
            s.block_delays.insert(number, delay);
        });
    }

    /// Make extraction of block `number` fail.
    pub fn fail_extraction(&self, number: BlockNumber) {
        self.with_state(|s| {
            s.failing_extractions.insert(number);
        });
    }

    /// Return a receipt for the wrong transaction when `tx_hash` is requested.
    pub fn mismatch_receipt(&self, tx_hash: &str) {
        self.with_state(|s| {
            s.mismatched_receipts.insert(tx_hash.to_string());
        });
    }

    /// Fail the next `times` fetches of the receipt of `tx_hash`.
    pub fn fail_receipt(&self, tx_hash: &str, times: u32) {
        self.with_state(|s| {
            s.receipt_failures.insert(tx_hash.to_string(), times);
        });
    }

    /// Make every fetch of the receipt of `tx_hash` sleep for `delay` first.
    pub fn delay_receipt(&self, tx_hash: &str, delay: Duration) {
        self.with_state(|s| {
            s.receipt_delays.insert(tx_hash.to_string(), delay);
        });
    }

    /// Report the receipt of `tx_hash` as included in block `number`, as a
    /// node would after a reorg.
    pub fn move_receipt(&self, tx_hash: &str, number: BlockNumber) {
        self.with_state(|s| {
            if let Some(receipt) = s.receipts.get_mut(tx_hash) {
                receipt.block_number = number;
            }
        });
    }

    /// How many times the receipt of `tx_hash` was requested.
    pub fn receipt_fetches(&self, tx_hash: &str) -> u32 {
        self.with_state(|s| s.receipt_calls.get(tx_hash).copied().unwrap_or(0))
    }

    /// How many times block `number` was requested.
    pub fn block_fetches(&self, number: BlockNumber) -> u32 {
        self.with_state(|s| s.block_calls.get(&number).copied().unwrap_or(0))
    }

    /// Hash of transaction `index` in block `number`.
    pub fn tx_hash(&self, number: BlockNumber, index: usize) -> Option<String> {
        self.with_state(|s| {
            s.blocks
                .get(&number)
                .and_then(|b| b.transactions.get(index))
                .map(|tx| tx.hash.clone())
        })
    }
}

#[async_trait]
impl ChainAdapter for MockChain {
    async fn head_height(&self) -> Result<BlockNumber, ScanError> {
        let (head, delay) = self.with_state(|s| (s.head, s.head_delay));
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        head.ok_or_else(|| ScanError::FetchFailed("head unavailable".into()))
    }

    async fn block(&self, number: BlockNumber) -> Result<Block, ScanError> {
        let delay = self.with_state(|s| {
            *s.block_calls.entry(number).or_default() += 1;
            s.block_delays.get(&number).copied()
        });
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.with_state(|s| {
            if let Some(left) = s.block_failures.get_mut(&number) {
                if *left > 0 {
                    *left -= 1;
                    return Err(ScanError::FetchFailed(format!("block {number}: 503")));
                }
            }
            s.blocks
                .get(&number)
                .cloned()
                .ok_or_else(|| ScanError::FetchFailed(format!("block {number} not found")))
        })
    }

    async fn receipt(&self, tx_hash: &str) -> Result<Receipt, ScanError> {
        let delay = self.with_state(|s| {
            *s.receipt_calls.entry(tx_hash.to_string()).or_default() += 1;
            s.receipt_delays.get(tx_hash).copied()
        });
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.with_state(|s| {
            if let Some(left) = s.receipt_failures.get_mut(tx_hash) {
                if *left > 0 {
                    *left -= 1;
                    return Err(ScanError::FetchFailed(format!("receipt {tx_hash}: 503")));
                }
            }
            let mut receipt = s
                .receipts
                .get(tx_hash)
                .cloned()
                .ok_or_else(|| ScanError::FetchFailed(format!("receipt {tx_hash} not found")))?;
            if s.mismatched_receipts.contains(tx_hash) {
                receipt.tx_hash = "0xdeadbeef".into();
            }
            Ok(receipt)
        })
    }

    fn extract_transfers(
        &self,
        block: &Block,
        txs: &[Transaction],
        receipts: &[Receipt],
    ) -> Result<Vec<TransferCandidate>, ScanError> {
        if self.with_state(|s| s.failing_extractions.contains(&block.number)) {
            return Err(ScanError::ExtractionFailed {
                block_number: block.number,
                reason: "injected".into(),
            });
        }
        Ok(txs
            .iter()
            .zip(receipts)
            .filter_map(|(tx, receipt)| {
                Some(TransferCandidate {
                    chain: self.chain.clone(),
                    hash: tx.hash.clone(),
                    block_number: block.number,
                    timestamp: block.timestamp,
                    sender: tx.from.clone(),
                    receiver: tx.to.clone()?,
                    token: None,
                    value: tx.value.clone(),
                    fee: "0x0".into(),
                    status: if receipt.success {
                        TransferStatus::Success
                    } else {
                        TransferStatus::Failed
                    },
                    receipt: receipt.raw.clone(),
                })
            })
            .collect())
    }
}

/// Factory handing out pre-registered [`MockChain`]s by chain identifier.
#[derive(Default)]
pub struct MockFactory {
    chains: Mutex<HashMap<String, Arc<MockChain>>>,
    builds: AtomicU32,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, chain: &str, mock: Arc<MockChain>) {
        self.chains
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(chain.to_string(), mock);
    }

    /// Number of adapters built so far.
    pub fn builds(&self) -> u32 {
        self.builds.load(Ordering::SeqCst)
    }
}

impl AdapterFactory for MockFactory {
    fn build(&self, config: &ChainConfig) -> Result<Arc<dyn ChainAdapter>, ScanError> {
        let mock = self
            .chains
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&config.chain)
            .cloned()
            .ok_or_else(|| ScanError::Config(format!("no mock for chain '{}'", config.chain)))?;
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(mock)
    }
}
