//! Account-model EVM adapter.
//!
//! Extracts native value transfers and ERC-20 `transfer` calls to
//! allow-listed contracts. The fee is `gasUsed * effectiveGasPrice` (or the
//! transaction's `gasPrice` for legacy receipts) plus an optional
//! chain-specific adjustment, e.g. the L1 data fee of an optimistic rollup.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use chainscan_core::adapter::ChainAdapter;
use chainscan_core::error::ScanError;
use chainscan_core::types::{
    Block, BlockNumber, Receipt, Transaction, TransferCandidate, TransferStatus,
};

use crate::decode::{
    block_from_json, decode_erc20_transfer, is_zero_quantity, normalize_quantity, parse_hex_u128,
    receipt_from_json,
};
use crate::rpc::EvmRpcClient;

/// Extra fee on top of the base execution fee, computed from the receipt.
pub type FeeAdjustment = Arc<dyn Fn(&Receipt) -> Result<u128, ScanError> + Send + Sync>;

/// Fee adjustment adding the receipt's `l1Fee` field (OP-stack rollups).
/// Receipts without the field add nothing.
pub fn l1_fee_addend() -> FeeAdjustment {
    Arc::new(|receipt: &Receipt| match receipt.raw["l1Fee"].as_str() {
        None => Ok(0),
        Some(raw) => parse_hex_u128(raw).ok_or_else(|| {
            ScanError::Other(format!("receipt {}: bad l1Fee {raw}", receipt.tx_hash))
        }),
    })
}

/// What a transaction transfers, if anything.
#[derive(Debug, Clone, PartialEq, Eq)]
enum TransferKind {
    Native { to: String },
    Token { contract: String, to: String, amount: String },
}

pub struct EvmAdapter<C> {
    chain: String,
    client: C,
    contracts: HashSet<String>,
    fee_adjustment: Option<FeeAdjustment>,
}

impl<C: EvmRpcClient> EvmAdapter<C> {
    pub fn new<I, S>(chain: impl Into<String>, client: C, contracts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            chain: chain.into(),
            client,
            contracts: contracts
                .into_iter()
                .map(|c| c.as_ref().to_ascii_lowercase())
                .collect(),
            fee_adjustment: None,
        }
    }

    /// Add a fee adjustment to every computed fee.
    pub fn with_fee_adjustment(mut self, adjustment: FeeAdjustment) -> Self {
        self.fee_adjustment = Some(adjustment);
        self
    }

    fn classify(&self, tx: &Transaction) -> Option<TransferKind> {
        let to = tx.to.as_ref()?.to_ascii_lowercase();
        if tx.has_empty_input() {
            return (!is_zero_quantity(&tx.value)).then_some(TransferKind::Native { to });
        }
        if !self.contracts.contains(&to) {
            return None;
        }
        let call = decode_erc20_transfer(&tx.input)?;
        Some(TransferKind::Token {
            contract: to,
            to: call.to,
            amount: call.amount,
        })
    }

    /// Total fee paid by `tx`, in wei.
    pub fn fee(&self, tx: &Transaction, receipt: &Receipt) -> Result<u128, ScanError> {
        let bad = |what: &str| ScanError::Other(format!("receipt {}: bad {what}", receipt.tx_hash));
        let gas_used = receipt.raw["gasUsed"]
            .as_str()
            .and_then(parse_hex_u128)
            .ok_or_else(|| bad("gasUsed"))?;
        let price = receipt.raw["effectiveGasPrice"]
            .as_str()
            .or_else(|| tx.raw["gasPrice"].as_str())
            .and_then(parse_hex_u128)
            .ok_or_else(|| bad("gas price"))?;
        let base = gas_used.checked_mul(price).ok_or_else(|| bad("fee (overflow)"))?;
        let extra = match &self.fee_adjustment {
            Some(adjust) => adjust(receipt)?,
            None => 0,
        };
        base.checked_add(extra).ok_or_else(|| bad("fee (overflow)"))
    }
}

#[async_trait]
impl<C: EvmRpcClient> ChainAdapter for EvmAdapter<C> {
    async fn head_height(&self) -> Result<BlockNumber, ScanError> {
        self.client.get_block_number().await
    }

    async fn block(&self, number: BlockNumber) -> Result<Block, ScanError> {
        let raw = self
            .client
            .get_block_with_txs(number)
            .await?
            .ok_or_else(|| ScanError::FetchFailed(format!("block {number} not available")))?;
        let block = block_from_json(&raw)?;
        if block.number != number {
            return Err(ScanError::FetchFailed(format!(
                "requested block {number}, node returned {}",
                block.number
            )));
        }
        Ok(block)
    }

    async fn receipt(&self, tx_hash: &str) -> Result<Receipt, ScanError> {
        let raw = self
            .client
            .get_transaction_receipt(tx_hash)
            .await?
            .ok_or_else(|| ScanError::FetchFailed(format!("receipt {tx_hash} not available")))?;
        receipt_from_json(&raw)
    }

    fn extract_transfers(
        &self,
        block: &Block,
        txs: &[Transaction],
        receipts: &[Receipt],
    ) -> Result<Vec<TransferCandidate>, ScanError> {
        if txs.len() != receipts.len() {
            return Err(ScanError::ExtractionFailed {
                block_number: block.number,
                reason: format!("{} transactions but {} receipts", txs.len(), receipts.len()),
            });
        }
        let mut out = Vec::new();
        for (tx, receipt) in txs.iter().zip(receipts) {
            if receipt.block_number != block.number {
                return Err(ScanError::ExtractionFailed {
                    block_number: block.number,
                    reason: format!(
                        "receipt of {} is from block {}",
                        tx.hash, receipt.block_number
                    ),
                });
            }
            let Some(kind) = self.classify(tx) else {
                continue;
            };
            let fee = self.fee(tx, receipt).map_err(|e| ScanError::ExtractionFailed {
                block_number: block.number,
                reason: e.to_string(),
            })?;
            let (token, receiver, value) = match kind {
                TransferKind::Native { to } => (None, to, normalize_quantity(&tx.value)),
                TransferKind::Token { contract, to, amount } => (Some(contract), to, amount),
            };
            out.push(TransferCandidate {
                chain: self.chain.clone(),
                hash: tx.hash.clone(),
                block_number: block.number,
                timestamp: block.timestamp,
                sender: tx.from.to_ascii_lowercase(),
                receiver,
                token,
                value,
                fee: format!("{fee:#x}"),
                status: if receipt.success {
                    TransferStatus::Success
                } else {
                    TransferStatus::Failed
                },
                receipt: receipt.raw.clone(),
            });
        }
        Ok(out)
    }

    fn wants_receipt(&self, tx: &Transaction) -> bool {
        self.classify(tx).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::collections::HashMap;

    const USDC: &str = "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48";
    const ALICE: &str = "0x1111111111111111111111111111111111111111";
    const BOB: &str = "0x2222222222222222222222222222222222222222";

    /// Serves canned JSON-RPC results.
    #[derive(Default)]
    struct StaticRpc {
        head: u64,
        blocks: HashMap<u64, Value>,
        receipts: HashMap<String, Value>,
    }

    #[async_trait]
    impl EvmRpcClient for StaticRpc {
        async fn get_block_number(&self) -> Result<u64, ScanError> {
            Ok(self.head)
        }
        async fn get_block_with_txs(&self, number: u64) -> Result<Option<Value>, ScanError> {
            Ok(self.blocks.get(&number).cloned())
        }
        async fn get_transaction_receipt(&self, tx_hash: &str) -> Result<Option<Value>, ScanError> {
            Ok(self.receipts.get(tx_hash).cloned())
        }
    }

    fn transfer_input(to: &str, amount: &str) -> String {
        format!(
            "0xa9059cbb{:0>64}{:0>64}",
            to.trim_start_matches("0x"),
            amount.trim_start_matches("0x")
        )
    }

    fn rpc() -> StaticRpc {
        let txs = json!([
            // native transfer, EIP-1559
            { "hash": "0xt1", "from": ALICE, "to": BOB, "value": "0xde0b6b3a7640000",
              "input": "0x", "gasPrice": "0x2" },
            // ERC-20 transfer to an allow-listed token, legacy receipt
            { "hash": "0xt2", "from": ALICE, "to": USDC, "value": "0x0",
              "input": transfer_input(BOB, "0xf4240"), "gasPrice": "0x3" },
            // contract call to an unknown contract
            { "hash": "0xt3", "from": ALICE, "to": "0x3333333333333333333333333333333333333333",
              "value": "0x0", "input": "0xdeadbeef", "gasPrice": "0x1" },
            // contract creation
            { "hash": "0xt4", "from": ALICE, "to": null, "value": "0x0",
              "input": "0x6080", "gasPrice": "0x1" }
        ]);
        let mut rpc = StaticRpc {
            head: 0x100,
            ..Default::default()
        };
        rpc.blocks.insert(
            0x64,
            json!({ "number": "0x64", "hash": "0xb64", "parentHash": "0xb63",
                    "timestamp": "0x65000000", "transactions": txs }),
        );
        rpc.receipts.insert(
            "0xt1".into(),
            json!({ "transactionHash": "0xt1", "blockNumber": "0x64", "status": "0x1",
                    "gasUsed": "0x5208", "effectiveGasPrice": "0x3b9aca00", "l1Fee": "0x10" }),
        );
        rpc.receipts.insert(
            "0xt2".into(),
            json!({ "transactionHash": "0xt2", "blockNumber": "0x64", "status": "0x0",
                    "gasUsed": "0x100" }),
        );
        rpc
    }

    async fn extract(adapter: &EvmAdapter<StaticRpc>) -> Vec<TransferCandidate> {
        let block = adapter.block(0x64).await.unwrap();
        let txs: Vec<Transaction> = block
            .transactions
            .iter()
            .filter(|tx| adapter.wants_receipt(tx))
            .cloned()
            .collect();
        let mut receipts = Vec::new();
        for tx in &txs {
            receipts.push(adapter.receipt(&tx.hash).await.unwrap());
        }
        adapter.extract_transfers(&block, &txs, &receipts).unwrap()
    }

    #[tokio::test]
    async fn selects_only_transfer_transactions() {
        let adapter = EvmAdapter::new("eth", rpc(), [USDC]);
        let block = adapter.block(0x64).await.unwrap();
        let wanted: Vec<&str> = block
            .transactions
            .iter()
            .filter(|tx| adapter.wants_receipt(tx))
            .map(|tx| tx.hash.as_str())
            .collect();
        assert_eq!(wanted, vec!["0xt1", "0xt2"]);
    }

    #[tokio::test]
    async fn extracts_native_and_token_transfers() {
        let adapter = EvmAdapter::new("eth", rpc(), [USDC.to_uppercase()]);
        let out = extract(&adapter).await;
        assert_eq!(out.len(), 2);

        let native = &out[0];
        assert_eq!(native.token, None);
        assert_eq!(native.receiver, BOB);
        assert_eq!(native.value, "0xde0b6b3a7640000");
        assert_eq!(native.fee, format!("{:#x}", 0x5208u128 * 0x3b9aca00));
        assert_eq!(native.status, TransferStatus::Success);
        assert_eq!(native.timestamp, 0x65000000);

        let token = &out[1];
        assert_eq!(token.token.as_deref(), Some(USDC));
        assert_eq!(token.sender, ALICE);
        assert_eq!(token.receiver, BOB);
        assert_eq!(token.value, "0xf4240");
        // legacy receipt: falls back to the transaction gas price
        assert_eq!(token.fee, "0x300");
        assert_eq!(token.status, TransferStatus::Failed);
    }

    #[tokio::test]
    async fn l1_fee_is_added_when_configured() {
        let adapter = EvmAdapter::new("base", rpc(), [USDC]).with_fee_adjustment(l1_fee_addend());
        let out = extract(&adapter).await;
        assert_eq!(out[0].fee, format!("{:#x}", 0x5208u128 * 0x3b9aca00 + 0x10));
        // no l1Fee field → nothing added
        assert_eq!(out[1].fee, "0x300");
    }

    #[tokio::test]
    async fn missing_block_and_receipt_are_fetch_failures() {
        let adapter = EvmAdapter::new("eth", rpc(), Vec::<String>::new());
        assert!(adapter.block(1).await.unwrap_err().is_retryable());
        assert!(adapter.receipt("0xnope").await.unwrap_err().is_retryable());
        assert_eq!(adapter.head_height().await.unwrap(), 0x100);
    }

    #[tokio::test]
    async fn misaligned_receipts_fail_extraction() {
        let adapter = EvmAdapter::new("eth", rpc(), [USDC]);
        let block = adapter.block(0x64).await.unwrap();
        let err = adapter
            .extract_transfers(&block, &block.transactions, &[])
            .unwrap_err();
        assert!(matches!(err, ScanError::ExtractionFailed { block_number: 0x64, .. }));
    }

    #[tokio::test]
    async fn receipt_from_another_block_fails_extraction() {
        let mut rpc = rpc();
        rpc.receipts.insert(
            "0xt2".into(),
            json!({ "transactionHash": "0xt2", "blockNumber": "0x65", "status": "0x1",
                    "gasUsed": "0x100" }),
        );
        let adapter = EvmAdapter::new("eth", rpc, [USDC]);
        let block = adapter.block(0x64).await.unwrap();
        let txs = block.transactions[..2].to_vec();
        let receipts = vec![
            adapter.receipt("0xt1").await.unwrap(),
            adapter.receipt("0xt2").await.unwrap(),
        ];
        assert_eq!(receipts[1].block_number, 0x65);
        let err = adapter.extract_transfers(&block, &txs, &receipts).unwrap_err();
        assert!(matches!(err, ScanError::ExtractionFailed { block_number: 0x64, .. }));
    }
}
