//! Shared types for the scanning pipeline.

use serde::{Deserialize, Serialize};

use crate::error::ScanError;

/// Height of a block on its chain.
pub type BlockNumber = u64;

/// Result of a fetch-with-retry call: the fetched value, or the error of the
/// last attempt. Never persisted.
pub type RetryableFetch<T> = Result<T, ScanError>;

// ─── Block ────────────────────────────────────────────────────────────────────

/// A fetched block with its transactions, as normalised by a chain adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Block number.
    pub number: BlockNumber,
    /// Block hash (`0x…`).
    pub hash: String,
    /// Parent block hash (`0x…`).
    pub parent_hash: String,
    /// Unix timestamp of the block (seconds since epoch).
    pub timestamp: i64,
    /// Transactions included in the block.
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Number of transactions in the block.
    pub fn tx_count(&self) -> usize {
        self.transactions.len()
    }
}

/// A transaction as carried inside a [`Block`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction hash (`0x…`).
    pub hash: String,
    /// Sender address.
    pub from: String,
    /// Recipient / called contract (`None` for contract creation).
    pub to: Option<String>,
    /// Native value as a `0x`-prefixed hex quantity.
    pub value: String,
    /// Calldata (`0x…`).
    pub input: String,
    /// The chain's raw transaction object.
    pub raw: serde_json::Value,
}

impl Transaction {
    /// Returns `true` if the transaction carries no calldata.
    pub fn has_empty_input(&self) -> bool {
        matches!(self.input.as_str(), "" | "0x" | "0X")
    }
}

/// A transaction receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Hash of the transaction this receipt belongs to.
    pub tx_hash: String,
    /// Block the transaction was included in.
    pub block_number: BlockNumber,
    /// `true` if execution succeeded.
    pub success: bool,
    /// The chain's raw receipt object.
    pub raw: serde_json::Value,
}

// ─── TransferCandidate ───────────────────────────────────────────────────────

/// Execution status of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Success,
    Failed,
}

/// A transfer extracted by a chain adapter.
///
/// The engine only looks at `sender` / `receiver` (watch filtering) and
/// `timestamp` (reporting); everything else is opaque payload for the
/// downstream consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCandidate {
    /// Chain identifier (e.g. `"ethereum"`).
    pub chain: String,
    /// Transaction hash.
    pub hash: String,
    /// Block the transfer was included in.
    pub block_number: BlockNumber,
    /// Block timestamp (seconds since epoch).
    pub timestamp: i64,
    /// Sending address.
    pub sender: String,
    /// Receiving address.
    pub receiver: String,
    /// Token contract, `None` for the native asset.
    pub token: Option<String>,
    /// Transferred amount as a `0x`-prefixed hex quantity.
    pub value: String,
    /// Fee paid by the sender as a `0x`-prefixed hex quantity.
    pub fee: String,
    /// Execution status.
    pub status: TransferStatus,
    /// The raw receipt backing this transfer.
    pub receipt: serde_json::Value,
}

impl TransferCandidate {
    /// Returns `true` if either side of the transfer is `address`
    /// (case-insensitive).
    pub fn involves(&self, address: &str) -> bool {
        self.sender.eq_ignore_ascii_case(address) || self.receiver.eq_ignore_ascii_case(address)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(sender: &str, receiver: &str) -> TransferCandidate {
        TransferCandidate {
            chain: "ethereum".into(),
            hash: "0xabc".into(),
            block_number: 100,
            timestamp: 1_700_000_000,
            sender: sender.into(),
            receiver: receiver.into(),
            token: None,
            value: "0x1".into(),
            fee: "0x0".into(),
            status: TransferStatus::Success,
            receipt: serde_json::Value::Null,
        }
    }

    #[test]
    fn involves_is_case_insensitive() {
        let t = transfer("0xAbCd", "0x1111");
        assert!(t.involves("0xabcd"));
        assert!(t.involves("0x1111"));
        assert!(!t.involves("0x2222"));
    }

    #[test]
    fn empty_input_detection() {
        let mut tx = Transaction {
            hash: "0x1".into(),
            from: "0xa".into(),
            to: Some("0xb".into()),
            value: "0x10".into(),
            input: "0x".into(),
            raw: serde_json::Value::Null,
        };
        assert!(tx.has_empty_input());
        tx.input = "0xa9059cbb".into();
        assert!(!tx.has_empty_input());
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&TransferStatus::Failed).unwrap();
        assert_eq!(json, "\"failed\"");
    }
}
