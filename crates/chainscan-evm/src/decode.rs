//! Decoding of EVM JSON-RPC payloads into the engine's data model.

use serde_json::Value;

use chainscan_core::error::ScanError;
use chainscan_core::types::{Block, BlockNumber, Receipt, Transaction};

/// `transfer(address,uint256)` selector.
pub const ERC20_TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];

/// Parse a hex-encoded quantity (with or without `0x`) to u64.
pub fn parse_hex_u64(s: &str) -> Option<u64> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return None;
    }
    u64::from_str_radix(s, 16).ok()
}

/// Parse a hex-encoded quantity (with or without `0x`) to u128.
pub fn parse_hex_u128(s: &str) -> Option<u128> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return None;
    }
    u128::from_str_radix(s, 16).ok()
}

/// Canonical `0x`-prefixed quantity without leading zeros (`"0x0"` for zero).
pub fn normalize_quantity(s: &str) -> String {
    let digits = s.strip_prefix("0x").unwrap_or(s).trim_start_matches('0');
    if digits.is_empty() {
        "0x0".into()
    } else {
        format!("0x{}", digits.to_ascii_lowercase())
    }
}

/// Returns `true` for a zero (or empty) quantity.
pub fn is_zero_quantity(s: &str) -> bool {
    normalize_quantity(s) == "0x0"
}

fn field<'a>(v: &'a Value, key: &str, what: &str) -> Result<&'a str, ScanError> {
    v[key]
        .as_str()
        .ok_or_else(|| ScanError::FetchFailed(format!("{what}: missing or invalid `{key}`")))
}

fn quantity(v: &Value, key: &str, what: &str) -> Result<u64, ScanError> {
    let raw = field(v, key, what)?;
    parse_hex_u64(raw).ok_or_else(|| ScanError::FetchFailed(format!("{what}: bad `{key}` {raw}")))
}

/// Decode an `eth_getBlockByNumber(n, true)` result.
///
/// Blocks returned with hash-only transaction lists are rejected.
pub fn block_from_json(v: &Value) -> Result<Block, ScanError> {
    let number = quantity(v, "number", "block")?;
    let what = format!("block {number}");
    let transactions = v["transactions"]
        .as_array()
        .ok_or_else(|| ScanError::FetchFailed(format!("{what}: missing `transactions`")))?
        .iter()
        .map(|tx| tx_from_json(tx, &what))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Block {
        number,
        hash: field(v, "hash", &what)?.to_string(),
        parent_hash: field(v, "parentHash", &what)?.to_string(),
        timestamp: quantity(v, "timestamp", &what)? as i64,
        transactions,
    })
}

fn tx_from_json(v: &Value, what: &str) -> Result<Transaction, ScanError> {
    if !v.is_object() {
        return Err(ScanError::FetchFailed(format!(
            "{what}: transactions were not returned in full"
        )));
    }
    let hash = field(v, "hash", what)?.to_string();
    let input = v["input"]
        .as_str()
        .or_else(|| v["data"].as_str())
        .unwrap_or("0x")
        .to_string();
    Ok(Transaction {
        from: field(v, "from", what)?.to_string(),
        to: v["to"].as_str().map(str::to_string),
        value: v["value"].as_str().unwrap_or("0x0").to_string(),
        input,
        raw: v.clone(),
        hash,
    })
}

/// Decode an `eth_getTransactionReceipt` result.
///
/// Receipts without `status` (pre-Byzantium) are treated as successful.
pub fn receipt_from_json(v: &Value) -> Result<Receipt, ScanError> {
    let tx_hash = field(v, "transactionHash", "receipt")?.to_string();
    let what = format!("receipt {tx_hash}");
    let block_number: BlockNumber = quantity(v, "blockNumber", &what)?;
    let success = match v["status"].as_str() {
        Some(status) => parse_hex_u64(status) == Some(1),
        None => true,
    };
    Ok(Receipt {
        tx_hash,
        block_number,
        success,
        raw: v.clone(),
    })
}

/// Decoded `transfer(address,uint256)` calldata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Erc20Transfer {
    /// Recipient, `0x`-prefixed lowercase.
    pub to: String,
    /// Amount, normalized hex quantity.
    pub amount: String,
}

/// Decode ERC-20 `transfer` calldata; `None` for any other call.
pub fn decode_erc20_transfer(input: &str) -> Option<Erc20Transfer> {
    let bytes = hex::decode(input.strip_prefix("0x").unwrap_or(input)).ok()?;
    if bytes.len() != 4 + 32 + 32 || bytes[..4] != ERC20_TRANSFER_SELECTOR {
        return None;
    }
    let to_word = &bytes[4..36];
    // Address words are left-padded with 12 zero bytes.
    if to_word[..12].iter().any(|b| *b != 0) {
        return None;
    }
    Some(Erc20Transfer {
        to: format!("0x{}", hex::encode(&to_word[12..])),
        amount: normalize_quantity(&hex::encode(&bytes[36..68])),
    })
}
