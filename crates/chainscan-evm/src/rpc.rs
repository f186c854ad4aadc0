//! JSON-RPC access to an EVM node.
//!
//! [`EvmRpcClient`] is the narrow surface the adapter needs; [`HttpEvmClient`]
//! implements it over HTTP with `reqwest`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::trace;

use chainscan_core::error::ScanError;

use crate::decode::parse_hex_u64;

/// Trait for fetching raw EVM data from a JSON-RPC provider.
#[async_trait]
pub trait EvmRpcClient: Send + Sync {
    /// `eth_blockNumber`.
    async fn get_block_number(&self) -> Result<u64, ScanError>;

    /// `eth_getBlockByNumber(n, true)`; `None` if the node does not have it.
    async fn get_block_with_txs(&self, number: u64) -> Result<Option<Value>, ScanError>;

    /// `eth_getTransactionReceipt`; `None` if not yet available.
    async fn get_transaction_receipt(&self, tx_hash: &str) -> Result<Option<Value>, ScanError>;
}

// ─── Wire types ──────────────────────────────────────────────────────────────

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Vec<Value>,
    pub id: u64,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            method: method.into(),
            params,
            id,
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// The result value (`null` when absent), or the RPC error as `FetchFailed`.
    pub fn into_result(self, method: &str) -> Result<Value, ScanError> {
        match self.error {
            Some(err) => Err(ScanError::FetchFailed(format!(
                "{method}: JSON-RPC error {}: {}",
                err.code, err.message
            ))),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

// ─── HTTP client ─────────────────────────────────────────────────────────────

/// HTTP JSON-RPC client. Connections are pooled by `reqwest` and reused
/// across calls.
pub struct HttpEvmClient {
    url: String,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl HttpEvmClient {
    /// Create a client for `url`. `request_timeout` bounds each HTTP call.
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, ScanError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ScanError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            url: url.into(),
            http,
            next_id: AtomicU64::new(1),
        })
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, ScanError> {
        let req = JsonRpcRequest::new(self.next_id.fetch_add(1, Ordering::Relaxed), method, params);
        trace!(url = %self.url, method, id = req.id, "rpc call");

        let resp = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(|e| ScanError::FetchFailed(format!("{method}: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ScanError::FetchFailed(format!("{method}: HTTP {status}: {body}")));
        }

        resp.json::<JsonRpcResponse>()
            .await
            .map_err(|e| ScanError::FetchFailed(format!("{method}: {e}")))?
            .into_result(method)
    }
}

#[async_trait]
impl EvmRpcClient for HttpEvmClient {
    async fn get_block_number(&self) -> Result<u64, ScanError> {
        let v = self.call("eth_blockNumber", vec![]).await?;
        v.as_str()
            .and_then(parse_hex_u64)
            .ok_or_else(|| ScanError::FetchFailed(format!("eth_blockNumber: bad result {v}")))
    }

    async fn get_block_with_txs(&self, number: u64) -> Result<Option<Value>, ScanError> {
        let v = self
            .call("eth_getBlockByNumber", vec![json!(format!("{number:#x}")), json!(true)])
            .await?;
        Ok((!v.is_null()).then_some(v))
    }

    async fn get_transaction_receipt(&self, tx_hash: &str) -> Result<Option<Value>, ScanError> {
        let v = self.call("eth_getTransactionReceipt", vec![json!(tx_hash)]).await?;
        Ok((!v.is_null()).then_some(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serialization() {
        let req = JsonRpcRequest::new(7, "eth_getBlockByNumber", vec![json!("0x64"), json!(true)]);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"method\":\"eth_getBlockByNumber\""));
        assert!(json.contains("[\"0x64\",true]"));
    }

    #[test]
    fn response_error_is_fetch_failure() {
        let resp: JsonRpcResponse = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": { "code": -32005, "message": "limit exceeded" }
        }))
        .unwrap();
        let err = resp.into_result("eth_blockNumber").unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("limit exceeded"));
    }

    #[test]
    fn null_result_is_null() {
        let resp: JsonRpcResponse =
            serde_json::from_value(json!({ "jsonrpc": "2.0", "id": 1, "result": null })).unwrap();
        assert!(resp.into_result("eth_getTransactionReceipt").unwrap().is_null());
    }
}
