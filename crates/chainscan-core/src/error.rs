//! Error types for the chainscan engine.

use thiserror::Error;

/// Errors that can occur while tracking heights or scanning blocks.
#[derive(Debug, Clone, Error)]
pub enum ScanError {
    #[error("{what} timed out after {ms}ms")]
    FetchTimeout { what: String, ms: u64 },

    #[error("fetch failed: {0}")]
    FetchFailed(String),

    #[error("receipt mismatch: requested {requested}, got {returned}")]
    ReceiptMismatch { requested: String, returned: String },

    #[error("extraction failed at block {block_number}: {reason}")]
    ExtractionFailed { block_number: u64, reason: String },

    #[error("delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("checkpoint store I/O failed: {0}")]
    CheckpointWriteFailed(String),

    #[error("head height unavailable for chain '{chain}'")]
    HeadUnavailable { chain: String },

    #[error("unknown chain '{0}'")]
    UnknownChain(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl ScanError {
    /// Returns `true` if the same call may succeed when attempted again
    /// within the current tick.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::FetchTimeout { .. } | Self::FetchFailed(_))
    }

    /// Returns `true` if the durable checkpoint store failed.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::CheckpointWriteFailed(_))
    }
}
