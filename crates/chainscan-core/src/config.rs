//! Engine and per-chain configuration.
//!
//! Loaded from YAML; every field except the chain identifier and endpoint
//! has a default.
//!
//! ```yaml
//! chains:
//!   - chain: ethereum
//!     endpoint: https://eth.example.org
//!     confirmation_depth: 12
//!     contracts: ["0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"]
//!   - chain: base
//!     endpoint: https://base.example.org
//!     fee_model: l1_fee
//! watch_addresses: ["0x1111111111111111111111111111111111111111"]
//! ```

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ScanError;

// ─── ChainConfig ──────────────────────────────────────────────────────────────

/// How an EVM adapter composes the fee of a transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeModel {
    /// `gasUsed * effectiveGasPrice`.
    #[default]
    Standard,
    /// Standard fee plus the receipt's `l1Fee` (optimistic rollups).
    L1Fee,
}

/// Retry/timeout discipline for block and receipt fetches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Total attempts per call (first try included).
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    /// Timeout of a single attempt, in milliseconds.
    #[serde(default = "default_fetch_timeout_ms")]
    pub timeout_ms: u64,
    /// Initial backoff between attempts, in milliseconds (doubles per attempt).
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_attempts() -> u32 { 2 }
fn default_fetch_timeout_ms() -> u64 { 5 * 60 * 1000 }
fn default_backoff_ms() -> u64 { 500 }

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            timeout_ms: default_fetch_timeout_ms(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Configuration of one scanned chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Chain identifier; also the storage namespace.
    pub chain: String,
    /// RPC/API endpoint.
    pub endpoint: String,
    /// Maximum block numbers drawn per scan tick.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: u64,
    /// Blocks held back from the head before they are considered safe.
    #[serde(default = "default_confirmation_depth")]
    pub confirmation_depth: u64,
    /// One-time look-back applied on the first height tick after a restart.
    /// `None` = `batch_limit`.
    #[serde(default)]
    pub look_back: Option<u64>,
    /// Cap on newly safe block numbers enqueued by a single height tick.
    #[serde(default = "default_max_enqueue_per_tick")]
    pub max_enqueue_per_tick: u64,
    /// Timeout of the head-height call, in milliseconds.
    #[serde(default = "default_head_timeout_ms")]
    pub head_timeout_ms: u64,
    /// Block/receipt fetch discipline.
    #[serde(default)]
    pub fetch: FetchConfig,
    /// Blocks of one batch processed concurrently.
    #[serde(default = "default_block_concurrency")]
    pub block_concurrency: usize,
    /// Receipts of one block fetched concurrently.
    #[serde(default = "default_receipt_concurrency")]
    pub receipt_concurrency: usize,
    /// Contract allow-list consumed by adapters (empty = native transfers only).
    #[serde(default)]
    pub contracts: Vec<String>,
    /// Fee composition used by EVM adapters.
    #[serde(default)]
    pub fee_model: FeeModel,
}

fn default_batch_limit() -> u64 { 100 }
fn default_confirmation_depth() -> u64 { 3 }
fn default_max_enqueue_per_tick() -> u64 { 10_000 }
fn default_head_timeout_ms() -> u64 { 30_000 }
fn default_block_concurrency() -> usize { 8 }
fn default_receipt_concurrency() -> usize { 16 }

impl ChainConfig {
    /// Create a config with defaults for everything but the identity.
    pub fn new(chain: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            chain: chain.into(),
            endpoint: endpoint.into(),
            batch_limit: default_batch_limit(),
            confirmation_depth: default_confirmation_depth(),
            look_back: None,
            max_enqueue_per_tick: default_max_enqueue_per_tick(),
            head_timeout_ms: default_head_timeout_ms(),
            fetch: FetchConfig::default(),
            block_concurrency: default_block_concurrency(),
            receipt_concurrency: default_receipt_concurrency(),
            contracts: vec![],
            fee_model: FeeModel::default(),
        }
    }

    /// Effective restart look-back size.
    pub fn look_back(&self) -> u64 {
        self.look_back.unwrap_or(self.batch_limit)
    }

    pub fn head_timeout(&self) -> Duration {
        Duration::from_millis(self.head_timeout_ms)
    }

    pub(crate) fn validate(&self) -> Result<(), ScanError> {
        let fail = |what: &str| Err(ScanError::Config(format!("chain '{}': {what}", self.chain)));
        if self.chain.trim().is_empty() {
            return Err(ScanError::Config("chain identifier must not be empty".into()));
        }
        if self.batch_limit == 0 {
            return fail("batch_limit must be > 0");
        }
        if self.max_enqueue_per_tick == 0 {
            return fail("max_enqueue_per_tick must be > 0");
        }
        if self.fetch.attempts == 0 {
            return fail("fetch.attempts must be > 0");
        }
        if self.fetch.timeout_ms == 0 || self.head_timeout_ms == 0 {
            return fail("timeouts must be > 0");
        }
        if self.block_concurrency == 0 || self.receipt_concurrency == 0 {
            return fail("concurrency limits must be > 0");
        }
        Ok(())
    }
}

// ─── Engine-level config ─────────────────────────────────────────────────────

/// Tick intervals of the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_height_interval_ms")]
    pub height_interval_ms: u64,
    #[serde(default = "default_scan_interval_ms")]
    pub scan_interval_ms: u64,
}

fn default_height_interval_ms() -> u64 { 5_000 }
fn default_scan_interval_ms() -> u64 { 2_000 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            height_interval_ms: default_height_interval_ms(),
            scan_interval_ms: default_scan_interval_ms(),
        }
    }
}

impl SchedulerConfig {
    pub fn height_interval(&self) -> Duration {
        Duration::from_millis(self.height_interval_ms)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }
}

/// Durable store location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite file path or `sqlite:` URL.
    #[serde(default = "default_storage_path")]
    pub path: String,
}

fn default_storage_path() -> String {
    "./chainscan.db".into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { path: default_storage_path() }
    }
}

/// Log level per component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Global default level: "trace" | "debug" | "info" | "warn" | "error"
    #[serde(default = "default_level")]
    pub level: String,
    /// Override per component: component_name → level
    #[serde(default)]
    pub components: HashMap<String, String>,
    /// Emit JSON structured logs (true) or human-readable text (false)
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            components: HashMap::new(),
            json: false,
        }
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub chains: Vec<ChainConfig>,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub log: LogConfig,
    /// Static watch list (case-insensitive).
    #[serde(default)]
    pub watch_addresses: Vec<String>,
}

impl EngineConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self, ScanError> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| ScanError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ScanError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| ScanError::Config(format!("{}: {e}", path.display())))?;
        Self::from_yaml(&yaml)
    }

    pub fn validate(&self) -> Result<(), ScanError> {
        if self.scheduler.height_interval_ms == 0 || self.scheduler.scan_interval_ms == 0 {
            return Err(ScanError::Config("scheduler intervals must be > 0".into()));
        }
        let mut seen = HashSet::new();
        for chain in &self.chains {
            chain.validate()?;
            if !seen.insert(chain.chain.as_str()) {
                return Err(ScanError::Config(format!("duplicate chain '{}'", chain.chain)));
            }
        }
        Ok(())
    }

    /// Look up a chain's config by identifier.
    pub fn chain(&self, chain: &str) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.chain == chain)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
