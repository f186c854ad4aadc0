//! Chain registry — one [`ChainHandle`] per configured chain, built once at
//! startup and shared by reference with the engine and scheduler.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::info;

use crate::adapter::{AdapterFactory, ChainAdapter};
use crate::config::ChainConfig;
use crate::error::ScanError;
use crate::guard::{TickGuard, TickKind};
use crate::types::BlockNumber;

struct CachedAdapter {
    endpoint: String,
    adapter: Arc<dyn ChainAdapter>,
}

/// Runtime state of one chain: its config, its lazily built adapter, the
/// last observed head and its tick guards.
pub struct ChainHandle {
    id: String,
    config: RwLock<ChainConfig>,
    factory: Arc<dyn AdapterFactory>,
    adapter: Mutex<Option<CachedAdapter>>,
    head: AtomicU64,
    height_guard: TickGuard,
    scan_guard: TickGuard,
}

impl ChainHandle {
    pub fn new(config: ChainConfig, factory: Arc<dyn AdapterFactory>) -> Self {
        Self {
            id: config.chain.clone(),
            config: RwLock::new(config),
            factory,
            adapter: Mutex::new(None),
            head: AtomicU64::new(0),
            height_guard: TickGuard::new(),
            scan_guard: TickGuard::new(),
        }
    }

    /// Chain identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> ChainConfig {
        self.config.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Replace the configuration. Invalid configs are rejected and the current
    /// one kept. The adapter is rebuilt on next use if the endpoint changed.
    pub fn update_config(&self, config: ChainConfig) -> Result<(), ScanError> {
        if config.chain != self.id {
            return Err(ScanError::Config(format!(
                "cannot rename chain '{}' to '{}'",
                self.id, config.chain
            )));
        }
        config.validate()?;
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
        Ok(())
    }

    /// The chain's adapter, built on first use and whenever the configured
    /// endpoint differs from the one it was built for.
    pub fn adapter(&self) -> Result<Arc<dyn ChainAdapter>, ScanError> {
        let config = self.config();
        let mut cached = self.adapter.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(c) = cached.as_ref().filter(|c| c.endpoint == config.endpoint) {
            return Ok(c.adapter.clone());
        }
        let rebuilt = cached.is_some();
        let adapter = self.factory.build(&config)?;
        info!(chain = %self.id, endpoint = %config.endpoint, rebuilt, "Chain adapter built");
        *cached = Some(CachedAdapter {
            endpoint: config.endpoint,
            adapter: adapter.clone(),
        });
        Ok(adapter)
    }

    /// Head height seen by the last successful height tick (0 before any).
    pub fn head_height(&self) -> BlockNumber {
        self.head.load(Ordering::Acquire)
    }

    pub(crate) fn record_head(&self, head: BlockNumber) {
        self.head.store(head, Ordering::Release);
    }

    /// The single-flight guard of one tracked operation.
    pub fn guard(&self, kind: TickKind) -> &TickGuard {
        match kind {
            TickKind::Height => &self.height_guard,
            TickKind::Scan => &self.scan_guard,
        }
    }
}

/// All scanned chains, keyed by identifier.
#[derive(Default)]
pub struct ChainRegistry {
    chains: BTreeMap<String, Arc<ChainHandle>>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry where every chain uses the same adapter factory.
    pub fn from_configs(
        configs: &[ChainConfig],
        factory: Arc<dyn AdapterFactory>,
    ) -> Result<Self, ScanError> {
        let mut registry = Self::new();
        for config in configs {
            registry.register(config.clone(), factory.clone())?;
        }
        Ok(registry)
    }

    /// Add a chain. Identifiers must be unique and the config valid.
    pub fn register(
        &mut self,
        config: ChainConfig,
        factory: Arc<dyn AdapterFactory>,
    ) -> Result<Arc<ChainHandle>, ScanError> {
        config.validate()?;
        if self.chains.contains_key(&config.chain) {
            return Err(ScanError::Config(format!("duplicate chain '{}'", config.chain)));
        }
        let handle = Arc::new(ChainHandle::new(config, factory));
        self.chains.insert(handle.id().to_string(), handle.clone());
        Ok(handle)
    }

    pub fn get(&self, chain: &str) -> Result<Arc<ChainHandle>, ScanError> {
        self.chains
            .get(chain)
            .cloned()
            .ok_or_else(|| ScanError::UnknownChain(chain.to_string()))
    }

    pub fn ids(&self) -> Vec<String> {
        self.chains.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}
