//! Builds EVM adapters from chain configuration.

use std::sync::Arc;

use tracing::debug;

use chainscan_core::adapter::{AdapterFactory, ChainAdapter};
use chainscan_core::config::{ChainConfig, FeeModel};
use chainscan_core::error::ScanError;

use crate::adapter::{l1_fee_addend, EvmAdapter};
use crate::rpc::HttpEvmClient;

/// [`AdapterFactory`] producing HTTP-backed [`EvmAdapter`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvmAdapterFactory;

impl EvmAdapterFactory {
    pub fn new() -> Self {
        Self
    }
}

impl AdapterFactory for EvmAdapterFactory {
    fn build(&self, config: &ChainConfig) -> Result<Arc<dyn ChainAdapter>, ScanError> {
        if !config.endpoint.starts_with("http://") && !config.endpoint.starts_with("https://") {
            return Err(ScanError::Config(format!(
                "chain '{}': endpoint must be an http(s) URL, got '{}'",
                config.chain, config.endpoint
            )));
        }
        let client = HttpEvmClient::new(&config.endpoint, config.fetch.timeout())?;
        let adapter = EvmAdapter::new(&config.chain, client, &config.contracts);
        debug!(
            chain = %config.chain,
            contracts = config.contracts.len(),
            fee_model = ?config.fee_model,
            "Building EVM adapter"
        );
        let adapter: Arc<dyn ChainAdapter> = match config.fee_model {
            FeeModel::Standard => Arc::new(adapter),
            FeeModel::L1Fee => Arc::new(adapter.with_fee_adjustment(l1_fee_addend())),
        };
        Ok(adapter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_for_http_endpoints() {
        let mut config = ChainConfig::new("base", "https://mainnet.base.org");
        config.fee_model = FeeModel::L1Fee;
        assert!(EvmAdapterFactory::new().build(&config).is_ok());
    }

    #[test]
    fn rejects_non_http_endpoint() {
        let config = ChainConfig::new("eth", "ws://localhost:8546");
        let err = EvmAdapterFactory::new().build(&config).err().unwrap();
        assert!(matches!(err, ScanError::Config(_)));
    }
}
