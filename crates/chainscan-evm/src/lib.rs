//! chainscan-evm — EVM chain adapter for the chainscan engine.
//!
//! # Usage
//! ```rust,no_run
//! use std::sync::Arc;
//! use chainscan_core::{ChainConfig, ChainRegistry};
//! use chainscan_evm::EvmAdapterFactory;
//!
//! # fn example() -> Result<(), chainscan_core::ScanError> {
//! let registry = ChainRegistry::from_configs(
//!     &[ChainConfig::new("ethereum", "https://eth.llamarpc.com")],
//!     Arc::new(EvmAdapterFactory::new()),
//! )?;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod decode;
pub mod factory;
pub mod rpc;

pub use adapter::{l1_fee_addend, EvmAdapter, FeeAdjustment};
pub use factory::EvmAdapterFactory;
pub use rpc::{EvmRpcClient, HttpEvmClient};
