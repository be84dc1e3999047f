//! Configuration for the fillable watcher.
//!
//! Configuration comes from two sources:
//! - Environment variables (via .env file or shell): connection details
//! - CLI arguments: the order to watch and the polling interval

use std::{path::PathBuf, time::Duration};

use alloy::primitives::Address;
use clap::Parser;
use market_sdk::types::SignedOrder;

use crate::error::Result;

/// Environment configuration (connection details).
#[derive(Debug, serde::Deserialize)]
pub struct EnvConfig {
    /// Chain ID
    pub chain_id: u64,

    /// Market contract registry address
    pub registry_address: String,

    /// Market (fee) token address
    pub market_token_address: String,

    /// RPC URL for the node
    pub node_rpc_url: String,

    /// Optional timeout of a single poll (default: 30s)
    pub timeout_seconds: Option<u64>,
}

impl EnvConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> std::result::Result<Self, envy::Error> {
        envy::from_env()
    }

    pub fn registry_address(&self) -> std::result::Result<Address, alloy::primitives::hex::FromHexError> {
        self.registry_address.parse()
    }

    pub fn market_token_address(
        &self,
    ) -> std::result::Result<Address, alloy::primitives::hex::FromHexError> {
        self.market_token_address.parse()
    }
}

/// CLI arguments of the watcher.
#[derive(Debug, Parser)]
#[command(name = "fillable-watch")]
#[command(about = "Watches remaining fillable quantities of a signed order")]
pub struct CliConfig {
    /// Path to the signed order JSON file
    #[arg(long)]
    pub order: PathBuf,

    /// Polling interval in milliseconds
    #[arg(long, default_value_t = 2000)]
    pub poll_interval_ms: u64,
}

impl CliConfig {
    pub fn to_watch_config(&self) -> std::result::Result<WatchConfig, ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroPollInterval);
        }
        Ok(WatchConfig {
            order_path: self.order.clone(),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        })
    }
}

#[derive(Clone, Debug)]
pub struct WatchConfig {
    pub order_path: PathBuf,
    pub poll_interval: Duration,
}

impl WatchConfig {
    /// Reads and verifies the signed order.
    pub fn load_order(&self) -> Result<SignedOrder> {
        let json = std::fs::read_to_string(&self.order_path)?;
        let order: SignedOrder = serde_json::from_str(&json)?;
        if !order.is_signature_valid() {
            return Err(ConfigError::InvalidOrderSignature.into());
        }
        Ok(order)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("poll interval cannot be zero")]
    ZeroPollInterval,

    #[error("order is not signed by its maker")]
    InvalidOrderSignature,
}
