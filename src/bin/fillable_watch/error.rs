//! Error types for the fillable watcher.

use market_sdk::error::MarketError;

use crate::config::ConfigError;

/// Main error type for the fillable watcher.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Environment configuration error: {0}")]
    EnvConfig(#[from] envy::Error),

    #[error("Market SDK error: {0}")]
    Market(#[from] MarketError),

    #[error("Invalid RPC URL: {0}")]
    InvalidRpcUrl(#[from] url::ParseError),

    #[error("Failed to read order file: {0}")]
    OrderFile(#[from] std::io::Error),

    #[error("Failed to parse order: {0}")]
    OrderJson(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
