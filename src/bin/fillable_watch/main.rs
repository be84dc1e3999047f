//! Order fillable quantities watcher.
//!
//! This binary loads a signed order and periodically reports how much of it
//! the maker and the designated taker can still fill, until the order is
//! consumed or expires.

mod config;
mod error;
mod watcher;

use std::{process::exit, time::Duration};

use alloy::primitives::Address;
use clap::Parser;
use market_sdk::{Deployment, types::SignedOrder};
use tracing::error;
use url::Url;

use config::{CliConfig, EnvConfig};
use watcher::FillableWatcher;

#[tokio::main]
async fn main() {
    // Load .env file
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Warning: Failed to load .env file: {}", e);
    }

    let env_config = match EnvConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to parse environment configuration: {}", e);
            exit(1);
        }
    };

    let cli_config = CliConfig::parse();
    let watch_config = match cli_config.to_watch_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            exit(1);
        }
    };

    // Set up logging
    if std::env::var("RUST_LOG").is_err() {
        unsafe {
            std::env::set_var("RUST_LOG", "info");
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let (registry, market_token): (Address, Address) =
        match (env_config.registry_address(), env_config.market_token_address()) {
            (Ok(registry), Ok(token)) => (registry, token),
            (Err(e), _) | (_, Err(e)) => {
                eprintln!("Invalid contract address: {}", e);
                exit(1);
            }
        };

    let node_url = match Url::parse(&env_config.node_rpc_url) {
        Ok(url) => url,
        Err(e) => {
            eprintln!("Invalid RPC URL: {}", e);
            exit(1);
        }
    };

    let order: SignedOrder = match watch_config.load_order() {
        Ok(order) => order,
        Err(e) => {
            eprintln!("Failed to load order: {}", e);
            exit(1);
        }
    };

    let deployment = Deployment::new(env_config.chain_id, registry, market_token);

    // Default timeout is 30 seconds
    let timeout = Duration::from_secs(env_config.timeout_seconds.unwrap_or(30));

    let mut watcher = match FillableWatcher::try_new(node_url, deployment, order, watch_config, timeout) {
        Ok(watcher) => watcher,
        Err(e) => {
            eprintln!("Failed to create fillable watcher: {}", e);
            exit(1);
        }
    };

    if let Err(e) = watcher.run().await {
        error!(%e, "Fillable watcher encountered an error, shutting down");
        exit(1);
    }
}
