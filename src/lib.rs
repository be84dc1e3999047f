//! Derivatives market SDK.
//!
//! # Overview
//!
//! Client side helpers to build, sign, screen and submit orders against
//! deployed market contracts, and to compute how much of an order can still
//! be filled given live collateral and fee token balances.
//!
//! Use [`types::OrderBuilder`] to create an order and [`types::SignedOrder::sign`]
//! (or [`market::MarketClient::sign_order`]) to sign it by the maker.
//!
//! [`market::MarketClient`] exposes the operations against the chain:
//! screening and submitting fills and cancels, and the remaining fillable
//! quantities of an order. Checks and computations are pure functions in
//! [`validate`] and [`fillable`] working over consistent state snapshots,
//! the client only fetches the snapshots.
//!
//! # Limitations/follow-ups
//!
//! * Settlement events are observed by log polling, see [`stream::raw`].
//!
//! * Fillable quantities are advisory: the market contract re-checks
//!   everything at submission time.
//!
//! # Testing
//!
//! [`testing`] module provides an in-memory ledger following the settlement
//! rules of the market contract, to produce state snapshots without a node.

pub mod abi;
pub mod error;
pub mod fillable;
pub mod market;
pub mod num;
pub mod settlement;
pub mod stream;
pub mod testing;
pub mod types;
pub mod validate;

use alloy::primitives::Address;

#[derive(Clone, Debug, PartialEq, Eq)]
/// Chain and protocol-wide contracts the markets are deployed with.
pub struct Deployment {
    chain_id: u64,
    registry: Address,
    market_token: Address,
}

impl Deployment {
    pub fn new(chain_id: u64, registry: Address, market_token: Address) -> Self {
        Self {
            chain_id,
            registry,
            market_token,
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Address of the registry of whitelisted market contracts.
    pub fn registry(&self) -> Address {
        self.registry
    }

    /// Address of the protocol token, used to pay fees and to enable
    /// users for trading.
    pub fn market_token(&self) -> Address {
        self.market_token
    }
}
