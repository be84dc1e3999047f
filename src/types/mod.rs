mod event;
mod order;

use alloy::primitives::{Address, I256};

pub use event::*;
pub use order::{Order, OrderBuilder, OrderHash, SignedOrder};

/// Taker address meaning "any counterparty may fill this order".
pub const WILDCARD_TAKER: Address = Address::ZERO;

/// Instant in chain history the state/event is up to date with.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Eq, Ord, Hash, Default)]
pub struct StateInstant {
    block_number: u64,
    block_timestamp: u64,
}

impl StateInstant {
    pub fn new(block_number: u64, block_timestamp: u64) -> Self {
        Self {
            block_number,
            block_timestamp,
        }
    }

    pub fn block_number(&self) -> u64 {
        self.block_number
    }

    pub fn block_timestamp(&self) -> u64 {
        self.block_timestamp
    }
}

/// Direction of an order or a fill.
///
/// Quantities are signed on-chain: positive quantity buys (goes long),
/// negative quantity sells (goes short).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Side of the signed quantity, `None` for zero.
    pub fn of(qty: I256) -> Option<Self> {
        if qty.is_positive() {
            Some(OrderSide::Buy)
        } else if qty.is_negative() {
            Some(OrderSide::Sell)
        } else {
            None
        }
    }

    /// Side of the counterparty.
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

/// Parameters of the transaction submitting a trade, cancel or
/// collateral operation.
///
/// The provider is expected to hold a wallet able to sign for `from`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxParams {
    pub from: Address,
    pub gas_limit: Option<u64>,
}

impl TxParams {
    pub fn sender(from: Address) -> Self {
        Self {
            from,
            gas_limit: None,
        }
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }
}
