//! Remaining fillable quantity of an order.
//!
//! Computation is pure over a [`FillableSnapshot`], which the
//! [`crate::market::MarketClient`] reads from a single block, so repeated
//! computations over the same snapshot always agree and never touch the
//! order or the chain.
//!
//! Each side of the order is bounded by:
//! * the quantity not yet filled or cancelled,
//! * the quantity its unallocated collateral can back at the order price,
//!   see [`crate::num::needed_collateral_per_unit`],
//! * the quantity its fee token balance can pay the fee for, fees being
//!   charged pro rata to the filled quantity.
//!
//! A side which can not pay the fee of even a single unit fails with
//! [`MarketError::InsufficientBalanceForTransfer`] rather than reporting
//! zero, as the market contract rejects any fill without the fee.

use alloy::primitives::{I256, U256};

use crate::{
    error::MarketError,
    num,
    types::{self, Order},
};

/// Market parameters that translate quantity into locked collateral.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CollateralTerms {
    pub price_floor: U256,
    pub price_cap: U256,
    pub qty_multiplier: U256,
}

impl CollateralTerms {
    /// Collateral the given side locks per unit of quantity at `price`.
    pub fn per_unit(&self, side: types::OrderSide, price: U256) -> U256 {
        num::needed_collateral_per_unit(
            side,
            price,
            self.price_floor,
            self.price_cap,
            self.qty_multiplier,
        )
    }
}

/// Balances of one party of the order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SideBalances {
    /// Unallocated collateral in the market collateral pool.
    pub collateral: I256,
    /// Fee token balance.
    pub fee_token: U256,
}

/// On-chain state the fillable quantities depend on, read at one instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FillableSnapshot {
    instant: types::StateInstant,
    terms: CollateralTerms,
    filled_or_cancelled: I256,
    maker: SideBalances,
    taker: Option<SideBalances>,
}

impl FillableSnapshot {
    /// `taker` is expected to be `None` for orders open to any taker.
    pub fn new(
        instant: types::StateInstant,
        terms: CollateralTerms,
        filled_or_cancelled: I256,
        maker: SideBalances,
        taker: Option<SideBalances>,
    ) -> Self {
        Self {
            instant,
            terms,
            filled_or_cancelled,
            maker,
            taker,
        }
    }

    pub fn instant(&self) -> types::StateInstant {
        self.instant
    }

    pub fn terms(&self) -> CollateralTerms {
        self.terms
    }

    pub fn filled_or_cancelled(&self) -> I256 {
        self.filled_or_cancelled
    }

    pub fn maker(&self) -> SideBalances {
        self.maker
    }

    pub fn taker(&self) -> Option<SideBalances> {
        self.taker
    }
}

/// Computes remaining fillable quantities of an order over a snapshot.
#[derive(Clone, Copy, Debug)]
pub struct RemainingFillableCalculator<'a> {
    order: &'a Order,
    snapshot: &'a FillableSnapshot,
}

impl<'a> RemainingFillableCalculator<'a> {
    pub fn new(order: &'a Order, snapshot: &'a FillableSnapshot) -> Self {
        Self { order, snapshot }
    }

    /// Quantity neither filled nor cancelled yet.
    pub fn remaining_qty(&self) -> U256 {
        self.order.remaining_qty(self.snapshot.filled_or_cancelled)
    }

    /// Largest quantity the maker can still have filled.
    pub fn compute_remaining_maker_fillable(&self) -> Result<U256, MarketError> {
        let Some(side) = self.order.side() else {
            return Ok(U256::ZERO);
        };
        self.side_fillable(side, self.order.maker_fee(), self.snapshot.maker)
    }

    /// Largest quantity the designated taker can still fill.
    ///
    /// Orders open to any taker are bounded by the remaining quantity only.
    pub fn compute_remaining_taker_fillable(&self) -> Result<U256, MarketError> {
        let Some(side) = self.order.side() else {
            return Ok(U256::ZERO);
        };
        match self.snapshot.taker {
            Some(balances) if !self.order.is_wildcard_taker() => {
                self.side_fillable(side.opposite(), self.order.taker_fee(), balances)
            }
            _ => Ok(self.remaining_qty()),
        }
    }

    fn side_fillable(
        &self,
        side: types::OrderSide,
        fee: U256,
        balances: SideBalances,
    ) -> Result<U256, MarketError> {
        let remaining = self.remaining_qty();
        let order_qty = self.order.qty().unsigned_abs();

        let fee_fillable = if fee.is_zero() {
            None
        } else {
            // fee * fill / order_qty <= balance
            let max = num::mul_div_floor(balances.fee_token, order_qty, fee);
            if max.is_some_and(|m| m.is_zero()) {
                return Err(MarketError::InsufficientBalanceForTransfer);
            }
            max
        };

        let per_unit = self.snapshot.terms.per_unit(side, self.order.price());
        let collateral_fillable = num::collateral_fillable(balances.collateral, per_unit);

        Ok([Some(remaining), collateral_fillable, fee_fillable]
            .into_iter()
            .flatten()
            .min()
            .unwrap_or(remaining))
    }
}
