//! Numeric helpers.
//!
//! On-chain quantities, prices and balances are kept as exact 256-bit
//! integers; intermediate products are widened to 512 bits so that
//! `a * b / c` is always floored exactly. [`Converter`] translates the
//! fixed-point values into decimals for presentation and back.

use alloy::primitives::{I256, U256, U512};
use fastnum::{
    bint,
    decimal::{Context, Decimal, RoundingMode, UnsignedDecimal},
};

use crate::types::OrderSide;

/// Fixed-point to decimal converter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Converter {
    decimals: i32,
}

impl Converter {
    pub fn new(decimals: u8) -> Self {
        Self {
            decimals: decimals as i32,
        }
    }

    pub fn decimals(&self) -> u8 {
        self.decimals as u8
    }

    pub fn from_unsigned<const N: usize>(&self, value: U256) -> UnsignedDecimal<N> {
        let unscaled = bint::UInt::<N>::from_le_slice(value.as_le_slice())
            .expect("Converter: U256 -> UInt::<N>");
        UnsignedDecimal::<N>::from_parts(
            unscaled,
            -self.decimals,
            Context::default().with_rounding_mode(RoundingMode::Floor),
        )
    }

    pub fn from_signed<const N: usize>(&self, value: I256) -> Decimal<N> {
        let unscaled = bint::UInt::<N>::from_le_slice(value.unsigned_abs().as_le_slice())
            .expect("Converter: abs(I256) -> UInt::<N>");
        Decimal::<N>::from_parts(
            unscaled,
            -self.decimals,
            match value.sign() {
                alloy::primitives::Sign::Negative => fastnum::decimal::Sign::Minus,
                alloy::primitives::Sign::Positive => fastnum::decimal::Sign::Plus,
            },
            Context::default().with_rounding_mode(RoundingMode::Floor),
        )
    }

    pub fn to_unsigned<const N: usize>(&self, value: UnsignedDecimal<N>) -> U256 {
        let rescaled = value.rescale(self.decimals as i16);
        U256::from_le_slice(rescaled.digits().to_radix_le(256).as_slice())
    }

    pub fn to_signed<const N: usize>(&self, value: Decimal<N>) -> I256 {
        let rescaled = value.rescale(self.decimals as i16);
        let mut res = I256::try_from_le_slice(rescaled.digits().to_radix_le(256).as_slice())
            .unwrap_or_default();
        if value.is_negative() {
            res = res.saturating_neg();
        }
        res
    }
}

/// Computes `⌊a * b / c⌋` without intermediate overflow.
///
/// Returns `None` if `c` is zero or the quotient does not fit 256 bits.
pub fn mul_div_floor(a: U256, b: U256, c: U256) -> Option<U256> {
    if c.is_zero() {
        return None;
    }
    let limbs = (U512::from(a) * U512::from(b) / U512::from(c)).into_limbs();
    if limbs[4..].iter().any(|limb| *limb != 0) {
        return None;
    }
    Some(U256::from_limbs_slice(&limbs[..4]))
}

/// Collateral locked per unit of quantity by the given side of a trade
/// at `price`, i.e. the maximal loss of the side within the price band.
///
/// Price outside the band does not expose the side to any loss.
pub fn needed_collateral_per_unit(
    side: OrderSide,
    price: U256,
    price_floor: U256,
    price_cap: U256,
    qty_multiplier: U256,
) -> U256 {
    let max_loss = match side {
        OrderSide::Buy => price.saturating_sub(price_floor),
        OrderSide::Sell => price_cap.saturating_sub(price),
    };
    max_loss.saturating_mul(qty_multiplier)
}

/// Largest whole quantity the `balance` can back at `per_unit` collateral
/// each; `None` stands for unbounded.
///
/// Negative balance can not back anything, even a riskless fill.
pub fn collateral_fillable(balance: I256, per_unit: U256) -> Option<U256> {
    if balance.is_negative() {
        return Some(U256::ZERO);
    }
    if per_unit.is_zero() {
        return None;
    }
    Some(balance.unsigned_abs() / per_unit)
}
