//! Pre-trade screening of a fill.
//!
//! [`OrderValidator::check`] runs the admissibility checks in a fixed order
//! and reports the first one that fails. Order matters: callers (and tests)
//! rely on eg. an expired order of a disabled user being reported as
//! [`MarketError::UserNotEnabledForContract`].
//!
//! All inputs come from a [`TradeSnapshot`] read at one block, see
//! [`crate::market::MarketClient::validate_trade`].

use alloy::primitives::{Address, I256, U256};

use crate::{
    error::MarketError,
    types::{OrderSide, SignedOrder, StateInstant},
};

/// State of one party of the trade relevant to screening.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PartyState {
    /// Enabled for trading on the market by the market token contract.
    pub enabled: bool,
    pub fee_token_balance: U256,
    /// Unallocated balance in the market collateral pool.
    pub collateral: I256,
}

/// On-chain state a fill is screened against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TradeSnapshot {
    pub instant: StateInstant,
    pub maker: PartyState,
    /// State of the effective taker: the designated taker of the order, or
    /// the sender if the order is open to anyone.
    pub taker: PartyState,
    pub filled_or_cancelled: I256,
}

/// Screens fills of signed orders.
#[derive(Clone, Copy, Debug, Default)]
pub struct OrderValidator;

impl OrderValidator {
    /// Effective taker of a fill of `signed` sent by `sender`.
    pub fn effective_taker(signed: &SignedOrder, sender: Address) -> Address {
        let order = signed.order();
        if order.is_wildcard_taker() {
            sender
        } else {
            order.taker()
        }
    }

    /// Checks a fill of `fill_qty` (signed like the order quantity) sent
    /// by `sender` is admissible over `snapshot`.
    pub fn check(
        signed: &SignedOrder,
        fill_qty: I256,
        sender: Address,
        snapshot: &TradeSnapshot,
    ) -> Result<(), MarketError> {
        let order = signed.order();
        let fill_abs = fill_qty.unsigned_abs();

        if !snapshot.maker.enabled || !snapshot.taker.enabled {
            return Err(MarketError::UserNotEnabledForContract);
        }

        if snapshot.maker.fee_token_balance < order.maker_fee()
            || snapshot.taker.fee_token_balance < order.taker_fee()
        {
            return Err(MarketError::InsufficientBalanceForTransfer);
        }

        if !covers(snapshot.maker.collateral, fill_abs) {
            return Err(MarketError::InsufficientCollateralBalance);
        }

        if !signed.is_signature_valid() {
            return Err(MarketError::InvalidSignature);
        }

        if !order.is_wildcard_taker() {
            if !covers(snapshot.taker.collateral, fill_abs) {
                return Err(MarketError::InsufficientCollateralBalance);
            }
            if order.taker() != sender {
                return Err(MarketError::InvalidTaker);
            }
        }

        if order.is_expired(snapshot.instant.block_timestamp()) {
            return Err(MarketError::OrderExpired);
        }

        if order.remaining_qty(snapshot.filled_or_cancelled).is_zero() {
            return Err(MarketError::OrderFilledOrCancelled);
        }

        match (order.side(), OrderSide::of(fill_qty)) {
            (Some(order_side), Some(fill_side)) if order_side == fill_side => Ok(()),
            _ => Err(MarketError::BuySellMismatch),
        }
    }
}

fn covers(collateral: I256, qty: U256) -> bool {
    !collateral.is_negative() && collateral.unsigned_abs() >= qty
}

#[cfg(test)]
mod tests {
    use alloy::{primitives::address, signers::local::PrivateKeySigner};

    use super::*;
    use crate::types::{Order, OrderBuilder};

    const MARKET: Address = address!("0x1111111111111111111111111111111111111111");
    const NOW: u64 = 1_700_000_000;

    fn i(v: i64) -> I256 {
        I256::try_from(v).unwrap()
    }

    fn rich() -> PartyState {
        PartyState {
            enabled: true,
            fee_token_balance: U256::from(1_000_000),
            collateral: i(1_000_000_000),
        }
    }

    fn snapshot() -> TradeSnapshot {
        TradeSnapshot {
            instant: StateInstant::new(100, NOW),
            maker: rich(),
            taker: rich(),
            filled_or_cancelled: I256::ZERO,
        }
    }

    struct Fixture {
        maker: PrivateKeySigner,
        taker: PrivateKeySigner,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                maker: PrivateKeySigner::random(),
                taker: PrivateKeySigner::random(),
            }
        }

        fn order(&self) -> Order {
            OrderBuilder::new(MARKET, self.maker.address())
                .taker(self.taker.address())
                .buy(3)
                .price(U256::from(100000))
                .maker_fee(U256::from(10))
                .taker_fee(U256::from(20))
                .expiration(NOW + 60)
                .build()
        }

        fn signed(&self, order: Order) -> SignedOrder {
            SignedOrder::sign(order, &self.maker).unwrap()
        }
    }

    #[test]
    fn test_admissible_fill() {
        let f = Fixture::new();
        let signed = f.signed(f.order());
        OrderValidator::check(&signed, i(2), f.taker.address(), &snapshot()).unwrap();
    }

    #[test]
    fn test_disabled_user_reported_before_anything_else() {
        let f = Fixture::new();
        // expired, badly signed, wrong direction, but taker not enabled
        let order = f.order();
        let signed = SignedOrder::new(
            order,
            order.sign(&f.taker).unwrap(),
            U256::from(3),
        );
        let mut snap = snapshot();
        snap.instant = StateInstant::new(100, NOW + 3600);
        snap.taker.enabled = false;
        assert!(matches!(
            OrderValidator::check(&signed, i(-1), f.taker.address(), &snap),
            Err(MarketError::UserNotEnabledForContract)
        ));
    }

    #[test]
    fn test_fee_balance_below_fee() {
        let f = Fixture::new();
        let signed = f.signed(f.order());

        let mut snap = snapshot();
        snap.maker.fee_token_balance = U256::from(9);
        assert!(matches!(
            OrderValidator::check(&signed, i(1), f.taker.address(), &snap),
            Err(MarketError::InsufficientBalanceForTransfer)
        ));

        let mut snap = snapshot();
        snap.taker.fee_token_balance = U256::from(20);
        OrderValidator::check(&signed, i(1), f.taker.address(), &snap).unwrap();
        snap.taker.fee_token_balance = U256::from(19);
        assert!(matches!(
            OrderValidator::check(&signed, i(1), f.taker.address(), &snap),
            Err(MarketError::InsufficientBalanceForTransfer)
        ));
    }

    #[test]
    fn test_collateral_checked_for_both_sides() {
        let f = Fixture::new();
        let signed = f.signed(f.order());

        let mut snap = snapshot();
        snap.maker.collateral = i(-1);
        assert!(matches!(
            OrderValidator::check(&signed, i(1), f.taker.address(), &snap),
            Err(MarketError::InsufficientCollateralBalance)
        ));

        let mut snap = snapshot();
        snap.taker.collateral = i(1);
        assert!(matches!(
            OrderValidator::check(&signed, i(2), f.taker.address(), &snap),
            Err(MarketError::InsufficientCollateralBalance)
        ));
    }

    #[test]
    fn test_wildcard_taker_skips_taker_checks() {
        let f = Fixture::new();
        let signed = f.signed(f.order().with_taker(Address::ZERO));
        let mut snap = snapshot();
        snap.taker.collateral = I256::ZERO;

        let anyone = address!("0x4444444444444444444444444444444444444444");
        OrderValidator::check(&signed, i(1), anyone, &snap).unwrap();
        assert_eq!(OrderValidator::effective_taker(&signed, anyone), anyone);
    }

    #[test]
    fn test_invalid_signature() {
        let f = Fixture::new();
        let order = f.order();
        let signed = SignedOrder::new(order, order.sign(&f.taker).unwrap(), U256::from(3));
        assert!(matches!(
            OrderValidator::check(&signed, i(1), f.taker.address(), &snapshot()),
            Err(MarketError::InvalidSignature)
        ));
    }

    #[test]
    fn test_sender_must_be_designated_taker() {
        let f = Fixture::new();
        let signed = f.signed(f.order());
        assert!(matches!(
            OrderValidator::check(&signed, i(1), f.maker.address(), &snapshot()),
            Err(MarketError::InvalidTaker)
        ));
    }

    #[test]
    fn test_expiration_compared_with_block_time() {
        let f = Fixture::new();
        let signed = f.signed(f.order());

        let mut snap = snapshot();
        snap.instant = StateInstant::new(101, NOW + 60);
        OrderValidator::check(&signed, i(1), f.taker.address(), &snap).unwrap();

        snap.instant = StateInstant::new(102, NOW + 61);
        assert!(matches!(
            OrderValidator::check(&signed, i(1), f.taker.address(), &snap),
            Err(MarketError::OrderExpired)
        ));
    }

    #[test]
    fn test_fully_filled_order_rejected() {
        let f = Fixture::new();
        let signed = f.signed(f.order());
        let mut snap = snapshot();
        snap.filled_or_cancelled = i(3);
        assert!(matches!(
            OrderValidator::check(&signed, i(1), f.taker.address(), &snap),
            Err(MarketError::OrderFilledOrCancelled)
        ));
    }

    #[test]
    fn test_direction_mismatch() {
        let f = Fixture::new();
        let signed = f.signed(f.order());
        for fill in [i(-1), I256::ZERO] {
            assert!(matches!(
                OrderValidator::check(&signed, fill, f.taker.address(), &snapshot()),
                Err(MarketError::BuySellMismatch)
            ));
        }

        let sell = f.signed(f.order().with_qty(i(-3)));
        OrderValidator::check(&sell, i(-3), f.taker.address(), &snapshot()).unwrap();
    }
}
