//! In-memory market and test utilities.
//!
//! [`Ledger`] keeps balances and filled quantities of a single market and
//! settles trades and cancels by the rules of the market contract, so the
//! pure checks and computations can be exercised over realistic sequences
//! of state snapshots without a node.
//!
//! [`TestAccount`] is a trader with a random local key, registered in the
//! ledger by [`Ledger::account`].

use std::collections::{HashMap, HashSet};

use alloy::{
    primitives::{Address, I256, U256, address},
    signers::local::PrivateKeySigner,
};

use crate::{
    error::MarketError,
    fillable::{CollateralTerms, FillableSnapshot, RemainingFillableCalculator, SideBalances},
    num,
    types::{Order, OrderBuilder, OrderHash, SignedOrder, StateInstant},
    validate::{OrderValidator, PartyState, TradeSnapshot},
};

/// Address of the market the ledger stands for.
pub const MARKET: Address = address!("0x5c0ec7a17b1b6f1e5d6f0a7a4e6c0b1d2e3f4a5b");

/// Seconds between consecutive blocks of the ledger.
const BLOCK_TIME_SEC: u64 = 2;

/// Orders built by [`Ledger::order`] expire that far in the future.
const ORDER_TTL_SEC: u64 = 3600;

/// Trader with a local key.
#[derive(Clone, Debug)]
pub struct TestAccount {
    pub signer: PrivateKeySigner,
}

impl TestAccount {
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn sign(&self, order: Order) -> SignedOrder {
        SignedOrder::sign(order, &self.signer).expect("local signer never fails")
    }
}

/// Single market state following the settlement rules of the market
/// contract.
#[derive(Clone, Debug)]
pub struct Ledger {
    terms: CollateralTerms,
    instant: StateInstant,
    enabled: HashSet<Address>,
    collateral: HashMap<Address, I256>,
    fee_tokens: HashMap<Address, U256>,
    filled: HashMap<OrderHash, I256>,
    fees_collected: HashMap<Address, U256>,
}

impl Default for Ledger {
    /// Market with price band `[50000, 150000]` and multiplier 10.
    fn default() -> Self {
        Self::new(
            CollateralTerms {
                price_floor: U256::from(50000),
                price_cap: U256::from(150000),
                qty_multiplier: U256::from(10),
            },
            StateInstant::new(1, 1_700_000_000),
        )
    }
}

impl Ledger {
    pub fn new(terms: CollateralTerms, instant: StateInstant) -> Self {
        Self {
            terms,
            instant,
            enabled: HashSet::new(),
            collateral: HashMap::new(),
            fee_tokens: HashMap::new(),
            filled: HashMap::new(),
            fees_collected: HashMap::new(),
        }
    }

    pub fn terms(&self) -> CollateralTerms {
        self.terms
    }

    pub fn instant(&self) -> StateInstant {
        self.instant
    }

    /// Creates an enabled account with the given collateral and fee token
    /// balances.
    pub fn account(&mut self, collateral: i64, fee_tokens: u64) -> TestAccount {
        let account = TestAccount {
            signer: PrivateKeySigner::random(),
        };
        self.enable(account.address(), true);
        self.set_collateral(account.address(), I256::try_from(collateral).unwrap());
        self.set_fee_tokens(account.address(), U256::from(fee_tokens));
        account
    }

    /// Order builder of the maker on this market, expiring in an hour.
    pub fn order(&self, maker: &TestAccount) -> OrderBuilder {
        OrderBuilder::new(MARKET, maker.address())
            .expiration(self.instant.block_timestamp() + ORDER_TTL_SEC)
    }

    pub fn enable(&mut self, user: Address, enabled: bool) {
        if enabled {
            self.enabled.insert(user);
        } else {
            self.enabled.remove(&user);
        }
    }

    pub fn set_collateral(&mut self, user: Address, amount: I256) {
        self.collateral.insert(user, amount);
    }

    pub fn set_fee_tokens(&mut self, user: Address, amount: U256) {
        self.fee_tokens.insert(user, amount);
    }

    pub fn collateral(&self, user: Address) -> I256 {
        self.collateral.get(&user).copied().unwrap_or_default()
    }

    pub fn fee_tokens(&self, user: Address) -> U256 {
        self.fee_tokens.get(&user).copied().unwrap_or_default()
    }

    /// Fees received by the recipient so far.
    pub fn fees_collected(&self, recipient: Address) -> U256 {
        self.fees_collected
            .get(&recipient)
            .copied()
            .unwrap_or_default()
    }

    pub fn filled_or_cancelled(&self, order_hash: OrderHash) -> I256 {
        self.filled.get(&order_hash).copied().unwrap_or_default()
    }

    /// Mines `blocks` empty blocks.
    pub fn advance(&mut self, blocks: u64) {
        self.instant = StateInstant::new(
            self.instant.block_number() + blocks,
            self.instant.block_timestamp() + blocks * BLOCK_TIME_SEC,
        );
    }

    fn balances(&self, user: Address) -> SideBalances {
        SideBalances {
            collateral: self.collateral(user),
            fee_token: self.fee_tokens(user),
        }
    }

    fn party(&self, user: Address) -> PartyState {
        PartyState {
            enabled: self.enabled.contains(&user),
            fee_token_balance: self.fee_tokens(user),
            collateral: self.collateral(user),
        }
    }

    pub fn trade_snapshot(&self, signed: &SignedOrder, sender: Address) -> TradeSnapshot {
        TradeSnapshot {
            instant: self.instant,
            maker: self.party(signed.order().maker()),
            taker: self.party(OrderValidator::effective_taker(signed, sender)),
            filled_or_cancelled: self.filled_or_cancelled(signed.hash()),
        }
    }

    pub fn fillable_snapshot(&self, order: &Order) -> FillableSnapshot {
        let taker = (!order.is_wildcard_taker()).then(|| self.balances(order.taker()));
        FillableSnapshot::new(
            self.instant,
            self.terms,
            self.filled_or_cancelled(order.hash()),
            self.balances(order.maker()),
            taker,
        )
    }

    /// Maker and taker fillable quantities at the current state.
    pub fn fillable(&self, order: &Order) -> (Result<U256, MarketError>, Result<U256, MarketError>) {
        let snapshot = self.fillable_snapshot(order);
        let calc = RemainingFillableCalculator::new(order, &snapshot);
        (
            calc.compute_remaining_maker_fillable(),
            calc.compute_remaining_taker_fillable(),
        )
    }

    /// Screens and settles a fill in a new block.
    ///
    /// Fill larger than the remaining quantity is capped, the settled
    /// quantity is returned signed like the order quantity.
    pub fn trade(
        &mut self,
        signed: &SignedOrder,
        fill_qty: I256,
        sender: Address,
    ) -> Result<I256, MarketError> {
        self.advance(1);
        let snapshot = self.trade_snapshot(signed, sender);
        OrderValidator::check(signed, fill_qty, sender, &snapshot)?;

        let order = signed.order();
        let Some(side) = order.side() else {
            return Err(MarketError::BuySellMismatch);
        };
        let taker = OrderValidator::effective_taker(signed, sender);
        let qty = order
            .remaining_qty(snapshot.filled_or_cancelled)
            .min(fill_qty.unsigned_abs());
        let order_qty = order.qty().unsigned_abs();

        let maker_locked = self.terms.per_unit(side, order.price()) * qty;
        let taker_locked = self.terms.per_unit(side.opposite(), order.price()) * qty;
        let maker_fee = num::mul_div_floor(order.maker_fee(), qty, order_qty).unwrap_or_default();
        let taker_fee = num::mul_div_floor(order.taker_fee(), qty, order_qty).unwrap_or_default();

        if self.fee_tokens(order.maker()) < maker_fee || self.fee_tokens(taker) < taker_fee {
            return Err(MarketError::InsufficientBalanceForTransfer);
        }
        let maker_collateral = self.collateral(order.maker()) - to_signed(maker_locked);
        let taker_collateral = self.collateral(taker) - to_signed(taker_locked);
        if maker_collateral.is_negative() || taker_collateral.is_negative() {
            return Err(MarketError::InsufficientCollateralBalance);
        }

        self.set_collateral(order.maker(), maker_collateral);
        self.set_collateral(taker, taker_collateral);
        self.set_fee_tokens(order.maker(), self.fee_tokens(order.maker()) - maker_fee);
        self.set_fee_tokens(taker, self.fee_tokens(taker) - taker_fee);
        *self
            .fees_collected
            .entry(order.fee_recipient())
            .or_default() += maker_fee + taker_fee;

        let filled = if order.qty().is_negative() {
            -to_signed(qty)
        } else {
            to_signed(qty)
        };
        *self.filled.entry(signed.hash()).or_default() += filled;
        Ok(filled)
    }

    /// Cancels up to `cancel_qty` of the order in a new block.
    pub fn cancel(&mut self, order: &Order, cancel_qty: I256) -> Result<I256, MarketError> {
        self.advance(1);
        if order.is_expired(self.instant.block_timestamp()) {
            return Err(MarketError::OrderExpired);
        }
        let filled = self.filled_or_cancelled(order.hash());
        let remaining = order.remaining_qty(filled);
        if remaining.is_zero() {
            return Err(MarketError::OrderFilledOrCancelled);
        }
        if order.side().is_none() || order.side() != crate::types::OrderSide::of(cancel_qty) {
            return Err(MarketError::BuySellMismatch);
        }

        let qty = to_signed(remaining.min(cancel_qty.unsigned_abs()));
        let cancelled = if cancel_qty.is_negative() { -qty } else { qty };
        *self.filled.entry(order.hash()).or_default() += cancelled;
        Ok(cancelled)
    }
}

fn to_signed(value: U256) -> I256 {
    I256::try_from(value).expect("ledger amounts fit int256")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn i(v: i64) -> I256 {
        I256::try_from(v).unwrap()
    }

    #[test]
    fn test_trade_locks_collateral_and_charges_fees() {
        let mut ledger = Ledger::default();
        let maker = ledger.account(10_000_000, 100);
        let taker = ledger.account(10_000_000, 100);
        let recipient = Address::repeat_byte(0xfe);
        let signed = maker.sign(
            ledger
                .order(&maker)
                .taker(taker.address())
                .fee_recipient(recipient)
                .buy(4)
                .price(U256::from(100000))
                .maker_fee(U256::from(40))
                .taker_fee(U256::from(20))
                .build(),
        );

        assert_eq!(ledger.trade(&signed, i(1), taker.address()).unwrap(), i(1));

        // 500000 locked per unit by either side at the middle of the band
        assert_eq!(ledger.collateral(maker.address()), i(9_500_000));
        assert_eq!(ledger.collateral(taker.address()), i(9_500_000));
        assert_eq!(ledger.fee_tokens(maker.address()), U256::from(90));
        assert_eq!(ledger.fee_tokens(taker.address()), U256::from(95));
        assert_eq!(ledger.fees_collected(recipient), U256::from(15));
        assert_eq!(ledger.instant().block_number(), 2);
    }

    #[test]
    fn test_sell_fill_is_negative() {
        let mut ledger = Ledger::default();
        let maker = ledger.account(10_000_000, 0);
        let taker = ledger.account(10_000_000, 0);
        let signed = maker.sign(ledger.order(&maker).sell(2).price(U256::from(60000)).build());

        assert_eq!(ledger.trade(&signed, i(-5), taker.address()).unwrap(), i(-2));
        assert_eq!(ledger.filled_or_cancelled(signed.hash()), i(-2));
        // short locks (cap - price) * 10, long (price - floor) * 10
        assert_eq!(ledger.collateral(maker.address()), i(10_000_000 - 2 * 900_000));
        assert_eq!(ledger.collateral(taker.address()), i(10_000_000 - 2 * 100_000));
    }

    #[test]
    fn test_cancel_consumes_remaining() {
        let mut ledger = Ledger::default();
        let maker = ledger.account(0, 0);
        let order = ledger.order(&maker).buy(3).price(U256::from(100000)).build();

        assert_eq!(ledger.cancel(&order, i(2)).unwrap(), i(2));
        assert_eq!(ledger.cancel(&order, i(5)).unwrap(), i(1));
        assert!(matches!(
            ledger.cancel(&order, i(1)),
            Err(MarketError::OrderFilledOrCancelled)
        ));
    }

    #[test]
    fn test_cancel_of_expired_order() {
        let mut ledger = Ledger::default();
        let maker = ledger.account(0, 0);
        let order = ledger
            .order(&maker)
            .buy(3)
            .expiration(ledger.instant().block_timestamp())
            .build();
        assert!(matches!(
            ledger.cancel(&order, i(1)),
            Err(MarketError::OrderExpired)
        ));
    }
}
