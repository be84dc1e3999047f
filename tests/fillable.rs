use alloy::primitives::{I256, U256};
use market_sdk::{error::MarketError, testing::Ledger};

fn i(v: i64) -> I256 {
    I256::try_from(v).unwrap()
}

/// Fills an order piece by piece until it is fully consumed.
#[test]
fn test_fill_sequence_until_consumed() {
    let mut ledger = Ledger::default();
    let maker = ledger.account(100_000_000, 0);
    let taker = ledger.account(100_000_000, 0);
    let signed = maker.sign(
        ledger
            .order(&maker)
            .taker(taker.address())
            .buy(3)
            .price(U256::from(100000))
            .build(),
    );

    let (maker_fillable, taker_fillable) = ledger.fillable(signed.order());
    assert_eq!(maker_fillable.unwrap(), U256::from(3));
    assert_eq!(taker_fillable.unwrap(), U256::from(3));

    assert_eq!(ledger.trade(&signed, i(1), taker.address()).unwrap(), i(1));
    assert_eq!(ledger.filled_or_cancelled(signed.hash()), i(1));
    let (maker_fillable, taker_fillable) = ledger.fillable(signed.order());
    assert!(maker_fillable.unwrap() <= U256::from(2));
    assert!(taker_fillable.unwrap() <= U256::from(2));

    // fill larger than the remaining quantity is capped
    assert_eq!(ledger.trade(&signed, i(5), taker.address()).unwrap(), i(2));
    assert!(matches!(
        ledger.trade(&signed, i(1), taker.address()),
        Err(MarketError::OrderFilledOrCancelled)
    ));

    let (maker_fillable, taker_fillable) = ledger.fillable(signed.order());
    assert_eq!(maker_fillable.unwrap(), U256::ZERO);
    assert_eq!(taker_fillable.unwrap(), U256::ZERO);
    assert_eq!(ledger.filled_or_cancelled(signed.hash()), signed.order().qty());
}

/// Fillable quantities never grow as the order gets filled and
/// collateral gets locked, and always stay within the remaining quantity.
#[test]
fn test_fillable_decreases_monotonically() {
    let mut ledger = Ledger::default();
    let maker = ledger.account(4_000_000, 1_000);
    let taker = ledger.account(100_000_000, 1_000);
    let signed = maker.sign(
        ledger
            .order(&maker)
            .taker(taker.address())
            .sell(20)
            .price(U256::from(120000))
            .maker_fee(U256::from(200))
            .taker_fee(U256::from(100))
            .build(),
    );

    let mut last = (U256::MAX, U256::MAX);
    loop {
        let remaining = signed
            .order()
            .remaining_qty(ledger.filled_or_cancelled(signed.hash()));
        let (maker_fillable, taker_fillable) = ledger.fillable(signed.order());
        let (maker_fillable, taker_fillable) = (maker_fillable.unwrap(), taker_fillable.unwrap());

        assert!(maker_fillable <= remaining);
        assert!(taker_fillable <= remaining);
        assert!(maker_fillable <= last.0);
        assert!(taker_fillable <= last.1);
        last = (maker_fillable, taker_fillable);

        if maker_fillable.is_zero() || taker_fillable.is_zero() {
            break;
        }
        ledger.trade(&signed, i(-1), taker.address()).unwrap();
    }
    // maker short collateral: (150000 - 120000) * 10 = 300000 per unit
    assert_eq!(ledger.filled_or_cancelled(signed.hash()), i(-13));
}

/// Deposit is the only way for fillable quantity to grow.
#[test]
fn test_fillable_grows_after_deposit() {
    let mut ledger = Ledger::default();
    let maker = ledger.account(1_000_000, 0);
    let order = ledger.order(&maker).buy(10).price(U256::from(100000)).build();

    let (before, _) = ledger.fillable(&order);
    assert_eq!(before.unwrap(), U256::from(2));

    ledger.set_collateral(maker.address(), i(3_000_000));
    let (after, _) = ledger.fillable(&order);
    assert_eq!(after.unwrap(), U256::from(6));
}

#[test]
fn test_fillable_is_idempotent() {
    let mut ledger = Ledger::default();
    let maker = ledger.account(2_750_000, 33);
    let taker = ledger.account(1_250_000, 7);
    let order = ledger
        .order(&maker)
        .taker(taker.address())
        .buy(9)
        .price(U256::from(70000))
        .maker_fee(U256::from(90))
        .taker_fee(U256::from(18))
        .build();

    let first = ledger.fillable(&order);
    let second = ledger.fillable(&order);
    assert_eq!(first.0.unwrap(), second.0.unwrap());
    assert_eq!(first.1.unwrap(), second.1.unwrap());
}

#[test]
fn test_astronomical_maker_fee() {
    let mut ledger = Ledger::default();
    let maker = ledger.account(100_000_000, 1_000_000);
    let order = ledger
        .order(&maker)
        .buy(3)
        .price(U256::from(100000))
        .maker_fee(U256::from(10).pow(U256::from(32)))
        .build();

    let (maker_fillable, taker_fillable) = ledger.fillable(&order);
    assert!(matches!(
        maker_fillable,
        Err(MarketError::InsufficientBalanceForTransfer)
    ));
    assert_eq!(taker_fillable.unwrap(), U256::from(3));
}

#[test]
fn test_cancel_reduces_fillable() {
    let mut ledger = Ledger::default();
    let maker = ledger.account(100_000_000, 0);
    let order = ledger.order(&maker).sell(5).price(U256::from(100000)).build();

    assert_eq!(ledger.cancel(&order, i(-3)).unwrap(), i(-3));
    let (maker_fillable, taker_fillable) = ledger.fillable(&order);
    assert_eq!(maker_fillable.unwrap(), U256::from(2));
    assert_eq!(taker_fillable.unwrap(), U256::from(2));
}
