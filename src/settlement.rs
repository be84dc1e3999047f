//! Awaiting the outcome of a submitted trade or cancel.
//!
//! The market contract does not revert on most rejections. It emits an
//! `Error` event with a code instead, so the outcome of a transaction is
//! only known from the events it emitted. [`EventWatch`] consumes the
//! market event stream until the event of the given transaction and
//! order shows up.
//!
//! The watch owns the stream, dropping the watch (on success, on error,
//! or when the awaiting future is cancelled) stops the polling.

use alloy::primitives::{I256, TxHash, U256};
use futures::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::{
    abi::market::MarketContract::MarketContractEvents,
    error::{ChainError, MarketError},
    stream::{RawBlockEvents, RawEvent},
    types::OrderHash,
};

/// Outcome of a settled trade or cancel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Settlement {
    Filled {
        /// Filled quantity, signed like the order quantity.
        filled_qty: I256,
        paid_maker_fee: U256,
        paid_taker_fee: U256,
    },
    Cancelled {
        cancelled_qty: I256,
    },
}

impl Settlement {
    /// Signed quantity the transaction consumed from the order.
    pub fn qty(&self) -> I256 {
        match self {
            Settlement::Filled { filled_qty, .. } => *filled_qty,
            Settlement::Cancelled { cancelled_qty } => *cancelled_qty,
        }
    }
}

/// Recognizes the event settling a particular order in a particular
/// transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SettlementMatcher {
    tx_hash: TxHash,
    order_hash: OrderHash,
}

impl SettlementMatcher {
    pub fn new(tx_hash: TxHash, order_hash: OrderHash) -> Self {
        Self {
            tx_hash,
            order_hash,
        }
    }

    pub fn tx_hash(&self) -> TxHash {
        self.tx_hash
    }

    /// Returns outcome carried by the event, or `None` if the event is
    /// unrelated.
    ///
    /// `Error` events with unknown codes are ignored.
    pub fn match_event(&self, event: &RawEvent) -> Option<Result<Settlement, MarketError>> {
        if event.tx_hash() != self.tx_hash {
            return None;
        }
        match event.event() {
            MarketContractEvents::OrderFilled(e) if e.orderHash == self.order_hash => {
                Some(Ok(Settlement::Filled {
                    filled_qty: e.filledQty,
                    paid_maker_fee: e.paidMakerFee,
                    paid_taker_fee: e.paidTakerFee,
                }))
            }
            MarketContractEvents::OrderCancelled(e) if e.orderHash == self.order_hash => {
                Some(Ok(Settlement::Cancelled {
                    cancelled_qty: e.cancelledQty,
                }))
            }
            MarketContractEvents::Error(e) if e.orderHash == self.order_hash => {
                MarketError::from_code(e.errorCode).map(Err)
            }
            _ => None,
        }
    }
}

/// Scoped subscription to the settlement of one transaction.
///
/// Not restartable: [`EventWatch::wait`] consumes the watch.
pub struct EventWatch<S> {
    matcher: SettlementMatcher,
    events: S,
    settled_by: Option<u64>,
}

impl<S> EventWatch<S>
where
    S: Stream<Item = Result<RawBlockEvents, MarketError>> + Unpin,
{
    pub fn new(matcher: SettlementMatcher, events: S) -> Self {
        debug!(tx_hash = %matcher.tx_hash, order_hash = %matcher.order_hash, "watching settlement");
        Self {
            matcher,
            events,
            settled_by: None,
        }
    }

    /// Waits for the first event settling the watched order in the
    /// watched transaction.
    ///
    /// Transient errors of the underlying stream are skipped, the stream
    /// resumes from the block it failed on. Other errors end the watch. A
    /// transaction which got mined without emitting any matching event is
    /// reported once its block has been seen in full, see
    /// [`EventWatch::wait_until`].
    pub async fn wait(self) -> Result<Settlement, MarketError> {
        self.wait_until(None).await
    }

    /// Same as [`EventWatch::wait`], failing with
    /// [`ChainError::MissingSettlement`] once the block `mined_in` has
    /// passed without a matching event.
    pub async fn wait_until(mut self, mined_in: Option<u64>) -> Result<Settlement, MarketError> {
        while let Some(block) = self.events.next().await {
            let block = match block {
                Ok(block) => block,
                Err(err) if err.is_retryable() => {
                    warn!(tx_hash = %self.matcher.tx_hash, %err, "event stream hiccup, still watching");
                    continue;
                }
                Err(err) => return Err(err),
            };
            for event in block.events() {
                if let Some(outcome) = self.matcher.match_event(event) {
                    self.settled_by = Some(block.instant().block_number());
                    return outcome;
                }
            }
            if mined_in.is_some_and(|b| block.instant().block_number() >= b) {
                return Err(ChainError::MissingSettlement(self.matcher.tx_hash).into());
            }
        }
        Err(ChainError::StreamClosed.into())
    }
}

impl<S> Drop for EventWatch<S> {
    fn drop(&mut self) {
        debug!(
            tx_hash = %self.matcher.tx_hash,
            settled_by = self.settled_by,
            "settlement watch torn down"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        task::Poll,
    };

    use alloy::primitives::{Address, B256};

    use super::*;
    use crate::{
        abi::market::MarketContract,
        types::{BlockEvents, EventContext, StateInstant},
    };

    const TX: TxHash = B256::repeat_byte(0x11);
    const OTHER_TX: TxHash = B256::repeat_byte(0x22);
    const ORDER: OrderHash = B256::repeat_byte(0xaa);

    fn filled(tx: TxHash, order: OrderHash, qty: i64) -> RawEvent {
        EventContext::new(
            tx,
            0,
            0,
            MarketContractEvents::OrderFilled(MarketContract::OrderFilled {
                maker: Address::ZERO,
                taker: Address::ZERO,
                feeRecipient: Address::ZERO,
                filledQty: I256::try_from(qty).unwrap(),
                paidMakerFee: U256::ZERO,
                paidTakerFee: U256::from(5),
                price: U256::from(100000),
                orderHash: order,
            }),
        )
    }

    fn error(tx: TxHash, code: u8) -> RawEvent {
        EventContext::new(
            tx,
            0,
            1,
            MarketContractEvents::Error(MarketContract::Error {
                errorCode: code,
                orderHash: ORDER,
            }),
        )
    }

    fn block(num: u64, events: Vec<RawEvent>) -> Result<RawBlockEvents, MarketError> {
        Ok(BlockEvents::new(StateInstant::new(num, num * 2), events))
    }

    fn watch(
        blocks: Vec<Result<RawBlockEvents, MarketError>>,
    ) -> EventWatch<impl Stream<Item = Result<RawBlockEvents, MarketError>> + Unpin> {
        EventWatch::new(SettlementMatcher::new(TX, ORDER), futures::stream::iter(blocks))
    }

    #[tokio::test]
    async fn test_fill_matched_by_tx_and_order() {
        let outcome = watch(vec![
            block(1, vec![]),
            block(
                2,
                vec![filled(OTHER_TX, ORDER, 3), filled(TX, B256::ZERO, 3), filled(TX, ORDER, 2)],
            ),
        ])
        .wait()
        .await
        .unwrap();
        assert_eq!(
            outcome,
            Settlement::Filled {
                filled_qty: I256::try_from(2).unwrap(),
                paid_maker_fee: U256::ZERO,
                paid_taker_fee: U256::from(5),
            }
        );
        assert_eq!(outcome.qty(), I256::try_from(2).unwrap());
    }

    #[tokio::test]
    async fn test_error_event_mapped() {
        let res = watch(vec![block(1, vec![error(OTHER_TX, 0), error(TX, 1)])])
            .wait()
            .await;
        assert!(matches!(res, Err(MarketError::OrderFilledOrCancelled)));

        let res = watch(vec![block(1, vec![error(TX, 9), error(TX, 0)])])
            .wait()
            .await;
        assert!(matches!(res, Err(MarketError::OrderExpired)));
    }

    #[tokio::test]
    async fn test_transient_stream_error_keeps_watching() {
        let outcome = watch(vec![
            Err(ChainError::Transport("connection reset".to_string()).into()),
            block(2, vec![filled(TX, ORDER, 1)]),
        ])
        .wait_until(Some(2))
        .await
        .unwrap();
        assert_eq!(outcome.qty(), I256::ONE);

        let res = watch(vec![
            block(1, vec![]),
            Err(ChainError::Timeout.into()),
            Err(ChainError::NullResp.into()),
            block(2, vec![error(TX, 1)]),
        ])
        .wait()
        .await;
        assert!(matches!(res, Err(MarketError::OrderFilledOrCancelled)));
    }

    #[tokio::test]
    async fn test_stream_errors_and_end_surface() {
        let res = watch(vec![
            Err(ChainError::Fatal("undecodable response".to_string()).into()),
            block(1, vec![filled(TX, ORDER, 1)]),
        ])
        .wait()
        .await;
        assert!(matches!(res, Err(MarketError::Provider(ChainError::Fatal(_)))));

        let res = watch(vec![Err(ChainError::Timeout.into())]).wait().await;
        assert!(matches!(
            res,
            Err(MarketError::Provider(ChainError::StreamClosed))
        ));

        let res = watch(vec![block(1, vec![])]).wait().await;
        assert!(matches!(
            res,
            Err(MarketError::Provider(ChainError::StreamClosed))
        ));
    }

    #[tokio::test]
    async fn test_missing_settlement_after_mined_block() {
        let res = watch(vec![block(4, vec![]), block(5, vec![]), block(6, vec![])])
            .wait_until(Some(5))
            .await;
        assert!(matches!(
            res,
            Err(MarketError::Provider(ChainError::MissingSettlement(tx))) if tx == TX
        ));
    }

    struct DropFlag<S> {
        inner: S,
        dropped: Arc<AtomicBool>,
    }

    impl<S: Stream + Unpin> Stream for DropFlag<S> {
        type Item = S::Item;

        fn poll_next(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> Poll<Option<Self::Item>> {
            self.inner.poll_next_unpin(cx)
        }
    }

    impl<S> Drop for DropFlag<S> {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_cancelled_wait_drops_stream() {
        let dropped = Arc::new(AtomicBool::new(false));
        let events = DropFlag {
            inner: futures::stream::pending::<Result<RawBlockEvents, MarketError>>(),
            dropped: dropped.clone(),
        };
        let watch = EventWatch::new(SettlementMatcher::new(TX, ORDER), events);

        let mut wait = tokio_test::task::spawn(watch.wait());
        assert!(wait.poll().is_pending());
        assert!(!dropped.load(Ordering::SeqCst));

        drop(wait);
        assert!(dropped.load(Ordering::SeqCst));
    }
}
