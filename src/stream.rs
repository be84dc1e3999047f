use std::time::Duration;

use alloy::{
    primitives::Address,
    providers::Provider,
    rpc::types::{Filter, Log},
    sol_types::SolEventInterface,
};
use futures::{Stream, stream};

use crate::{
    abi::market::MarketContract::MarketContractEvents,
    error::{ChainError, MarketError},
    types,
};

pub type RawEvent = types::EventContext<MarketContractEvents>;
pub type RawBlockEvents = types::BlockEvents<RawEvent>;

/// Returns stream of raw events emitted by the market contract,
/// batched per block, starting from the specified block.
///
/// Polls logs via the given [`Provider`] to produce strictly continuous
/// event sequence, with [`Provider`]-configured interval.
///
/// It is recommended to setup provider with
/// [`alloy::transports::layers::FallbackLayer`]
/// and/or [`alloy::transports::layers::RetryBackoffLayer`], as
/// the stream yields provider errors as is and continues from the
/// same block on the next poll.
///
/// See [`MarketContractEvents`] for the list of possible events.
pub fn raw<P, S, SFut>(
    market: Address,
    provider: P,
    from: types::StateInstant,
    sleep: S,
) -> impl Stream<Item = Result<RawBlockEvents, MarketError>>
where
    P: Provider,
    S: Fn(Duration) -> SFut + Copy,
    SFut: Future<Output = ()>,
{
    stream::unfold(
        (provider, from.block_number()),
        move |(provider, mut block_num)| async move {
            let filter = Filter::new()
                .address(market)
                .from_block(block_num)
                .to_block(block_num);
            loop {
                // Some nodes produce empty response instead of error in case
                // the block in the filter does not exist yet, so adding
                // additional check against the tip of the chain
                let result =
                    futures::try_join!(provider.get_block_number(), provider.get_logs(&filter))
                        .map_err(MarketError::from)
                        .and_then(|(head_block_num, logs)| {
                            if head_block_num < block_num {
                                return Err(ChainError::InvalidRequest(
                                    "block is not available yet".to_string(),
                                )
                                .into());
                            }
                            Ok(decode_block(block_num, &logs))
                        });
                if result.is_ok() {
                    block_num += 1;
                    return Some((result, (provider, block_num)));
                }
                if matches!(
                    result,
                    Err(MarketError::Provider(ChainError::InvalidRequest(_)))
                ) {
                    // Block is not available yet
                    sleep(provider.client().poll_interval()).await;
                    continue;
                }
                return Some((result, (provider, block_num)));
            }
        },
    )
}

/// Decodes logs of a single block, skipping the ones which are not
/// market contract events.
pub(crate) fn decode_block(block_num: u64, logs: &[Log]) -> RawBlockEvents {
    let block_ts = logs.iter().find_map(|l| l.block_timestamp);
    let events = logs
        .iter()
        .filter_map(|log| match MarketContractEvents::decode_log(&log.inner) {
            Ok(decoded) => Some(RawEvent::new(
                log.transaction_hash.unwrap_or_default(),
                log.transaction_index.unwrap_or_default(),
                log.log_index.unwrap_or_default(),
                decoded.data,
            )),
            Err(err) => {
                tracing::debug!(
                    block_num,
                    log_index = log.log_index,
                    %err,
                    "skipping undecodable log"
                );
                None
            }
        })
        .collect();
    RawBlockEvents::new(
        types::StateInstant::new(block_num, block_ts.unwrap_or_default()),
        events,
    )
}

#[cfg(test)]
mod tests {
    use alloy::{
        primitives::{B256, I256, LogData, U256, address, b256},
        sol_types::SolEvent,
    };

    use super::*;
    use crate::abi::market::MarketContract;

    const MARKET: Address = address!("0x1111111111111111111111111111111111111111");
    const TX: B256 = b256!("0x47de82c4aa40baa30cabac4a74568488a8c74ded85a4e905f1ceaad4f29945e3");

    fn log(data: LogData, log_index: u64) -> Log {
        Log {
            inner: alloy::primitives::Log {
                address: MARKET,
                data,
            },
            block_number: Some(7),
            block_timestamp: Some(1759844205),
            transaction_hash: Some(TX),
            transaction_index: Some(2),
            log_index: Some(log_index),
            ..Default::default()
        }
    }

    #[test]
    fn test_decode_block_keeps_emission_order() {
        let filled = MarketContract::OrderFilled {
            maker: address!("0x2222222222222222222222222222222222222222"),
            taker: address!("0x3333333333333333333333333333333333333333"),
            feeRecipient: Address::ZERO,
            filledQty: I256::ONE,
            paidMakerFee: U256::from(1),
            paidTakerFee: U256::from(2),
            price: U256::from(100000),
            orderHash: B256::repeat_byte(0xaa),
        };
        let error = MarketContract::Error {
            errorCode: 1,
            orderHash: B256::repeat_byte(0xbb),
        };
        let logs = [
            log(filled.encode_log_data(), 3),
            log(LogData::new_unchecked(vec![B256::ZERO], Default::default()), 4),
            log(error.encode_log_data(), 5),
        ];

        let block = decode_block(7, &logs);
        assert_eq!(block.instant(), types::StateInstant::new(7, 1759844205));
        assert_eq!(block.events().len(), 2);
        assert!(matches!(
            block.events()[0],
            RawEvent { tx_hash, tx_index: 2, log_index: 3, event: MarketContractEvents::OrderFilled(ref f) }
                if tx_hash == TX && f.paidTakerFee == U256::from(2)
        ));
        assert!(matches!(
            block.events()[1],
            RawEvent { log_index: 5, event: MarketContractEvents::Error(ref e), .. }
                if e.errorCode == 1 && e.orderHash == B256::repeat_byte(0xbb)
        ));
    }

    #[test]
    fn test_decode_empty_block() {
        let block = decode_block(42, &[]);
        assert!(block.is_empty());
        assert_eq!(block.instant().block_number(), 42);
    }
}
