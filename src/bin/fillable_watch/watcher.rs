//! Polling loop of the fillable watcher.
//!
//! Every tick a fresh snapshot of the order state is taken and the
//! remaining fillable quantities are recomputed. Changes are logged,
//! provider failures are logged and retried on the next tick.

use std::time::Duration;

use alloy::{
    primitives::{I256, U256},
    providers::{DynProvider, ProviderBuilder},
    rpc::client::RpcClient,
};
use market_sdk::{
    Deployment,
    error::MarketError,
    fillable::{FillableSnapshot, RemainingFillableCalculator},
    market::MarketClient,
    types::{SignedOrder, StateInstant},
};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use url::Url;

use crate::{config::WatchConfig, error::Result};

/// Order state observed at one block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Observation {
    pub instant: StateInstant,
    pub filled_or_cancelled: I256,
    pub remaining: U256,
    /// `None` if the fee token balance can not pay for a single unit.
    pub maker_fillable: Option<U256>,
    pub taker_fillable: Option<U256>,
}

impl Observation {
    pub fn compute(signed: &SignedOrder, snapshot: &FillableSnapshot) -> Result<Self> {
        let calc = RemainingFillableCalculator::new(signed.order(), snapshot);
        Ok(Self {
            instant: snapshot.instant(),
            filled_or_cancelled: snapshot.filled_or_cancelled(),
            remaining: calc.remaining_qty(),
            maker_fillable: fee_bounded(calc.compute_remaining_maker_fillable())?,
            taker_fillable: fee_bounded(calc.compute_remaining_taker_fillable())?,
        })
    }

    fn same_state(&self, other: &Self) -> bool {
        self.filled_or_cancelled == other.filled_or_cancelled
            && self.maker_fillable == other.maker_fillable
            && self.taker_fillable == other.taker_fillable
    }
}

fn fee_bounded(res: std::result::Result<U256, MarketError>) -> Result<Option<U256>> {
    match res {
        Ok(qty) => Ok(Some(qty)),
        Err(MarketError::InsufficientBalanceForTransfer) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Progress {
    Unchanged,
    Changed,
    Consumed,
    Expired,
}

impl Progress {
    pub fn is_final(&self) -> bool {
        matches!(self, Progress::Consumed | Progress::Expired)
    }
}

/// Tracks consecutive observations of a single order.
#[derive(Debug, Default)]
pub struct Tracker {
    last: Option<Observation>,
}

impl Tracker {
    pub fn observe(&mut self, signed: &SignedOrder, obs: Observation) -> Progress {
        let changed = self.last.is_none_or(|last| !last.same_state(&obs));
        self.last = Some(obs);
        if obs.remaining.is_zero() {
            Progress::Consumed
        } else if signed.order().is_expired(obs.instant.block_timestamp()) {
            Progress::Expired
        } else if changed {
            Progress::Changed
        } else {
            Progress::Unchanged
        }
    }
}

pub struct FillableWatcher {
    client: MarketClient<DynProvider>,
    order: SignedOrder,
    config: WatchConfig,
    timeout: Duration,
    tracker: Tracker,
}

impl FillableWatcher {
    pub fn try_new(
        node_url: Url,
        deployment: Deployment,
        order: SignedOrder,
        config: WatchConfig,
        timeout: Duration,
    ) -> Result<Self> {
        info!(
            order_hash = %order.hash(),
            market = %order.order().market(),
            maker = %order.order().maker(),
            qty = %order.order().qty(),
            price = %order.order().price(),
            poll_interval = ?config.poll_interval,
            "Initializing fillable watcher"
        );

        let rpc_client = RpcClient::new_http(node_url);
        let provider = DynProvider::new(ProviderBuilder::new().connect_client(rpc_client));

        Ok(Self {
            client: MarketClient::new(deployment, provider),
            order,
            config,
            timeout,
            tracker: Tracker::default(),
        })
    }

    pub async fn run(&mut self) -> Result<()> {
        let params = self.client.contract_params(self.order.order().market()).await?;
        let converter = params.price_converter();
        info!(
            name = params.name(),
            price = %converter.from_unsigned::<4>(self.order.order().price()),
            "Watching order"
        );

        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            let obs = match tokio::time::timeout(self.timeout, self.poll()).await {
                Ok(Ok(obs)) => obs,
                Ok(Err(e)) => {
                    warn!(%e, "Poll failed, retrying on next tick");
                    continue;
                }
                Err(_) => {
                    warn!(timeout = ?self.timeout, "Poll timed out, retrying on next tick");
                    continue;
                }
            };

            match self.tracker.observe(&self.order, obs) {
                Progress::Unchanged => {
                    debug!(block = obs.instant.block_number(), "No changes");
                }
                Progress::Changed => {
                    info!(
                        block = obs.instant.block_number(),
                        filled_or_cancelled = %obs.filled_or_cancelled,
                        remaining = %obs.remaining,
                        maker_fillable = ?obs.maker_fillable,
                        taker_fillable = ?obs.taker_fillable,
                        "Fillable quantities changed"
                    );
                }
                progress @ (Progress::Consumed | Progress::Expired) => {
                    info!(
                        block = obs.instant.block_number(),
                        filled_or_cancelled = %obs.filled_or_cancelled,
                        ?progress,
                        "Order is no longer fillable, exiting"
                    );
                    return Ok(());
                }
            }
        }
    }

    async fn poll(&self) -> Result<Observation> {
        let snapshot = self
            .client
            .fillable_snapshot(self.order.order(), self.order.hash())
            .await?;
        Observation::compute(&self.order, &snapshot)
    }
}
