//! Chain-facing operations of the SDK.
//!
//! [`MarketClient`] fetches consistent state snapshots, runs the pure
//! checks and computations of [`crate::validate`] and [`crate::fillable`]
//! over them, and submits trades and cancels.
//!
//! Every snapshot is read at a single block: the latest block is resolved
//! to a number first and all calls of the snapshot are pinned to it.
//! Immutable market parameters are fetched once per market and cached,
//! balances and filled quantities are always read fresh.

use std::sync::Arc;

use alloy::{
    eips::BlockId,
    network::Ethereum,
    primitives::{Address, I256, TxHash, U256},
    providers::{PendingTransactionBuilder, Provider},
    rpc::types::TransactionReceipt,
    signers::SignerSync,
};
use dashmap::DashMap;
use futures::Stream;
use tracing::{debug, info, warn};

use crate::{
    Deployment,
    abi::{
        market::MarketContract::{self, MarketContractInstance},
        pool::MarketCollateralPool::{self, MarketCollateralPoolInstance},
        registry::MarketContractRegistry::{self, MarketContractRegistryInstance},
        token::{
            ERC20,
            MarketToken::{self, MarketTokenInstance},
        },
    },
    error::{ChainError, MarketError, RevertReason},
    fillable::{CollateralTerms, FillableSnapshot, RemainingFillableCalculator, SideBalances},
    num,
    settlement::{EventWatch, Settlement, SettlementMatcher},
    stream::{self, RawBlockEvents},
    types::{Order, OrderHash, OrderSide, SignedOrder, StateInstant, TxParams},
    validate::{OrderValidator, PartyState, TradeSnapshot},
};

/// Immutable parameters of a deployed market.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContractParams {
    name: String,
    collateral_token: Address,
    collateral_pool: Address,
    price_floor: U256,
    price_cap: U256,
    price_decimal_places: u8,
    qty_multiplier: U256,
    expiration: u64,
}

impl ContractParams {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: String,
        collateral_token: Address,
        collateral_pool: Address,
        price_floor: U256,
        price_cap: U256,
        price_decimal_places: u8,
        qty_multiplier: U256,
        expiration: u64,
    ) -> Self {
        Self {
            name,
            collateral_token,
            collateral_pool,
            price_floor,
            price_cap,
            price_decimal_places,
            qty_multiplier,
            expiration,
        }
    }

    async fn fetch<P: Provider>(
        contract: &MarketContractInstance<P>,
    ) -> Result<Self, MarketError> {
        let (
            name_call,
            token_call,
            pool_call,
            floor_call,
            cap_call,
            decimals_call,
            mult_call,
            exp_call,
        ) = (
            contract.CONTRACT_NAME(),
            contract.COLLATERAL_TOKEN_ADDRESS(),
            contract.MARKET_COLLATERAL_POOL_ADDRESS(),
            contract.PRICE_FLOOR(),
            contract.PRICE_CAP(),
            contract.PRICE_DECIMAL_PLACES(),
            contract.QTY_MULTIPLIER(),
            contract.EXPIRATION(),
        );
        let (
            name,
            collateral_token,
            collateral_pool,
            price_floor,
            price_cap,
            decimals,
            qty_multiplier,
            expiration,
        ) = futures::try_join!(
            name_call.call().into_future(),
            token_call.call().into_future(),
            pool_call.call().into_future(),
            floor_call.call().into_future(),
            cap_call.call().into_future(),
            decimals_call.call().into_future(),
            mult_call.call().into_future(),
            exp_call.call().into_future(),
        )?;
        let price_decimal_places = u8::try_from(decimals).map_err(|_| {
            ChainError::Fatal(format!("price decimal places out of range: {decimals}"))
        })?;
        Ok(Self::new(
            name,
            collateral_token,
            collateral_pool,
            price_floor,
            price_cap,
            price_decimal_places,
            qty_multiplier,
            u64::try_from(expiration).unwrap_or(u64::MAX),
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// ERC-20 token the collateral pool holds.
    pub fn collateral_token(&self) -> Address {
        self.collateral_token
    }

    pub fn collateral_pool(&self) -> Address {
        self.collateral_pool
    }

    pub fn price_floor(&self) -> U256 {
        self.price_floor
    }

    pub fn price_cap(&self) -> U256 {
        self.price_cap
    }

    pub fn price_decimal_places(&self) -> u8 {
        self.price_decimal_places
    }

    /// Collateral per unit of quantity per unit of price.
    pub fn qty_multiplier(&self) -> U256 {
        self.qty_multiplier
    }

    /// Market expiration, in unix seconds.
    pub fn expiration(&self) -> u64 {
        self.expiration
    }

    pub fn collateral_terms(&self) -> CollateralTerms {
        CollateralTerms {
            price_floor: self.price_floor,
            price_cap: self.price_cap,
            qty_multiplier: self.qty_multiplier,
        }
    }

    /// Converter between contract price units and decimal prices.
    pub fn price_converter(&self) -> num::Converter {
        num::Converter::new(self.price_decimal_places)
    }
}

/// Contract instances and parameters of a single market.
struct MarketHandle<P> {
    contract: MarketContractInstance<P>,
    pool: MarketCollateralPoolInstance<P>,
    params: ContractParams,
}

/// Client of the markets of a single deployment.
///
/// Safe to share between tasks, market handles are cached in a concurrent
/// map and never held across awaits.
pub struct MarketClient<P> {
    deployment: Deployment,
    provider: P,
    token: MarketTokenInstance<P>,
    registry: MarketContractRegistryInstance<P>,
    markets: DashMap<Address, Arc<MarketHandle<P>>>,
}

impl<P: Provider + Clone> MarketClient<P> {
    pub fn new(deployment: Deployment, provider: P) -> Self {
        Self {
            token: MarketToken::new(deployment.market_token(), provider.clone()),
            registry: MarketContractRegistry::new(deployment.registry(), provider.clone()),
            deployment,
            provider,
            markets: DashMap::new(),
        }
    }

    pub fn deployment(&self) -> &Deployment {
        &self.deployment
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Parameters of the market, fetched on first use.
    pub async fn contract_params(&self, market: Address) -> Result<ContractParams, MarketError> {
        Ok(self.handle(market).await?.params.clone())
    }

    /// Screens a fill of `fill_qty` of the order sent by `tx.from`, without
    /// submitting anything.
    ///
    /// Returns the snapshot the fill was found admissible over.
    pub async fn validate_trade(
        &self,
        signed: &SignedOrder,
        fill_qty: I256,
        tx: &TxParams,
    ) -> Result<TradeSnapshot, MarketError> {
        let order = signed.order();
        let handle = self.handle(order.market()).await?;
        let (block, instant) = self.pin_block().await?;

        let taker = OrderValidator::effective_taker(signed, tx.from);
        let (maker_state, taker_state, filled_or_cancelled) = futures::try_join!(
            self.party_state(&handle, order.maker(), block),
            self.party_state(&handle, taker, block),
            self.filled_at(&handle, signed.hash(), block),
        )?;
        let snapshot = TradeSnapshot {
            instant,
            maker: maker_state,
            taker: taker_state,
            filled_or_cancelled,
        };

        if let Err(err) = OrderValidator::check(signed, fill_qty, tx.from, &snapshot) {
            warn!(
                order_hash = %signed.hash(),
                %fill_qty,
                sender = %tx.from,
                block = instant.block_number(),
                %err,
                "trade rejected"
            );
            return Err(err);
        }
        Ok(snapshot)
    }

    /// Screens, submits and awaits a fill of the signed order.
    ///
    /// Returns the quantity actually filled, signed like the order
    /// quantity, which can be less than requested.
    pub async fn trade_order(
        &self,
        signed: &SignedOrder,
        fill_qty: I256,
        tx: &TxParams,
    ) -> Result<I256, MarketError> {
        let snapshot = self.validate_trade(signed, fill_qty, tx).await?;
        let order = signed.order();
        let handle = self.handle(order.market()).await?;

        let (addresses, values) = order.contract_args();
        let (v, r, s) = signed.vrs();
        let mut call = handle
            .contract
            .tradeOrder(addresses, values, order.qty(), fill_qty, v, r, s)
            .from(tx.from);
        if let Some(gas_limit) = tx.gas_limit {
            call = call.gas(gas_limit);
        }
        let pending = call.send().await?;
        let tx_hash = *pending.tx_hash();

        info!(%tx_hash, order_hash = %signed.hash(), %fill_qty, "trade submitted");

        match self
            .settle(&handle, signed.hash(), snapshot.instant, pending)
            .await?
        {
            Settlement::Filled { filled_qty, .. } => Ok(filled_qty),
            Settlement::Cancelled { .. } => Err(ChainError::MissingSettlement(tx_hash).into()),
        }
    }

    /// Cancels `cancel_qty` (signed like the order quantity) of the order.
    /// Sender has to be the maker.
    ///
    /// Returns the quantity actually cancelled, capped by the remaining
    /// quantity.
    pub async fn cancel_order(
        &self,
        order: &Order,
        cancel_qty: I256,
        tx: &TxParams,
    ) -> Result<I256, MarketError> {
        let handle = self.handle(order.market()).await?;
        let (block, instant) = self.pin_block().await?;
        let filled = self.filled_at(&handle, order.hash(), block).await?;

        if order.is_expired(instant.block_timestamp()) {
            return Err(MarketError::OrderExpired);
        }
        if order.remaining_qty(filled).is_zero() {
            return Err(MarketError::OrderFilledOrCancelled);
        }
        if order.side().is_none() || order.side() != OrderSide::of(cancel_qty) {
            return Err(MarketError::BuySellMismatch);
        }

        let (addresses, values) = order.contract_args();
        let mut call = handle
            .contract
            .cancelOrder(addresses, values, order.qty(), cancel_qty)
            .from(tx.from);
        if let Some(gas_limit) = tx.gas_limit {
            call = call.gas(gas_limit);
        }
        let pending = call.send().await?;
        let tx_hash = *pending.tx_hash();

        info!(%tx_hash, order_hash = %order.hash(), %cancel_qty, "cancel submitted");

        match self.settle(&handle, order.hash(), instant, pending).await? {
            Settlement::Cancelled { cancelled_qty } => Ok(cancelled_qty),
            Settlement::Filled { .. } => Err(ChainError::MissingSettlement(tx_hash).into()),
        }
    }

    /// Largest quantity of the order the maker can still have filled.
    pub async fn remaining_maker_fillable(
        &self,
        signed: &SignedOrder,
        order_hash: OrderHash,
    ) -> Result<U256, MarketError> {
        let snapshot = self.fillable_snapshot(signed.order(), order_hash).await?;
        RemainingFillableCalculator::new(signed.order(), &snapshot)
            .compute_remaining_maker_fillable()
    }

    /// Largest quantity of the order the designated taker can still fill.
    pub async fn remaining_taker_fillable(
        &self,
        signed: &SignedOrder,
        order_hash: OrderHash,
    ) -> Result<U256, MarketError> {
        let snapshot = self.fillable_snapshot(signed.order(), order_hash).await?;
        RemainingFillableCalculator::new(signed.order(), &snapshot)
            .compute_remaining_taker_fillable()
    }

    /// Snapshot both fillable quantities are computed over, for callers
    /// needing both of them consistent with each other.
    pub async fn fillable_snapshot(
        &self,
        order: &Order,
        order_hash: OrderHash,
    ) -> Result<FillableSnapshot, MarketError> {
        let handle = self.handle(order.market()).await?;
        let (block, instant) = self.pin_block().await?;

        let taker = (!order.is_wildcard_taker()).then_some(order.taker());
        let (maker_balances, taker_balances, filled_or_cancelled) = futures::try_join!(
            self.side_balances(&handle, order.maker(), block),
            async {
                match taker {
                    Some(taker) => self.side_balances(&handle, taker, block).await.map(Some),
                    None => Ok(None),
                }
            },
            self.filled_at(&handle, order_hash, block),
        )?;

        Ok(FillableSnapshot::new(
            instant,
            handle.params.collateral_terms(),
            filled_or_cancelled,
            maker_balances,
            taker_balances,
        ))
    }

    /// Quantity of the order filled or cancelled so far, signed like the
    /// order quantity.
    pub async fn filled_or_cancelled_qty(
        &self,
        market: Address,
        order_hash: OrderHash,
    ) -> Result<I256, MarketError> {
        let handle = self.handle(market).await?;
        self.filled_at(&handle, order_hash, BlockId::latest()).await
    }

    /// Signs the order by the maker, attaching its current remaining
    /// quantity.
    pub async fn sign_order<S: SignerSync>(
        &self,
        order: Order,
        signer: &S,
    ) -> Result<SignedOrder, MarketError> {
        let filled = self
            .filled_or_cancelled_qty(order.market(), order.hash())
            .await?;
        let signature = order.sign(signer).map_err(|err| {
            warn!(order_hash = %order.hash(), %err, "order signing failed");
            MarketError::InvalidSignature
        })?;
        Ok(SignedOrder::new(order, signature, order.remaining_qty(filled)))
    }

    /// Unallocated collateral of the user in the market collateral pool.
    pub async fn collateral_balance(
        &self,
        market: Address,
        user: Address,
    ) -> Result<I256, MarketError> {
        let handle = self.handle(market).await?;
        Ok(handle.pool.getUserUnallocatedBalance(user).call().await?)
    }

    /// Net position of the user in the market.
    pub async fn net_position(&self, market: Address, user: Address) -> Result<I256, MarketError> {
        let handle = self.handle(market).await?;
        Ok(handle.pool.getUserNetPosition(user).call().await?)
    }

    pub async fn fee_token_balance(&self, user: Address) -> Result<U256, MarketError> {
        Ok(self.token.balanceOf(user).call().await?)
    }

    pub async fn fee_token_allowance(
        &self,
        owner: Address,
        spender: Address,
    ) -> Result<U256, MarketError> {
        Ok(self.token.allowance(owner, spender).call().await?)
    }

    /// Indicates the user is enabled for trading on the market.
    pub async fn is_user_enabled(&self, market: Address, user: Address) -> Result<bool, MarketError> {
        Ok(self
            .token
            .isUserEnabledForContract(market, user)
            .call()
            .await?)
    }

    pub async fn is_whitelisted(&self, market: Address) -> Result<bool, MarketError> {
        Ok(self.registry.isAddressWhiteListed(market).call().await?)
    }

    /// Markets approved by the registry.
    pub async fn whitelist(&self) -> Result<Vec<Address>, MarketError> {
        Ok(self.registry.getAddressWhiteList().call().await?)
    }

    /// Approves the collateral pool of the market to take `amount` of
    /// collateral tokens of the sender, prerequisite of a deposit.
    pub async fn approve_collateral(
        &self,
        market: Address,
        amount: U256,
        tx: &TxParams,
    ) -> Result<TxHash, MarketError> {
        let handle = self.handle(market).await?;
        let collateral = ERC20::new(handle.params.collateral_token, self.provider.clone());
        let mut call = collateral
            .approve(handle.params.collateral_pool, amount)
            .from(tx.from);
        if let Some(gas_limit) = tx.gas_limit {
            call = call.gas(gas_limit);
        }
        let receipt = confirm(call.send().await?).await?;
        info!(%market, %amount, tx_hash = %receipt.transaction_hash, "collateral approved");
        Ok(receipt.transaction_hash)
    }

    /// Deposits collateral tokens of the sender into the market
    /// collateral pool.
    pub async fn deposit_collateral(
        &self,
        market: Address,
        amount: U256,
        tx: &TxParams,
    ) -> Result<TxHash, MarketError> {
        let handle = self.handle(market).await?;
        let mut call = handle.pool.depositTokensForTrading(amount).from(tx.from);
        if let Some(gas_limit) = tx.gas_limit {
            call = call.gas(gas_limit);
        }
        let receipt = confirm(call.send().await?).await?;
        info!(%market, %amount, tx_hash = %receipt.transaction_hash, "collateral deposited");
        Ok(receipt.transaction_hash)
    }

    /// Withdraws unallocated collateral of the sender from the market
    /// collateral pool.
    pub async fn withdraw_collateral(
        &self,
        market: Address,
        amount: U256,
        tx: &TxParams,
    ) -> Result<TxHash, MarketError> {
        let handle = self.handle(market).await?;
        let mut call = handle.pool.withdrawTokens(amount).from(tx.from);
        if let Some(gas_limit) = tx.gas_limit {
            call = call.gas(gas_limit);
        }
        let receipt = confirm(call.send().await?).await?;
        info!(%market, %amount, tx_hash = %receipt.transaction_hash, "collateral withdrawn");
        Ok(receipt.transaction_hash)
    }

    /// Stream of raw events of the market, see [`stream::raw`].
    pub fn events(
        &self,
        market: Address,
        from: StateInstant,
    ) -> impl Stream<Item = Result<RawBlockEvents, MarketError>> + use<P> {
        stream::raw(market, self.provider.clone(), from, tokio::time::sleep)
    }

    async fn handle(&self, market: Address) -> Result<Arc<MarketHandle<P>>, MarketError> {
        if let Some(handle) = self.markets.get(&market).map(|h| h.value().clone()) {
            return Ok(handle);
        }

        let contract = MarketContract::new(market, self.provider.clone());
        let params = ContractParams::fetch(&contract).await?;
        debug!(%market, name = params.name(), pool = %params.collateral_pool(), "market params fetched");
        let handle = Arc::new(MarketHandle {
            pool: MarketCollateralPool::new(params.collateral_pool, self.provider.clone()),
            contract,
            params,
        });

        // Concurrent first uses may both fetch, first one wins
        Ok(self.markets.entry(market).or_insert(handle).value().clone())
    }

    /// Resolves latest block into a number to pin all calls of a snapshot to.
    async fn pin_block(&self) -> Result<(BlockId, StateInstant), MarketError> {
        let header = self
            .provider
            .get_block(BlockId::latest())
            .await?
            .map(|b| b.into_header())
            .ok_or(ChainError::InvalidRequest("block not found".to_string()))?;
        debug!(block = header.number, "snapshot block pinned");
        Ok((
            BlockId::number(header.number),
            StateInstant::new(header.number, header.timestamp),
        ))
    }

    async fn filled_at(
        &self,
        handle: &MarketHandle<P>,
        order_hash: OrderHash,
        block: BlockId,
    ) -> Result<I256, MarketError> {
        Ok(handle
            .contract
            .getQtyFilledOrCancelledFromOrder(order_hash)
            .block(block)
            .call()
            .await?)
    }

    async fn side_balances(
        &self,
        handle: &MarketHandle<P>,
        user: Address,
        block: BlockId,
    ) -> Result<SideBalances, MarketError> {
        let (collateral_call, fee_call) = (
            handle.pool.getUserUnallocatedBalance(user).block(block),
            self.token.balanceOf(user).block(block),
        );
        let (collateral, fee_token) = futures::try_join!(
            collateral_call.call().into_future(),
            fee_call.call().into_future(),
        )?;
        Ok(SideBalances {
            collateral,
            fee_token,
        })
    }

    async fn party_state(
        &self,
        handle: &MarketHandle<P>,
        user: Address,
        block: BlockId,
    ) -> Result<PartyState, MarketError> {
        let (enabled_call, collateral_call, fee_call) = (
            self.token
                .isUserEnabledForContract(*handle.contract.address(), user)
                .block(block),
            handle.pool.getUserUnallocatedBalance(user).block(block),
            self.token.balanceOf(user).block(block),
        );
        let (enabled, collateral, fee_token_balance) = futures::try_join!(
            enabled_call.call().into_future(),
            collateral_call.call().into_future(),
            fee_call.call().into_future(),
        )?;
        Ok(PartyState {
            enabled,
            fee_token_balance,
            collateral,
        })
    }

    /// Awaits the market event settling the submitted transaction.
    ///
    /// Events are watched starting right after the snapshot block, so the
    /// settlement can not be missed regardless of how quickly the
    /// transaction gets mined.
    async fn settle(
        &self,
        handle: &MarketHandle<P>,
        order_hash: OrderHash,
        snapshot_at: StateInstant,
        pending: PendingTransactionBuilder<Ethereum>,
    ) -> Result<Settlement, MarketError> {
        let tx_hash = *pending.tx_hash();
        let from = StateInstant::new(snapshot_at.block_number() + 1, 0);
        let watch = EventWatch::new(
            SettlementMatcher::new(tx_hash, order_hash),
            Box::pin(self.events(*handle.contract.address(), from)),
        );

        let receipt = confirm(pending).await?;
        let settlement = watch
            .wait_until(receipt.block_number)
            .await
            .map_err(|err| broadcast_failure(tx_hash, err))?;

        info!(
            %tx_hash,
            %order_hash,
            qty = %settlement.qty(),
            block = receipt.block_number,
            "settled"
        );
        Ok(settlement)
    }
}

/// Waits for the transaction to be mined and checks it succeeded.
async fn confirm(
    pending: PendingTransactionBuilder<Ethereum>,
) -> Result<TransactionReceipt, MarketError> {
    let tx_hash = *pending.tx_hash();
    let receipt = pending
        .get_receipt()
        .await
        .map_err(|err| broadcast_failure(tx_hash, err.into()))?;
    debug!(tx_hash = %receipt.transaction_hash, block = receipt.block_number, "transaction mined");
    if !receipt.status() {
        return Err(ChainError::Reverted(Box::new(RevertReason::Unknown)).into());
    }
    Ok(receipt)
}

/// Transient failures past the broadcast of a transaction must not look
/// retryable, resubmitting could execute the transaction twice.
fn broadcast_failure(tx_hash: TxHash, err: MarketError) -> MarketError {
    if err.is_retryable() {
        warn!(%tx_hash, %err, "lost track of broadcast transaction");
        ChainError::OutcomeUnknown(tx_hash).into()
    } else {
        err
    }
}
