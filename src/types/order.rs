use alloy::{
    primitives::{Address, B256, I256, Signature, U256, hex, keccak256},
    signers::SignerSync,
    sol_types::SolValue,
};
use fastnum::UD64;

use super::{OrderSide, WILDCARD_TAKER};
use crate::num;

/// Hash of the order terms, as computed by the market contract.
pub type OrderHash = B256;

/// Economic terms of an order.
///
/// Terms are immutable once signed: the signature covers every field,
/// so changing any of them produces a different order with a different
/// hash. Use the `with_*` methods to derive such an order, eg. for a
/// re-quote.
///
/// Quantity is signed, positive to buy and negative to sell. Price is in
/// contract price units, see [`crate::market::ContractParams::price_converter`]
/// to convert from decimal prices. Fees are in fee token base units and
/// are charged pro rata to the filled quantity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    market: Address,
    maker: Address,
    taker: Address,
    fee_recipient: Address,
    maker_fee: U256,
    taker_fee: U256,
    qty: I256,
    price: U256,
    expiration: u64,
    salt: U256,
}

impl Order {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        market: Address,
        maker: Address,
        taker: Address,
        fee_recipient: Address,
        maker_fee: U256,
        taker_fee: U256,
        qty: I256,
        price: U256,
        expiration: u64,
        salt: U256,
    ) -> Self {
        Self {
            market,
            maker,
            taker,
            fee_recipient,
            maker_fee,
            taker_fee,
            qty,
            price,
            expiration,
            salt,
        }
    }

    /// Uniformly random salt making otherwise identical orders distinct.
    pub fn random_salt() -> U256 {
        U256::from_be_bytes(rand::random::<[u8; 32]>())
    }

    /// Address of the market contract the order trades on.
    pub fn market(&self) -> Address {
        self.market
    }

    pub fn maker(&self) -> Address {
        self.maker
    }

    /// Taker allowed to fill the order, [`WILDCARD_TAKER`] if anyone can.
    pub fn taker(&self) -> Address {
        self.taker
    }

    pub fn is_wildcard_taker(&self) -> bool {
        self.taker == WILDCARD_TAKER
    }

    pub fn fee_recipient(&self) -> Address {
        self.fee_recipient
    }

    /// Fee the maker pays for filling the whole order.
    pub fn maker_fee(&self) -> U256 {
        self.maker_fee
    }

    /// Fee the taker pays for filling the whole order.
    pub fn taker_fee(&self) -> U256 {
        self.taker_fee
    }

    pub fn qty(&self) -> I256 {
        self.qty
    }

    /// Side of the maker, `None` for a degenerate zero quantity order.
    pub fn side(&self) -> Option<OrderSide> {
        OrderSide::of(self.qty)
    }

    pub fn price(&self) -> U256 {
        self.price
    }

    /// Expiration, in unix seconds.
    pub fn expiration(&self) -> u64 {
        self.expiration
    }

    pub fn salt(&self) -> U256 {
        self.salt
    }

    /// Indicates the order can not be traded at `now` (unix seconds) anymore.
    pub fn is_expired(&self, now: u64) -> bool {
        self.expiration < now
    }

    /// Quantity not yet consumed, given the filled or cancelled quantity
    /// reported by the market contract.
    pub fn remaining_qty(&self, filled_or_cancelled: I256) -> U256 {
        self.qty
            .unsigned_abs()
            .saturating_sub(filled_or_cancelled.unsigned_abs())
    }

    /// Hash of the order terms.
    ///
    /// Packed layout matches the one the market contract recomputes from
    /// `tradeOrder`/`cancelOrder` arguments.
    pub fn hash(&self) -> OrderHash {
        let packed = (
            self.market,
            self.maker,
            self.taker,
            self.fee_recipient,
            self.maker_fee,
            self.taker_fee,
            self.price,
            U256::from(self.expiration),
            self.salt,
            self.qty,
        )
            .abi_encode_packed();
        keccak256(packed)
    }

    /// Signs the order hash as a personal message of the maker.
    pub fn sign<S: SignerSync>(&self, signer: &S) -> alloy::signers::Result<Signature> {
        signer.sign_message_sync(self.hash().as_slice())
    }

    /// Address and unsigned value arrays in the layout of the market
    /// contract ABI.
    pub(crate) fn contract_args(&self) -> ([Address; 3], [U256; 5]) {
        (
            [self.maker, self.taker, self.fee_recipient],
            [
                self.maker_fee,
                self.taker_fee,
                self.price,
                U256::from(self.expiration),
                self.salt,
            ],
        )
    }

    pub fn with_price(mut self, price: U256) -> Self {
        self.price = price;
        self
    }

    pub fn with_qty(mut self, qty: I256) -> Self {
        self.qty = qty;
        self
    }

    pub fn with_salt(mut self, salt: U256) -> Self {
        self.salt = salt;
        self
    }

    pub fn with_taker(mut self, taker: Address) -> Self {
        self.taker = taker;
        self
    }
}

/// Order along with the maker signature over its hash, and the remaining
/// quantity observed on-chain when the signed order was assembled.
///
/// The remaining quantity is informational only: validation and fillable
/// computations always read the current value from the chain.
#[derive(Clone, derive_more::Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedOrder {
    #[serde(flatten)]
    order: Order,
    #[debug("{}", hex::encode_prefixed(signature.as_bytes()))]
    signature: Signature,
    remaining_qty: U256,
}

impl SignedOrder {
    pub fn new(order: Order, signature: Signature, remaining_qty: U256) -> Self {
        Self {
            order,
            signature,
            remaining_qty,
        }
    }

    /// Signs a freshly created order, which has nothing filled yet.
    pub fn sign<S: SignerSync>(order: Order, signer: &S) -> alloy::signers::Result<Self> {
        let signature = order.sign(signer)?;
        Ok(Self::new(order, signature, order.qty().unsigned_abs()))
    }

    pub fn order(&self) -> &Order {
        &self.order
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Remaining quantity snapshot taken at construction time.
    pub fn remaining_qty(&self) -> U256 {
        self.remaining_qty
    }

    pub fn hash(&self) -> OrderHash {
        self.order.hash()
    }

    /// Recomputes the order hash and checks it was signed by the maker.
    pub fn is_signature_valid(&self) -> bool {
        self.signature
            .recover_address_from_msg(self.order.hash())
            .is_ok_and(|signer| signer == self.order.maker())
    }

    /// Signature in the `(v, r, s)` form accepted by `ecrecover`.
    pub fn vrs(&self) -> (u8, B256, B256) {
        (
            27 + self.signature.v() as u8,
            B256::from(self.signature.r()),
            B256::from(self.signature.s()),
        )
    }
}

/// Builder of [`Order`]s.
///
/// Defaults to a wildcard taker, zero fees and a random salt.
#[derive(Clone, Debug)]
pub struct OrderBuilder {
    market: Address,
    maker: Address,
    taker: Address,
    fee_recipient: Address,
    maker_fee: U256,
    taker_fee: U256,
    qty: I256,
    price: U256,
    expiration: u64,
    salt: Option<U256>,
}

impl OrderBuilder {
    pub fn new(market: Address, maker: Address) -> Self {
        Self {
            market,
            maker,
            taker: WILDCARD_TAKER,
            fee_recipient: Address::ZERO,
            maker_fee: U256::ZERO,
            taker_fee: U256::ZERO,
            qty: I256::ZERO,
            price: U256::ZERO,
            expiration: 0,
            salt: None,
        }
    }

    pub fn taker(mut self, taker: Address) -> Self {
        self.taker = taker;
        self
    }

    pub fn fee_recipient(mut self, fee_recipient: Address) -> Self {
        self.fee_recipient = fee_recipient;
        self
    }

    pub fn maker_fee(mut self, fee: U256) -> Self {
        self.maker_fee = fee;
        self
    }

    pub fn taker_fee(mut self, fee: U256) -> Self {
        self.taker_fee = fee;
        self
    }

    /// Buys `qty` whole contract units.
    pub fn buy(mut self, qty: u64) -> Self {
        self.qty = I256::try_from(qty).unwrap_or(I256::MAX);
        self
    }

    /// Sells `qty` whole contract units.
    pub fn sell(mut self, qty: u64) -> Self {
        self.qty = -I256::try_from(qty).unwrap_or(I256::MAX);
        self
    }

    /// Sets signed quantity directly.
    pub fn qty(mut self, qty: I256) -> Self {
        self.qty = qty;
        self
    }

    /// Sets price in contract price units.
    pub fn price(mut self, price: U256) -> Self {
        self.price = price;
        self
    }

    /// Sets decimal price, converted with the market price converter.
    pub fn decimal_price(mut self, price: UD64, converter: num::Converter) -> Self {
        self.price = converter.to_unsigned(price);
        self
    }

    /// Expiration in unix seconds.
    pub fn expiration(mut self, expiration: u64) -> Self {
        self.expiration = expiration;
        self
    }

    pub fn salt(mut self, salt: U256) -> Self {
        self.salt = Some(salt);
        self
    }

    pub fn build(self) -> Order {
        Order::new(
            self.market,
            self.maker,
            self.taker,
            self.fee_recipient,
            self.maker_fee,
            self.taker_fee,
            self.qty,
            self.price,
            self.expiration,
            self.salt.unwrap_or_else(Order::random_salt),
        )
    }
}
