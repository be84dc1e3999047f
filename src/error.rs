use std::fmt::Display;

use alloy::{
    contract,
    primitives::Bytes,
    providers::PendingTransactionError,
    sol_types::{self, GenericContractError, SolInterface},
    transports,
};

/// Chain access failure with revert reasons decoded as plain
/// `Error(string)`/`Panic(uint256)` payloads.
pub type ChainError = ProviderError<GenericContractError>;

/// Reasons a trade or cancel is not admissible, or could not be checked.
///
/// Every variant except [`MarketError::Provider`] is an economic or
/// authorization failure and will not go away by retrying with the same
/// state. Partial fills are not errors: they are reported as the filled
/// quantity of a successful call.
///
/// A failure after a transaction has been broadcast never classifies as
/// retryable, the transaction may have settled.
#[derive(Debug, thiserror::Error)]
pub enum MarketError {
    #[error("user is not enabled for the market contract")]
    UserNotEnabledForContract,

    #[error("insufficient fee token balance for transfer")]
    InsufficientBalanceForTransfer,

    #[error("insufficient collateral balance")]
    InsufficientCollateralBalance,

    #[error("invalid order signature")]
    InvalidSignature,

    #[error("invalid taker")]
    InvalidTaker,

    #[error("order expired")]
    OrderExpired,

    #[error("order already filled or cancelled")]
    OrderFilledOrCancelled,

    #[error("buy/sell direction mismatch")]
    BuySellMismatch,

    #[error("provider error: {0}")]
    Provider(#[from] ChainError),
}

impl MarketError {
    /// Indicates the failure was a transient chain access failure and the
    /// call is safe to repeat.
    ///
    /// Reverts, decoding failures and rejected requests fail the same way
    /// again and are not retryable. Retries must always fetch fresh state,
    /// results of the failed call must not be reused.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider(err) => err.is_transient(),
            _ => false,
        }
    }

    /// Maps an error code emitted by the market contract `Error` event.
    pub(crate) fn from_code(code: u8) -> Option<Self> {
        match code {
            crate::abi::error_code::ORDER_EXPIRED => Some(Self::OrderExpired),
            crate::abi::error_code::ORDER_DEAD => Some(Self::OrderFilledOrCancelled),
            _ => None,
        }
    }
}

impl From<contract::Error> for MarketError {
    fn from(value: contract::Error) -> Self {
        Self::Provider(value.into())
    }
}

impl<E: Display> From<transports::RpcError<E>> for MarketError {
    fn from(value: transports::RpcError<E>) -> Self {
        Self::Provider(value.into())
    }
}

impl From<PendingTransactionError> for MarketError {
    fn from(value: PendingTransactionError) -> Self {
        Self::Provider(value.into())
    }
}

/// Call/transaction revert reason decoded by
/// the provided known ABI or in a generic raw form
/// if can not be decoded.
#[derive(Debug)]
pub enum RevertReason<R> {
    Known(R),
    Generic(String),
    Unknown,
}

/// Error returned by the RPC provider as a result of call or
/// transaction execution.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError<R> {
    #[error("fatal error: {0}")]
    Fatal(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unexpected empty RPC response")]
    NullResp,

    #[error("transaction ran out of gas")]
    OutOfGas,

    #[error("transaction reverted: {0:?}")]
    Reverted(Box<RevertReason<R>>),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("transaction timed out")]
    Timeout,

    #[error("event stream closed before the transaction settled")]
    StreamClosed,

    #[error("transaction {0} settled without a market event")]
    MissingSettlement(alloy::primitives::TxHash),

    #[error("transaction {0} was broadcast but its outcome is unknown")]
    OutcomeUnknown(alloy::primitives::TxHash),
}

impl<R> ProviderError<R> {
    /// Node or connection hiccup, the same request may succeed later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::NullResp | Self::Timeout | Self::StreamClosed
        )
    }
}

impl<R: SolInterface> From<contract::Error> for ProviderError<R> {
    fn from(value: contract::Error) -> Self {
        match value {
            contract::Error::UnknownFunction(_)
            | contract::Error::UnknownSelector(_)
            | contract::Error::NotADeploymentTransaction
            | contract::Error::ContractNotDeployed
            | contract::Error::ZeroData(_, _)
            | contract::Error::AbiError(_) => Self::Fatal(value.to_string()),
            contract::Error::TransportError(rpc_err) => Self::from(rpc_err),
            contract::Error::PendingTransactionError(err) => err.into(),
        }
    }
}

impl<R: SolInterface> From<PendingTransactionError> for ProviderError<R> {
    fn from(value: PendingTransactionError) -> Self {
        match value {
            PendingTransactionError::FailedToRegister => Self::Fatal(value.to_string()),
            PendingTransactionError::TransportError(rpc_err) => Self::from(rpc_err),
            PendingTransactionError::Recv(_) => Self::Transport(value.to_string()),
            PendingTransactionError::TxWatcher(err) => match err {
                alloy::providers::WatchTxError::Timeout => Self::Timeout,
            },
        }
    }
}

impl<E: Display, R: SolInterface> From<transports::RpcError<E>> for ProviderError<R> {
    fn from(value: transports::RpcError<E>) -> Self {
        match value {
            transports::RpcError::ErrorResp(ref resp) => {
                // Nodes report gas exhaustion and reverts during estimation
                // as generic internal errors, so the message has to be inspected
                let msg = resp.message.to_ascii_lowercase();
                if (resp.code == -32603) && (msg.contains("gas") || msg.contains("oog")) {
                    Self::OutOfGas
                } else if ((resp.code == -32600 || resp.code == -32601 || resp.code == -32602)
                    && (msg.contains("invalid") || msg.contains("not found")))
                    || (resp.code == -32603
                        && (msg.contains("block by number") || msg.contains("getting block")))
                {
                    Self::InvalidRequest(msg)
                } else if resp.code == 3 && msg.contains("reverted") {
                    Self::Reverted(Box::new(RevertReason::from(value)))
                } else {
                    Self::Transport(value.to_string())
                }
            }
            transports::RpcError::NullResp => Self::NullResp,
            _ => Self::Transport(value.to_string()),
        }
    }
}

impl<R: SolInterface> From<sol_types::Error> for ProviderError<R> {
    fn from(value: sol_types::Error) -> Self {
        Self::Fatal(value.to_string())
    }
}

impl<E: Display, R: SolInterface> From<transports::RpcError<E>> for RevertReason<R> {
    fn from(value: transports::RpcError<E>) -> Self {
        match value.as_error_resp() {
            Some(payload) => match payload.as_decoded_interface_error::<R>() {
                Some(known) => Self::Known(known),
                None => Self::Generic(value.to_string()),
            },
            None => Self::Generic(value.to_string()),
        }
    }
}

impl<R: SolInterface> From<Bytes> for RevertReason<R> {
    fn from(value: Bytes) -> Self {
        match R::abi_decode(&value) {
            Ok(known) => Self::Known(known),
            Err(_) => Self::Generic(value.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy::{
        primitives::{Bytes, TxHash},
        sol_types::{Revert, SolError},
        transports::{RpcError, TransportErrorKind},
    };

    use super::*;

    #[test]
    fn test_only_transient_provider_errors_are_retryable() {
        assert!(MarketError::Provider(ChainError::Timeout).is_retryable());
        assert!(MarketError::Provider(ChainError::NullResp).is_retryable());
        assert!(MarketError::Provider(ChainError::Transport("reset".to_string())).is_retryable());
        assert!(MarketError::Provider(ChainError::StreamClosed).is_retryable());

        let reverted = ChainError::Reverted(Box::new(RevertReason::Unknown));
        assert!(!MarketError::Provider(reverted).is_retryable());
        assert!(!MarketError::Provider(ChainError::OutOfGas).is_retryable());
        assert!(!MarketError::Provider(ChainError::Fatal("abi".to_string())).is_retryable());
        assert!(!MarketError::Provider(ChainError::InvalidRequest("bad".to_string())).is_retryable());
        assert!(!MarketError::Provider(ChainError::MissingSettlement(TxHash::ZERO)).is_retryable());
        assert!(!MarketError::Provider(ChainError::OutcomeUnknown(TxHash::ZERO)).is_retryable());

        assert!(!MarketError::InsufficientBalanceForTransfer.is_retryable());
        assert!(!MarketError::OrderFilledOrCancelled.is_retryable());
        assert!(!MarketError::BuySellMismatch.is_retryable());
    }

    #[test]
    fn test_contract_error_codes() {
        assert!(matches!(
            MarketError::from_code(0),
            Some(MarketError::OrderExpired)
        ));
        assert!(matches!(
            MarketError::from_code(1),
            Some(MarketError::OrderFilledOrCancelled)
        ));
        assert!(MarketError::from_code(7).is_none());
    }

    #[test]
    fn test_null_response_classified() {
        let err: ChainError = RpcError::<TransportErrorKind>::NullResp.into();
        assert!(matches!(err, ProviderError::NullResp));
    }

    #[test]
    fn test_revert_reason_decoded_from_bytes() {
        let data = Bytes::from(
            Revert {
                reason: "only maker can cancel".to_string(),
            }
            .abi_encode(),
        );
        match RevertReason::<GenericContractError>::from(data) {
            RevertReason::Known(GenericContractError::Revert(r)) => {
                assert_eq!(r.reason, "only maker can cancel")
            }
            other => panic!("unexpected reason: {other:?}"),
        }
    }
}
