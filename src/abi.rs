//! Bindings of the protocol smart contracts.
//!
//! Only the parts of the contract interfaces the SDK interacts with are
//! declared here.

#[allow(clippy::too_many_arguments)]
pub mod market {
    alloy::sol!(
        /// Deployed derivatives market: holds the settlement rules and the
        /// filled/cancelled quantity of every order.
        #[derive(Debug)]
        #[sol(rpc)]
        interface MarketContract {
            event UpdatedLastPrice(uint256 price);
            event ContractSettled(uint256 settlePrice);
            event OrderFilled(
                address indexed maker,
                address indexed taker,
                address indexed feeRecipient,
                int256 filledQty,
                uint256 paidMakerFee,
                uint256 paidTakerFee,
                uint256 price,
                bytes32 orderHash
            );
            event OrderCancelled(
                address indexed maker,
                address indexed feeRecipient,
                int256 cancelledQty,
                bytes32 indexed orderHash
            );
            event Error(uint8 indexed errorCode, bytes32 indexed orderHash);

            function CONTRACT_NAME() external view returns (string);
            function COLLATERAL_TOKEN_ADDRESS() external view returns (address);
            function MARKET_COLLATERAL_POOL_ADDRESS() external view returns (address);
            function PRICE_CAP() external view returns (uint256);
            function PRICE_FLOOR() external view returns (uint256);
            function PRICE_DECIMAL_PLACES() external view returns (uint256);
            function QTY_MULTIPLIER() external view returns (uint256);
            function EXPIRATION() external view returns (uint256);
            function isSettled() external view returns (bool);

            function getQtyFilledOrCancelledFromOrder(bytes32 orderHash)
                external view returns (int256);

            function tradeOrder(
                address[3] orderAddresses,
                uint256[5] unsignedOrderValues,
                int256 orderQty,
                int256 qtyToFill,
                uint8 v,
                bytes32 r,
                bytes32 s
            ) external returns (int256 filledQty);

            function cancelOrder(
                address[3] orderAddresses,
                uint256[5] unsignedOrderValues,
                int256 orderQty,
                int256 qtyToCancel
            ) external returns (int256 qtyCancelled);
        }
    );
}

#[allow(clippy::too_many_arguments)]
pub mod pool {
    alloy::sol!(
        /// Custodial pool backing the positions of a single market.
        #[derive(Debug)]
        #[sol(rpc)]
        interface MarketCollateralPool {
            function getUserUnallocatedBalance(address userAddress)
                external view returns (int256);
            function getUserNetPosition(address userAddress)
                external view returns (int256);
            function depositTokensForTrading(uint256 depositAmount) external;
            function withdrawTokens(uint256 withdrawAmount) external;
        }
    );
}

#[allow(clippy::too_many_arguments)]
pub mod token {
    alloy::sol!(
        /// Protocol token, used to pay trading fees and to enable
        /// accounts for trading on a particular market.
        #[derive(Debug)]
        #[sol(rpc)]
        interface MarketToken {
            function balanceOf(address owner) external view returns (uint256);
            function allowance(address owner, address spender) external view returns (uint256);
            function isUserEnabledForContract(address marketContractAddress, address userAddress)
                external view returns (bool);
        }
    );

    alloy::sol!(
        /// Plain ERC-20 collateral token.
        #[derive(Debug)]
        #[sol(rpc)]
        interface ERC20 {
            function decimals() external view returns (uint8);
            function balanceOf(address owner) external view returns (uint256);
            function approve(address spender, uint256 amount) external returns (bool);
        }
    );
}

#[allow(clippy::too_many_arguments)]
pub mod registry {
    alloy::sol!(
        /// Registry of markets deployed and approved by the protocol.
        #[derive(Debug)]
        #[sol(rpc)]
        interface MarketContractRegistry {
            function isAddressWhiteListed(address contractAddress) external view returns (bool);
            function getAddressWhiteList() external view returns (address[]);
        }
    );
}

/// Error codes carried by [`market::MarketContract::Error`] events.
pub mod error_code {
    pub const ORDER_EXPIRED: u8 = 0;
    pub const ORDER_DEAD: u8 = 1;
}
