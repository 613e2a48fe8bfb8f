pub mod evm;

use crate::types::{Address, ChainError, ChainId, TxReceipt};
use async_trait::async_trait;
use primitive_types::U256;

pub use evm::EvmGateway;

/// Trait for interacting with the value-transfer ledger
///
/// Mutating calls return only once the transaction is confirmed. No call
/// is retried here.
#[async_trait]
pub trait ChainGateway: Send + Sync {
    /// Grant `spender` an allowance of `amount` on `token`.
    async fn approve(
        &self,
        token: &Address,
        spender: &Address,
        amount: U256,
    ) -> Result<TxReceipt, ChainError>;

    /// Move `amount` of `token` into the order-book contract's escrow.
    async fn deposit(&self, token: &Address, amount: U256) -> Result<TxReceipt, ChainError>;

    async fn balance_of(&self, account: &Address, token: &Address) -> Result<U256, ChainError>;

    async fn decimals_of(&self, token: &Address) -> Result<u8, ChainError>;

    async fn allowance(
        &self,
        token: &Address,
        owner: &Address,
        spender: &Address,
    ) -> Result<U256, ChainError>;

    /// Escrowed balance held by the order book. `None` when the contract
    /// returned no data.
    async fn escrowed_funds(
        &self,
        account: &Address,
        token: &Address,
    ) -> Result<Option<U256>, ChainError>;

    /// Address of the order-book contract (the spender for approvals).
    fn order_book_address(&self) -> &Address;
}

/// Source of wallet identity
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Ask the wallet to expose its accounts (may prompt the user).
    async fn request_accounts(&self) -> Result<Vec<Address>, ChainError>;

    /// Accounts already authorized, without prompting.
    async fn accounts(&self) -> Result<Vec<Address>, ChainError>;

    async fn chain_id(&self) -> Result<ChainId, ChainError>;
}
