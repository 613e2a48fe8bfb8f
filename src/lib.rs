//! P2P order book escrow client
//!
//! Coordinates token approval and escrow deposits on an EVM order-book
//! contract with order placement on the off-chain matching service.
//!
//! # Example
//!
//! ```no_run
//! use p2p_escrow_client::{
//!     config::{CliArgs, ConfigBuilder},
//!     Address, EscrowOrderCoordinator, EvmGateway, HttpOrderGateway, SessionState,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigBuilder::load(&CliArgs::default())?;
//!
//!     let session = Arc::new(SessionState::from_config(&config)?);
//!     let ledger = Arc::new(EvmGateway::new(
//!         config.network.rpc_url.clone(),
//!         &config.chain,
//!         Arc::clone(&session),
//!     )?);
//!     let orders = Arc::new(HttpOrderGateway::new(&config.order_service)?);
//!
//!     session.connect(ledger.as_ref()).await?;
//!
//!     let coordinator =
//!         EscrowOrderCoordinator::new(session, ledger, orders, config.coordinator.clone());
//!
//!     let token = Address::parse("0x41e94eb019c0762f9bfcf9fb1e58725bfb0e7582")?;
//!     let receipt = coordinator.escrow(&token, "10.5").await?;
//!     println!("Escrowed in {}", receipt.deposit.tx_hash);
//!
//!     Ok(())
//! }
//! ```

pub mod amount;
pub mod chains;
pub mod config;
pub mod coordinator;
pub mod orders;
pub mod session;
pub mod types;

pub use amount::{AmountError, AssetAmount};
pub use chains::{ChainGateway, EvmGateway, WalletProvider};
pub use coordinator::EscrowOrderCoordinator;
pub use orders::{HttpOrderGateway, OrderGateway};
pub use session::{NetworkAdvisory, SessionHandle, SessionState, WalletEvent};
pub use types::{
    Address, ChainError, ChainId, CoordinatorError, EscrowIntent, EscrowReceipt, EscrowState,
    RemoteAck, RemoteServiceError, SessionInvalidated, Side, TransactionHash, TxReceipt,
};
