//! Wallet session identity.
//!
//! Tracks the active account and network reported by the wallet. Every
//! identity change bumps a generation counter; operations capture the
//! generation when they start and check it again after each awaited step,
//! so work begun for one account never completes against another.

use crate::chains::WalletProvider;
use crate::types::{Address, ChainError, ChainId, ClientConfig, ConfigError, SessionInvalidated};
use log::{debug, info, warn};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::watch;

/// Wallet notifications (account switch, network switch, disconnect).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    AccountsChanged(Vec<Address>),
    ChainChanged(ChainId),
    Disconnected,
}

/// Order-book contract bound to one account for one generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractHandle {
    pub address: Address,
    pub bound_to: Address,
    pub generation: u64,
}

/// Point-in-time view of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub account: Option<Address>,
    pub chain_id: Option<ChainId>,
    pub generation: u64,
    pub order_book: Option<ContractHandle>,
}

impl SessionHandle {
    pub fn is_connected(&self) -> bool {
        self.account.is_some() && self.order_book.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkAdvisory {
    pub expected: ChainId,
    pub actual: ChainId,
    pub message: String,
}

#[derive(Debug, Default)]
struct Identity {
    account: Option<Address>,
    chain_id: Option<ChainId>,
    generation: u64,
    order_book: Option<ContractHandle>,
}

pub struct SessionState {
    expected_chain: ChainId,
    network_name: String,
    order_book_address: Address,
    identity: RwLock<Identity>,
    generation_tx: watch::Sender<u64>,
}

impl SessionState {
    pub fn new(expected_chain: ChainId, network_name: String, order_book_address: Address) -> Self {
        let (generation_tx, _) = watch::channel(0);
        Self {
            expected_chain,
            network_name,
            order_book_address,
            identity: RwLock::new(Identity::default()),
            generation_tx,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, ConfigError> {
        let order_book = Address::parse(&config.contracts.order_book_address)
            .map_err(|e| ConfigError::Invalid(format!("Invalid order book address: {}", e)))?;

        Ok(Self::new(
            ChainId(config.network.chain_id),
            config.network.network_name.clone(),
            order_book,
        ))
    }

    fn read(&self) -> RwLockReadGuard<'_, Identity> {
        self.identity.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Identity> {
        self.identity.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Interactive connect: asks the wallet for accounts.
    pub async fn connect(&self, wallet: &dyn WalletProvider) -> Result<SessionHandle, ChainError> {
        let accounts = wallet.request_accounts().await?;
        let chain_id = wallet.chain_id().await?;

        let handle = self.apply(accounts.into_iter().next(), Some(chain_id));
        if handle.account.is_none() {
            warn!("Wallet returned no accounts");
        }
        Ok(handle)
    }

    /// Silent reconnect using accounts the wallet already authorized.
    pub async fn connect_eagerly(
        &self,
        wallet: &dyn WalletProvider,
    ) -> Result<Option<SessionHandle>, ChainError> {
        let accounts = wallet.accounts().await?;
        let Some(account) = accounts.into_iter().next() else {
            debug!("No previously authorized account; staying disconnected");
            return Ok(None);
        };

        let chain_id = wallet.chain_id().await?;
        Ok(Some(self.apply(Some(account), Some(chain_id))))
    }

    pub fn disconnect(&self) -> SessionHandle {
        info!("Disconnecting wallet session");
        self.apply(None, None)
    }

    pub fn on_wallet_event(&self, event: WalletEvent) -> SessionHandle {
        debug!("Wallet event: {:?}", event);
        // Fields the event leaves alone are read under the write guard.
        self.update(|current| match event {
            WalletEvent::AccountsChanged(accounts) => match accounts.into_iter().next() {
                Some(account) => (Some(account), current.chain_id),
                None => (None, None),
            },
            WalletEvent::ChainChanged(chain_id) => (current.account.clone(), Some(chain_id)),
            WalletEvent::Disconnected => (None, None),
        })
    }

    fn apply(&self, account: Option<Address>, chain_id: Option<ChainId>) -> SessionHandle {
        self.update(|_| (account, chain_id))
    }

    fn update<F>(&self, next: F) -> SessionHandle
    where
        F: FnOnce(&Identity) -> (Option<Address>, Option<ChainId>),
    {
        let mut identity = self.write();
        let (account, chain_id) = next(&*identity);

        if identity.account == account && identity.chain_id == chain_id {
            return Self::handle_of(&identity);
        }

        identity.generation += 1;
        let generation = identity.generation;
        identity.order_book = account.as_ref().map(|owner| ContractHandle {
            address: self.order_book_address.clone(),
            bound_to: owner.clone(),
            generation,
        });
        identity.account = account;
        identity.chain_id = chain_id;

        match (&identity.account, identity.chain_id) {
            (Some(account), Some(chain_id)) => {
                info!(
                    "Session generation {}: account {} on chain {}",
                    identity.generation, account, chain_id
                );
                if chain_id != self.expected_chain {
                    warn!(
                        "Wallet is on chain {}, expected {} ({})",
                        chain_id, self.expected_chain, self.network_name
                    );
                }
            }
            _ => info!("Session generation {}: disconnected", identity.generation),
        }

        let handle = Self::handle_of(&identity);
        drop(identity);

        self.generation_tx.send_replace(handle.generation);
        handle
    }

    fn handle_of(identity: &Identity) -> SessionHandle {
        SessionHandle {
            account: identity.account.clone(),
            chain_id: identity.chain_id,
            generation: identity.generation,
            order_book: identity.order_book.clone(),
        }
    }

    pub fn snapshot(&self) -> SessionHandle {
        Self::handle_of(&self.read())
    }

    pub fn current_account(&self) -> Option<Address> {
        self.read().account.clone()
    }

    pub fn generation(&self) -> u64 {
        self.read().generation
    }

    /// Fails when the session has moved past the generation `handle` was taken at.
    pub fn ensure_current(&self, handle: &SessionHandle) -> Result<(), SessionInvalidated> {
        let current = self.generation();
        if current == handle.generation {
            Ok(())
        } else {
            Err(SessionInvalidated {
                expected: handle.generation,
                current,
                allowance_tx: None,
                deposit_tx: None,
            })
        }
    }

    /// Set while connected to a network other than the configured one.
    pub fn network_advisory(&self) -> Option<NetworkAdvisory> {
        let identity = self.read();
        identity.account.as_ref()?;
        let actual = identity.chain_id?;
        if actual == self.expected_chain {
            return None;
        }

        Some(NetworkAdvisory {
            expected: self.expected_chain,
            actual,
            message: format!(
                "Please connect to {} (Chain ID: {})",
                self.network_name, self.expected_chain
            ),
        })
    }

    pub fn expected_chain(&self) -> ChainId {
        self.expected_chain
    }

    pub fn order_book_address(&self) -> &Address {
        &self.order_book_address
    }

    /// Receives the generation number after every identity change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation_tx.subscribe()
    }
}
