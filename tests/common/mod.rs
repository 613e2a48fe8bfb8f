#![allow(dead_code)]

use async_trait::async_trait;
use p2p_escrow_client::{
    chains::{ChainGateway, WalletProvider},
    orders::OrderGateway,
    types::{CancelAck, OrderAck, OrderBookSnapshot, OrderIntent, WithdrawalAck},
    Address, ChainError, ChainId, RemoteServiceError, SessionState, Side, TransactionHash,
    TxReceipt, WalletEvent,
};
use primitive_types::U256;
use rand::Rng;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

pub const AMOY: ChainId = ChainId(80002);

pub fn addr(last: u8) -> Address {
    Address::parse(&format!("0x{:040x}", last)).unwrap()
}

pub fn order_book() -> Address {
    addr(0xb0)
}

pub fn token() -> Address {
    addr(0x70)
}

pub fn random_tx_hash() -> TransactionHash {
    let bytes: [u8; 32] = rand::rng().random();
    TransactionHash(format!("0x{}", hex::encode(bytes)))
}

pub struct StaticWallet {
    pub accounts: Vec<Address>,
    pub chain_id: ChainId,
}

#[async_trait]
impl WalletProvider for StaticWallet {
    async fn request_accounts(&self) -> Result<Vec<Address>, ChainError> {
        Ok(self.accounts.clone())
    }

    async fn accounts(&self) -> Result<Vec<Address>, ChainError> {
        Ok(self.accounts.clone())
    }

    async fn chain_id(&self) -> Result<ChainId, ChainError> {
        Ok(self.chain_id)
    }
}

pub async fn connected_session(account: Address, chain_id: ChainId) -> Arc<SessionState> {
    let session = Arc::new(SessionState::new(
        AMOY,
        "Polygon Amoy".to_string(),
        order_book(),
    ));
    let wallet = StaticWallet {
        accounts: vec![account],
        chain_id,
    };
    session.connect(&wallet).await.unwrap();
    session
}

/// Ledger call as seen by the fake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerCall {
    Approve {
        from: Option<Address>,
        token: Address,
        spender: Address,
        amount: U256,
    },
    Deposit {
        from: Option<Address>,
        token: Address,
        amount: U256,
    },
}

#[derive(Default)]
struct LedgerState {
    decimals: HashMap<Address, u8>,
    balances: HashMap<(Address, Address), U256>,
    allowances: HashMap<(Address, Address), U256>,
    escrowed: HashMap<(Address, Address), U256>,
    calls: Vec<LedgerCall>,
    approve_error: Option<ChainError>,
    deposit_error: Option<ChainError>,
    transient_read_failures: u32,
    reads: u32,
    switch_account_on_approve: Option<Address>,
    switch_account_on_deposit: Option<Address>,
}

/// In-memory ERC-20 plus order-book escrow
pub struct MockLedger {
    order_book: Address,
    session: Option<Arc<SessionState>>,
    state: Mutex<LedgerState>,
}

impl MockLedger {
    pub fn new(session: Option<Arc<SessionState>>) -> Self {
        Self {
            order_book: order_book(),
            session,
            state: Mutex::new(LedgerState::default()),
        }
    }

    pub fn with_token(self, token: &Address, decimals: u8) -> Self {
        self.state.lock().unwrap().decimals.insert(token.clone(), decimals);
        self
    }

    pub fn with_balance(self, account: &Address, token: &Address, raw: u64) -> Self {
        self.state
            .lock()
            .unwrap()
            .balances
            .insert((account.clone(), token.clone()), U256::from(raw));
        self
    }

    pub fn with_escrowed(self, account: &Address, token: &Address, raw: u64) -> Self {
        self.state
            .lock()
            .unwrap()
            .escrowed
            .insert((account.clone(), token.clone()), U256::from(raw));
        self
    }

    pub fn fail_approve(self, error: ChainError) -> Self {
        self.state.lock().unwrap().approve_error = Some(error);
        self
    }

    pub fn fail_deposit(self, error: ChainError) -> Self {
        self.state.lock().unwrap().deposit_error = Some(error);
        self
    }

    pub fn flaky_reads(self, failures: u32) -> Self {
        self.state.lock().unwrap().transient_read_failures = failures;
        self
    }

    /// Simulates the user switching accounts while the approval is pending.
    pub fn switch_account_on_approve(self, account: Address) -> Self {
        self.state.lock().unwrap().switch_account_on_approve = Some(account);
        self
    }

    /// Simulates an account switch that lands while the deposit confirms.
    pub fn switch_account_on_deposit(self, account: Address) -> Self {
        self.state.lock().unwrap().switch_account_on_deposit = Some(account);
        self
    }

    pub fn set_deposit_failure(&self, error: ChainError) {
        self.state.lock().unwrap().deposit_error = Some(error);
    }

    /// Drops the allowance `owner` granted the order book.
    pub fn revoke_allowance(&self, owner: &Address) {
        self.state
            .lock()
            .unwrap()
            .allowances
            .remove(&(owner.clone(), self.order_book.clone()));
    }

    pub fn clear_deposit_failure(&self) {
        self.state.lock().unwrap().deposit_error = None;
    }

    pub fn calls(&self) -> Vec<LedgerCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn reads(&self) -> u32 {
        self.state.lock().unwrap().reads
    }

    pub fn allowance_of(&self, owner: &Address) -> U256 {
        self.state
            .lock()
            .unwrap()
            .allowances
            .get(&(owner.clone(), self.order_book.clone()))
            .copied()
            .unwrap_or_default()
    }

    pub fn escrowed_of(&self, account: &Address, token: &Address) -> U256 {
        self.state
            .lock()
            .unwrap()
            .escrowed
            .get(&(account.clone(), token.clone()))
            .copied()
            .unwrap_or_default()
    }

    fn signer(&self) -> Option<Address> {
        self.session.as_ref().and_then(|s| s.current_account())
    }

    fn read(&self) -> Result<(), ChainError> {
        let mut state = self.state.lock().unwrap();
        state.reads += 1;
        if state.transient_read_failures > 0 {
            state.transient_read_failures -= 1;
            return Err(ChainError::Network("connection reset".to_string()));
        }
        Ok(())
    }

    fn receipt() -> TxReceipt {
        TxReceipt {
            tx_hash: random_tx_hash(),
            block_number: 1,
            gas_used: Some(46_000),
            success: true,
        }
    }
}

#[async_trait]
impl ChainGateway for MockLedger {
    async fn approve(
        &self,
        token: &Address,
        spender: &Address,
        amount: U256,
    ) -> Result<TxReceipt, ChainError> {
        let from = self.signer();
        let switch_to = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(LedgerCall::Approve {
                from: from.clone(),
                token: token.clone(),
                spender: spender.clone(),
                amount,
            });
            if let Some(error) = state.approve_error.clone() {
                return Err(error);
            }
            if let Some(owner) = from.clone() {
                state.allowances.insert((owner, spender.clone()), amount);
            }
            state.switch_account_on_approve.take()
        };

        tokio::task::yield_now().await;

        if let (Some(account), Some(session)) = (switch_to, self.session.as_ref()) {
            session.on_wallet_event(WalletEvent::AccountsChanged(vec![account]));
        }

        Ok(Self::receipt())
    }

    async fn deposit(&self, token: &Address, amount: U256) -> Result<TxReceipt, ChainError> {
        let from = self.signer();
        let switch_to = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(LedgerCall::Deposit {
                from: from.clone(),
                token: token.clone(),
                amount,
            });
            if let Some(error) = state.deposit_error.clone() {
                return Err(error);
            }

            let owner = from.ok_or(ChainError::NoSigner)?;
            let allowance_key = (owner.clone(), self.order_book.clone());
            let allowance = state.allowances.get(&allowance_key).copied().unwrap_or_default();
            if allowance < amount {
                return Err(ChainError::Rpc {
                    code: 3,
                    message: "execution reverted: ERC20: insufficient allowance".to_string(),
                });
            }
            state.allowances.insert(allowance_key, allowance - amount);

            let balance_key = (owner.clone(), token.clone());
            let balance = state.balances.get(&balance_key).copied().unwrap_or_default();
            state.balances.insert(balance_key, balance - amount);

            let escrow_key = (owner, token.clone());
            let escrowed = state.escrowed.get(&escrow_key).copied().unwrap_or_default();
            state.escrowed.insert(escrow_key, escrowed + amount);

            state.switch_account_on_deposit.take()
        };

        tokio::task::yield_now().await;

        if let (Some(account), Some(session)) = (switch_to, self.session.as_ref()) {
            session.on_wallet_event(WalletEvent::AccountsChanged(vec![account]));
        }

        Ok(Self::receipt())
    }

    async fn balance_of(&self, account: &Address, token: &Address) -> Result<U256, ChainError> {
        self.read()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .balances
            .get(&(account.clone(), token.clone()))
            .copied()
            .unwrap_or_default())
    }

    async fn decimals_of(&self, token: &Address) -> Result<u8, ChainError> {
        self.read()?;
        self.state
            .lock()
            .unwrap()
            .decimals
            .get(token)
            .copied()
            .ok_or_else(|| ChainError::Decode(format!("Empty result from {}", token)))
    }

    async fn allowance(
        &self,
        _token: &Address,
        owner: &Address,
        spender: &Address,
    ) -> Result<U256, ChainError> {
        self.read()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .allowances
            .get(&(owner.clone(), spender.clone()))
            .copied()
            .unwrap_or_default())
    }

    async fn escrowed_funds(
        &self,
        account: &Address,
        token: &Address,
    ) -> Result<Option<U256>, ChainError> {
        self.read()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .escrowed
            .get(&(account.clone(), token.clone()))
            .copied())
    }

    fn order_book_address(&self) -> &Address {
        &self.order_book
    }
}

/// Order service fake that records requests
#[derive(Default)]
pub struct MockOrders {
    pub placed: Mutex<Vec<OrderIntent>>,
    pub cancelled: Mutex<Vec<(String, Side)>>,
    pub withdrawals: Mutex<Vec<(Address, String, String)>>,
    pub reject_with: Mutex<Option<RemoteServiceError>>,
    /// Account announced to the session while a request is in flight.
    pub switch_account_during_call: Mutex<Option<(Arc<SessionState>, Address)>>,
}

impl MockOrders {
    fn rejection(&self) -> Result<(), RemoteServiceError> {
        match self.reject_with.lock().unwrap().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn maybe_switch_account(&self) {
        let switch = self.switch_account_during_call.lock().unwrap().take();
        if let Some((session, account)) = switch {
            session.on_wallet_event(WalletEvent::AccountsChanged(vec![account]));
        }
    }
}

#[async_trait]
impl OrderGateway for MockOrders {
    async fn place_order(&self, intent: &OrderIntent) -> Result<OrderAck, RemoteServiceError> {
        self.rejection()?;
        self.placed.lock().unwrap().push(intent.clone());
        self.maybe_switch_account();
        Ok(OrderAck {
            order_id: Some("42".to_string()),
            status: Some("accepted".to_string()),
            ..OrderAck::default()
        })
    }

    async fn cancel_order(
        &self,
        order_id: &str,
        side: Side,
        _base_asset: &str,
        _quote_asset: &str,
    ) -> Result<CancelAck, RemoteServiceError> {
        self.rejection()?;
        self.cancelled
            .lock()
            .unwrap()
            .push((order_id.to_string(), side));
        self.maybe_switch_account();
        Ok(CancelAck {
            order_id: Some(order_id.to_string()),
            status: Some("cancelled".to_string()),
            ..CancelAck::default()
        })
    }

    async fn fetch_order_book(&self, symbol: &str) -> Result<OrderBookSnapshot, RemoteServiceError> {
        self.rejection()?;
        Ok(OrderBookSnapshot {
            symbol: Some(symbol.to_string()),
            ..OrderBookSnapshot::default()
        })
    }

    async fn request_withdrawal(
        &self,
        account: &Address,
        asset: &str,
        amount: &str,
    ) -> Result<WithdrawalAck, RemoteServiceError> {
        self.rejection()?;
        self.withdrawals.lock().unwrap().push((
            account.clone(),
            asset.to_string(),
            amount.to_string(),
        ));
        self.maybe_switch_account();
        Ok(WithdrawalAck {
            withdrawal_id: Some("w-1".to_string()),
            status: Some("pending".to_string()),
            ..WithdrawalAck::default()
        })
    }
}
