use crate::{
    amount::{format_units, AmountError, AssetAmount},
    chains::ChainGateway,
    orders::OrderGateway,
    session::{SessionHandle, SessionState},
    types::{
        Address, CancelAck, ChainError, CoordinatorConfig, CoordinatorError, DepositReceipt,
        EscrowIntent, EscrowReceipt, EscrowState, OrderAck, OrderBookSnapshot, OrderIntent,
        RemoteAck, SessionInvalidated, Side, TransactionHash, WithdrawalAck,
    },
};
use backoff::{future::retry, ExponentialBackoff};
use log::{debug, error, info, warn};
use std::{
    future::Future,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

/// Orchestrates escrow deposits and order routing for one wallet session
///
/// The escrow flow is strictly sequential per intent: balance check, then
/// approval, then deposit, each step confirmed before the next starts. The
/// session generation is checked after every awaited step.
pub struct EscrowOrderCoordinator {
    session: Arc<SessionState>,
    chain: Arc<dyn ChainGateway>,
    orders: Arc<dyn OrderGateway>,
    config: CoordinatorConfig,
}

fn transition(intent: &mut EscrowIntent, state: EscrowState) {
    info!("Escrow {}: {:?} -> {:?}", intent.id, intent.state, state);
    intent.state = state;
}

impl EscrowOrderCoordinator {
    pub fn new(
        session: Arc<SessionState>,
        chain: Arc<dyn ChainGateway>,
        orders: Arc<dyn OrderGateway>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            session,
            chain,
            orders,
            config,
        }
    }

    pub fn session(&self) -> &Arc<SessionState> {
        &self.session
    }

    /// Snapshot of a connected session with a bound order-book handle.
    fn connected(&self) -> Result<(SessionHandle, Address), CoordinatorError> {
        let handle = self.session.snapshot();
        match (&handle.account, &handle.order_book) {
            (Some(account), Some(_)) => {
                let account = account.clone();
                Ok((handle, account))
            }
            _ => Err(CoordinatorError::NotConnected),
        }
    }

    /// Ledger submissions are only allowed on the configured network.
    fn require_expected_network(&self) -> Result<(), CoordinatorError> {
        match self.session.network_advisory() {
            Some(advisory) => {
                warn!("{}", advisory.message);
                Err(CoordinatorError::NetworkMismatch {
                    expected: advisory.expected,
                    actual: advisory.actual,
                })
            }
            None => Ok(()),
        }
    }

    fn check_session(
        &self,
        handle: &SessionHandle,
        intent: &mut EscrowIntent,
        allowance_tx: Option<&TransactionHash>,
        deposit_tx: Option<&TransactionHash>,
    ) -> Result<(), CoordinatorError> {
        if let Err(mut invalidated) = self.session.ensure_current(handle) {
            transition(intent, EscrowState::Invalidated);
            warn!(
                "Escrow {} abandoned: session moved from generation {} to {}",
                intent.id, invalidated.expected, invalidated.current
            );
            invalidated.allowance_tx = allowance_tx.cloned();
            invalidated.deposit_tx = deposit_tx.cloned();
            return Err(invalidated.into());
        }
        Ok(())
    }

    /// Session check after an order-service call. A request the service
    /// already accepted is handed back inside the error, never dropped.
    fn check_acknowledged<T>(
        &self,
        handle: &SessionHandle,
        ack: T,
        wrap: fn(T) -> RemoteAck,
    ) -> Result<T, CoordinatorError> {
        match self.session.ensure_current(handle) {
            Ok(()) => Ok(ack),
            Err(session) => {
                let ack = wrap(ack);
                warn!(
                    "Session moved from generation {} to {} after the order service acknowledged {:?}",
                    session.expected, session.current, ack
                );
                Err(CoordinatorError::AcknowledgedAfterSessionChange {
                    session,
                    ack: Box::new(ack),
                })
            }
        }
    }

    /// Read-only ledger call, retried on transient faults.
    async fn read_with_retry<T, F, Fut>(&self, what: &str, op: F) -> Result<T, ChainError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ChainError>>,
    {
        let attempts = self.config.read_retry_attempts.max(1);
        let delay = Duration::from_millis(self.config.read_retry_delay_ms);
        let policy = ExponentialBackoff {
            current_interval: delay,
            initial_interval: delay,
            max_interval: delay * 4,
            max_elapsed_time: None,
            ..Default::default()
        };

        let attempt = &AtomicU32::new(0);
        let op = &op;

        retry(policy, move || async move {
            let n = attempt.fetch_add(1, Ordering::Relaxed) + 1;
            op().await.map_err(|e| {
                if e.is_transient() && n < attempts {
                    warn!("{} attempt {} failed: {}", what, n, e);
                    backoff::Error::transient(e)
                } else {
                    error!("{} failed: {}", what, e);
                    backoff::Error::permanent(e)
                }
            })
        })
        .await
    }

    /// Approve the order book for `amount` of `token` and deposit it into escrow.
    ///
    /// Returns only after the deposit is confirmed. An insufficient wallet
    /// balance fails before any transaction is sent. A failed deposit after
    /// a confirmed approval yields `PartialEscrow`, since the allowance
    /// stays on the ledger.
    pub async fn escrow(
        &self,
        token: &Address,
        amount: &str,
    ) -> Result<EscrowReceipt, CoordinatorError> {
        let (handle, account) = self.connected()?;
        self.require_expected_network()?;
        let spender = self.chain.order_book_address().clone();

        let decimals = self
            .read_with_retry("decimals", || self.chain.decimals_of(token))
            .await?;
        let amount = AssetAmount::parse(amount, decimals)?;
        if amount.is_zero() {
            return Err(AmountError::Zero.into());
        }

        let mut intent = EscrowIntent::new(account.clone(), token.clone(), amount, handle.generation);
        info!(
            "Escrow {} created: {} of token {} for {}",
            intent.id, amount, token, account
        );
        self.check_session(&handle, &mut intent, None, None)?;

        transition(&mut intent, EscrowState::CheckingBalance);
        let balance = self
            .read_with_retry("balanceOf", || self.chain.balance_of(&account, token))
            .await?;
        self.check_session(&handle, &mut intent, None, None)?;

        if balance < amount.raw {
            transition(&mut intent, EscrowState::InsufficientFunds);
            let available = AssetAmount::from_raw(balance, decimals);
            warn!(
                "Escrow {}: balance {} is below requested {}",
                intent.id, available, amount
            );
            return Err(CoordinatorError::InsufficientFunds {
                required: amount,
                available,
            });
        }

        transition(&mut intent, EscrowState::Approving);
        let approve = match self.chain.approve(token, &spender, amount.raw).await {
            Ok(receipt) => receipt,
            Err(e) => {
                transition(&mut intent, EscrowState::ApprovalFailed);
                error!("Escrow {}: approval failed: {}", intent.id, e);
                return Err(CoordinatorError::ApprovalFailed {
                    intent: Box::new(intent),
                    source: e,
                });
            }
        };
        debug!("Escrow {}: allowance confirmed in {}", intent.id, approve.tx_hash);
        self.check_session(&handle, &mut intent, Some(&approve.tx_hash), None)?;

        transition(&mut intent, EscrowState::Depositing);
        let deposit = match self.chain.deposit(token, amount.raw).await {
            Ok(receipt) => receipt,
            Err(e) => {
                transition(&mut intent, EscrowState::PartiallyEscrowed);
                error!(
                    "Escrow {}: deposit failed after approval {}: {}",
                    intent.id, approve.tx_hash, e
                );
                return Err(CoordinatorError::PartialEscrow {
                    intent: Box::new(intent),
                    approve_tx: approve.tx_hash,
                    source: e,
                });
            }
        };
        self.check_session(
            &handle,
            &mut intent,
            Some(&approve.tx_hash),
            Some(&deposit.tx_hash),
        )?;

        transition(&mut intent, EscrowState::Confirmed);
        info!(
            "Escrow {} confirmed: approve {}, deposit {}",
            intent.id, approve.tx_hash, deposit.tx_hash
        );

        Ok(EscrowReceipt {
            intent,
            approve,
            deposit,
        })
    }

    /// Retry only the deposit of a partially escrowed intent.
    ///
    /// The allowance is read back from the ledger first; if it no longer
    /// covers the amount the caller has to escrow again from scratch.
    pub async fn resume_deposit(
        &self,
        mut intent: EscrowIntent,
    ) -> Result<DepositReceipt, CoordinatorError> {
        if !matches!(
            intent.state,
            EscrowState::PartiallyEscrowed | EscrowState::DepositFailed
        ) {
            return Err(CoordinatorError::NotResumable {
                intent: Box::new(intent),
            });
        }

        let (handle, account) = self.connected()?;
        self.require_expected_network()?;

        if account != intent.account {
            warn!(
                "Escrow {} belongs to {}, active account is {}",
                intent.id, intent.account, account
            );
            transition(&mut intent, EscrowState::Invalidated);
            return Err(SessionInvalidated {
                expected: intent.generation,
                current: handle.generation,
                allowance_tx: None,
                deposit_tx: None,
            }
            .into());
        }

        let spender = self.chain.order_book_address().clone();
        let allowance = self
            .read_with_retry("allowance", || {
                self.chain.allowance(&intent.token, &account, &spender)
            })
            .await?;
        self.check_session(&handle, &mut intent, None, None)?;

        if allowance < intent.amount.raw {
            warn!(
                "Escrow {}: allowance {} no longer covers {}",
                intent.id, allowance, intent.amount.raw
            );
            return Err(CoordinatorError::AllowanceMissing {
                required: intent.amount.raw,
                available: allowance,
            });
        }

        transition(&mut intent, EscrowState::Depositing);
        let deposit = match self.chain.deposit(&intent.token, intent.amount.raw).await {
            Ok(receipt) => receipt,
            Err(e) => {
                transition(&mut intent, EscrowState::DepositFailed);
                error!("Escrow {}: resumed deposit failed: {}", intent.id, e);
                return Err(CoordinatorError::DepositFailed {
                    intent: Box::new(intent),
                    source: e,
                });
            }
        };
        self.check_session(&handle, &mut intent, None, Some(&deposit.tx_hash))?;

        transition(&mut intent, EscrowState::Confirmed);
        Ok(DepositReceipt { intent, deposit })
    }

    /// Escrowed balance of `token` for the active account as a decimal string.
    ///
    /// Always read from the ledger; an empty or zero result is `"0"`.
    pub async fn get_escrow_balance(&self, token: &Address) -> Result<String, CoordinatorError> {
        let (handle, account) = self.connected()?;

        let escrowed = self
            .read_with_retry("escrowedFunds", || self.chain.escrowed_funds(&account, token))
            .await?;
        let decimals = self
            .read_with_retry("decimals", || self.chain.decimals_of(token))
            .await?;
        self.session.ensure_current(&handle)?;

        let formatted = format_units(escrowed.unwrap_or_default(), decimals);
        debug!("Escrow balance of {} for {}: {}", token, account, formatted);
        Ok(formatted)
    }

    pub async fn place_order(
        &self,
        price: &str,
        quantity: &str,
        side: Side,
        base_asset: &str,
        quote_asset: &str,
    ) -> Result<OrderAck, CoordinatorError> {
        let (handle, account) = self.connected()?;

        let intent = OrderIntent {
            account,
            price: price.to_string(),
            quantity: quantity.to_string(),
            side,
            base_asset: base_asset.to_string(),
            quote_asset: quote_asset.to_string(),
        };
        info!(
            "Placing {} order {} {}/{} @ {}",
            side, quantity, base_asset, quote_asset, price
        );

        let ack = self.orders.place_order(&intent).await?;
        self.check_acknowledged(&handle, ack, RemoteAck::Order)
    }

    pub async fn cancel_order(
        &self,
        order_id: &str,
        side: Side,
        base_asset: &str,
        quote_asset: &str,
    ) -> Result<CancelAck, CoordinatorError> {
        let (handle, _) = self.connected()?;
        info!("Cancelling order {}", order_id);

        let ack = self
            .orders
            .cancel_order(order_id, side, base_asset, quote_asset)
            .await?;
        self.check_acknowledged(&handle, ack, RemoteAck::Cancel)
    }

    /// Order book snapshot; needs no wallet session.
    pub async fn order_book(&self, symbol: &str) -> Result<OrderBookSnapshot, CoordinatorError> {
        Ok(self.orders.fetch_order_book(symbol).await?)
    }

    pub async fn request_withdrawal(
        &self,
        asset: &str,
        amount: &str,
    ) -> Result<WithdrawalAck, CoordinatorError> {
        let (handle, account) = self.connected()?;
        info!("Requesting withdrawal of {} {} for {}", amount, asset, account);

        let ack = self
            .orders
            .request_withdrawal(&account, asset, amount)
            .await?;
        self.check_acknowledged(&handle, ack, RemoteAck::Withdrawal)
    }
}
