use crate::amount::{AmountError, AssetAmount};
use chrono::{DateTime, Utc};
use primitive_types::U256;
use serde::{Deserialize, Deserializer, Serialize};
use std::{collections::BTreeMap, fmt};
use uuid::Uuid;

/// Core protocol types for the escrow / order coordinator

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainId(pub u64);

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionHash(pub String);

impl fmt::Display for TransactionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 20-byte ledger address. Rendered as lowercase `0x` hex.
///
/// Deserialization goes through [`Address::parse`], so a persisted value
/// that is not a valid address is rejected instead of decoding to zero.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address([u8; 20]);

impl Address {
    pub fn parse(value: &str) -> Result<Self, AddressError> {
        let value = value.trim();
        let hex_part = value
            .strip_prefix("0x")
            .or_else(|| value.strip_prefix("0X"))
            .ok_or_else(|| AddressError(value.to_string()))?;

        if hex_part.len() != 40 {
            return Err(AddressError(value.to_string()));
        }

        let mut bytes = [0u8; 20];
        hex::decode_to_slice(hex_part, &mut bytes).map_err(|_| AddressError(value.to_string()))?;
        Ok(Self(bytes))
    }

    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// The 20 address bytes.
    pub fn to_bytes(&self) -> [u8; 20] {
        self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl std::str::FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Address::parse(&value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid address '{0}': expected 0x followed by 40 hex characters")]
pub struct AddressError(pub String);

/// Confirmed ledger transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: TransactionHash,
    pub block_number: u64,
    pub gas_used: Option<u64>,
    pub success: bool,
}

// ============================================================================
// Escrow intents
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscrowState {
    Created,
    CheckingBalance,
    Approving,
    Depositing,
    Confirmed,
    InsufficientFunds,
    ApprovalFailed,
    PartiallyEscrowed,
    DepositFailed,
    Invalidated,
}

impl EscrowState {
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            EscrowState::Created
                | EscrowState::CheckingBalance
                | EscrowState::Approving
                | EscrowState::Depositing
        )
    }
}

/// A single user request to move `amount` of `token` into order-book escrow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscrowIntent {
    pub id: Uuid,
    pub account: Address,
    pub token: Address,
    pub amount: AssetAmount,
    pub state: EscrowState,
    pub generation: u64,
    pub created_at: DateTime<Utc>,
}

impl EscrowIntent {
    pub fn new(account: Address, token: Address, amount: AssetAmount, generation: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            account,
            token,
            amount,
            state: EscrowState::Created,
            generation,
            created_at: Utc::now(),
        }
    }
}

/// Approve and deposit both confirmed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowReceipt {
    pub intent: EscrowIntent,
    pub approve: TxReceipt,
    pub deposit: TxReceipt,
}

/// Deposit confirmed for a previously approved intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositReceipt {
    pub intent: EscrowIntent,
    pub deposit: TxReceipt,
}

// ============================================================================
// Order service payloads
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => f.write_str("buy"),
            Side::Sell => f.write_str("sell"),
        }
    }
}

impl std::str::FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "buy" | "bid" => Ok(Side::Buy),
            "sell" | "ask" => Ok(Side::Sell),
            other => Err(format!("Unknown order side: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderIntent {
    pub account: Address,
    pub price: String,
    pub quantity: String,
    pub side: Side,
    pub base_asset: String,
    pub quote_asset: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    pub order_id: String,
    pub side: Side,
    pub base_asset: String,
    pub quote_asset: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalRequest {
    pub account: Address,
    pub asset: String,
    pub amount: String,
}

/// Fields outside the typed ones are kept as-is.
pub type ExtraFields = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAck {
    #[serde(default, alias = "id", deserialize_with = "opt_string_or_number")]
    pub order_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelAck {
    #[serde(default, alias = "id", deserialize_with = "opt_string_or_number")]
    pub order_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalAck {
    #[serde(default, alias = "id", deserialize_with = "opt_string_or_number")]
    pub withdrawal_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// Acknowledgement the order service returned for a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "ack", rename_all = "lowercase")]
pub enum RemoteAck {
    Order(OrderAck),
    Cancel(CancelAck),
    Withdrawal(WithdrawalAck),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    #[serde(deserialize_with = "string_or_number")]
    pub price: String,
    #[serde(alias = "amount", deserialize_with = "string_or_number")]
    pub quantity: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub bids: Vec<PriceLevel>,
    #[serde(default)]
    pub asks: Vec<PriceLevel>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

fn value_to_string(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    value_to_string(value).ok_or_else(|| serde::de::Error::custom("expected string or number"))
}

fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(value_to_string))
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub network: NetworkConfig,
    pub contracts: ContractsConfig,
    pub chain: ChainConfig,
    pub order_service: OrderServiceConfig,
    pub coordinator: CoordinatorConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub chain_id: u64,
    pub network_name: String,
    pub rpc_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractsConfig {
    pub order_book_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub confirmation_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceEnvironment {
    Development,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceUrls {
    pub development: String,
    pub production: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceEndpoints {
    pub limit_order: String,
    pub cancel_order: String,
    pub order_book: String,
    pub initiate_withdrawal: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderServiceConfig {
    pub environment: ServiceEnvironment,
    pub base_url: ServiceUrls,
    pub endpoints: ServiceEndpoints,
    pub request_timeout_secs: u64,
}

impl OrderServiceConfig {
    pub fn active_base_url(&self) -> &str {
        match self.environment {
            ServiceEnvironment::Development => &self.base_url.development,
            ServiceEnvironment::Production => &self.base_url.production,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    pub read_retry_attempts: u32,
    pub read_retry_delay_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            read_retry_attempts: 3,
            read_retry_delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

// ============================================================================
// Errors
// ============================================================================

/// Ledger submission, confirmation or query fault
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ChainError {
    #[error("Ledger RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Transaction reverted: {tx_hash}")]
    Reverted { tx_hash: TransactionHash },

    #[error("Transaction {tx_hash} not confirmed within {secs}s")]
    Timeout { tx_hash: TransactionHash, secs: u64 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("No signing account connected")]
    NoSigner,
}

impl ChainError {
    /// Faults that may clear up on their own; safe to retry for read-only calls.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::Network(_) | ChainError::Timeout { .. })
    }
}

impl From<reqwest::Error> for ChainError {
    fn from(err: reqwest::Error) -> Self {
        ChainError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::Decode(err.to_string())
    }
}

/// Failure reported by (or while talking to) the order service
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RemoteServiceError {
    #[error("Order service returned {status} for {endpoint}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("Malformed response from {endpoint} ({reason}): {body}")]
    Malformed {
        endpoint: String,
        body: String,
        reason: String,
    },

    #[error("Transport error for {endpoint}: {message}")]
    Transport { endpoint: String, message: String },
}

impl RemoteServiceError {
    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteServiceError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn body(&self) -> Option<&str> {
        match self {
            RemoteServiceError::Status { body, .. } | RemoteServiceError::Malformed { body, .. } => {
                Some(body)
            }
            RemoteServiceError::Transport { .. } => None,
        }
    }
}

/// The session identity moved on while an operation was in flight.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Session changed (generation {expected} -> {current})")]
pub struct SessionInvalidated {
    pub expected: u64,
    pub current: u64,
    /// Approval left on the ledger by the abandoned operation, if any.
    pub allowance_tx: Option<TransactionHash>,
    /// Deposit that confirmed after the session had already moved on.
    pub deposit_tx: Option<TransactionHash>,
}

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        required: AssetAmount,
        available: AssetAmount,
    },

    #[error("Approval failed for escrow {}: {source}", .intent.id)]
    ApprovalFailed {
        intent: Box<EscrowIntent>,
        source: ChainError,
    },

    #[error("Allowance granted in {approve_tx} but deposit failed for escrow {}: {source}", .intent.id)]
    PartialEscrow {
        intent: Box<EscrowIntent>,
        approve_tx: TransactionHash,
        source: ChainError,
    },

    #[error("Deposit failed for escrow {}: {source}", .intent.id)]
    DepositFailed {
        intent: Box<EscrowIntent>,
        source: ChainError,
    },

    #[error("Escrow {} cannot be resumed from state {:?}", .intent.id, .intent.state)]
    NotResumable { intent: Box<EscrowIntent> },

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Remote service error: {0}")]
    Remote(#[from] RemoteServiceError),

    #[error(transparent)]
    SessionInvalidated(#[from] SessionInvalidated),

    /// The order service accepted the request, but the session moved on
    /// while it was in flight.
    #[error("{session}; order service already acknowledged the request: {ack:?}")]
    AcknowledgedAfterSessionChange {
        session: SessionInvalidated,
        ack: Box<RemoteAck>,
    },

    #[error("Wallet not connected")]
    NotConnected,

    #[error("Wrong network: expected chain {expected}, wallet is on {actual}")]
    NetworkMismatch { expected: ChainId, actual: ChainId },

    #[error("Invalid amount: {0}")]
    InvalidAmount(#[from] AmountError),

    #[error("Allowance too low: required {required}, available {available}")]
    AllowanceMissing { required: U256, available: U256 },
}

impl CoordinatorError {
    /// Terminal escrow state this error stands for, when it came from an escrow flow.
    pub fn escrow_state(&self) -> Option<EscrowState> {
        match self {
            CoordinatorError::InsufficientFunds { .. } => Some(EscrowState::InsufficientFunds),
            CoordinatorError::ApprovalFailed { .. } => Some(EscrowState::ApprovalFailed),
            CoordinatorError::PartialEscrow { .. } => Some(EscrowState::PartiallyEscrowed),
            CoordinatorError::DepositFailed { .. } => Some(EscrowState::DepositFailed),
            CoordinatorError::SessionInvalidated(_) => Some(EscrowState::Invalidated),
            _ => None,
        }
    }

    /// Acknowledgement of an order-service call superseded by a session change.
    pub fn remote_ack(&self) -> Option<&RemoteAck> {
        match self {
            CoordinatorError::AcknowledgedAfterSessionChange { ack, .. } => Some(ack.as_ref()),
            _ => None,
        }
    }

    /// Underlying ledger fault, if any.
    pub fn chain_error(&self) -> Option<&ChainError> {
        match self {
            CoordinatorError::Chain(e)
            | CoordinatorError::ApprovalFailed { source: e, .. }
            | CoordinatorError::PartialEscrow { source: e, .. }
            | CoordinatorError::DepositFailed { source: e, .. } => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Invalid(String),

    #[error("Configuration source error: {0}")]
    Source(#[from] config::ConfigError),
}
