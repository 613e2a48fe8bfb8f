use crate::chains::{ChainGateway, WalletProvider};
use crate::session::SessionState;
use crate::types::{Address, ChainConfig, ChainError, ChainId, TransactionHash, TxReceipt};
use async_trait::async_trait;
use log::{debug, info, warn};
use primitive_types::U256;
use serde::Deserialize;
use serde_json::{json, Value};
use sha3::{Digest, Keccak256};
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::time::{sleep, timeout};

const APPROVE: &str = "approve(address,uint256)";
const BALANCE_OF: &str = "balanceOf(address)";
const DECIMALS: &str = "decimals()";
const ALLOWANCE: &str = "allowance(address,address)";
const ESCROW: &str = "escrow(address,uint256)";
const ESCROWED_FUNDS: &str = "escrowedFunds(address,address)";

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    transaction_hash: String,
    block_number: Option<String>,
    gas_used: Option<String>,
    status: Option<String>,
}

/// EVM ledger and wallet over Ethereum JSON-RPC.
///
/// Transactions go out through `eth_sendTransaction`, so the node (or the
/// wallet behind it) holds the signing key for the session's account.
pub struct EvmGateway {
    client: reqwest::Client,
    rpc_url: String,
    order_book: Address,
    session: Arc<SessionState>,
    confirmation_timeout: Duration,
    poll_interval: Duration,
    request_id: AtomicU64,
}

impl EvmGateway {
    pub fn new(
        rpc_url: String,
        config: &ChainConfig,
        session: Arc<SessionState>,
    ) -> Result<Self, ChainError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            rpc_url,
            order_book: session.order_book_address().clone(),
            session,
            confirmation_timeout: Duration::from_secs(config.confirmation_timeout_secs),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            request_id: AtomicU64::new(1),
        })
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        debug!("JSON-RPC {} #{}", method, id);
        let response: JsonRpcResponse = self
            .client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await?
            .json()
            .await?;

        if let Some(error) = response.error {
            return Err(ChainError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        Ok(response.result.unwrap_or(Value::Null))
    }

    async fn call(&self, to: &Address, data: String) -> Result<String, ChainError> {
        let result = self
            .rpc("eth_call", json!([{ "to": to, "data": data }, "latest"]))
            .await?;

        match result {
            Value::String(s) => Ok(s),
            Value::Null => Ok("0x".to_string()),
            other => Err(ChainError::Decode(format!("Unexpected eth_call result: {}", other))),
        }
    }

    async fn call_u256(&self, to: &Address, data: String) -> Result<U256, ChainError> {
        let raw = self.call(to, data).await?;
        decode_word(&raw)?.ok_or_else(|| ChainError::Decode(format!("Empty result from {}", to)))
    }

    /// Submit from the session account and wait for the receipt.
    async fn send_transaction(&self, to: &Address, data: String) -> Result<TxReceipt, ChainError> {
        let from = self.session.current_account().ok_or(ChainError::NoSigner)?;

        let result = self
            .rpc(
                "eth_sendTransaction",
                json!([{ "from": from, "to": to, "data": data }]),
            )
            .await?;

        let tx_hash = match result {
            Value::String(hash) => TransactionHash(hash),
            other => {
                return Err(ChainError::Decode(format!(
                    "Unexpected transaction hash: {}",
                    other
                )))
            }
        };

        debug!("Transaction submitted: {}", tx_hash);
        self.wait_for_receipt(tx_hash).await
    }

    /// Poll for the receipt until it shows up or the confirmation timeout passes.
    async fn wait_for_receipt(&self, tx_hash: TransactionHash) -> Result<TxReceipt, ChainError> {
        let poll = async {
            loop {
                match self
                    .rpc("eth_getTransactionReceipt", json!([tx_hash.0]))
                    .await
                {
                    Ok(Value::Null) => sleep(self.poll_interval).await,
                    Ok(value) => {
                        return serde_json::from_value::<RawReceipt>(value)
                            .map_err(ChainError::from)
                            .and_then(receipt_from_raw);
                    }
                    Err(ChainError::Network(e)) => {
                        warn!("Receipt poll for {} failed: {}", tx_hash, e);
                        sleep(self.poll_interval).await;
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        let outcome = timeout(self.confirmation_timeout, poll).await;
        match outcome {
            Ok(Ok(receipt)) if receipt.success => {
                info!("Transaction confirmed: {} (block {})", receipt.tx_hash, receipt.block_number);
                Ok(receipt)
            }
            Ok(Ok(receipt)) => Err(ChainError::Reverted {
                tx_hash: receipt.tx_hash,
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ChainError::Timeout {
                tx_hash,
                secs: self.confirmation_timeout.as_secs(),
            }),
        }
    }
}

#[async_trait]
impl ChainGateway for EvmGateway {
    async fn approve(
        &self,
        token: &Address,
        spender: &Address,
        amount: U256,
    ) -> Result<TxReceipt, ChainError> {
        info!("Approving {} for {} on token {}", amount, spender, token);
        let data = calldata(APPROVE, &[address_word(spender), u256_word(amount)]);
        self.send_transaction(token, data).await
    }

    async fn deposit(&self, token: &Address, amount: U256) -> Result<TxReceipt, ChainError> {
        info!("Escrowing {} of token {}", amount, token);
        let data = calldata(ESCROW, &[address_word(token), u256_word(amount)]);
        self.send_transaction(&self.order_book, data).await
    }

    async fn balance_of(&self, account: &Address, token: &Address) -> Result<U256, ChainError> {
        let data = calldata(BALANCE_OF, &[address_word(account)]);
        self.call_u256(token, data).await
    }

    async fn decimals_of(&self, token: &Address) -> Result<u8, ChainError> {
        let value = self.call_u256(token, calldata(DECIMALS, &[])).await?;
        if value > U256::from(u8::MAX) {
            return Err(ChainError::Decode(format!("decimals() out of range: {}", value)));
        }
        Ok(value.low_u32() as u8)
    }

    async fn allowance(
        &self,
        token: &Address,
        owner: &Address,
        spender: &Address,
    ) -> Result<U256, ChainError> {
        let data = calldata(ALLOWANCE, &[address_word(owner), address_word(spender)]);
        self.call_u256(token, data).await
    }

    async fn escrowed_funds(
        &self,
        account: &Address,
        token: &Address,
    ) -> Result<Option<U256>, ChainError> {
        let data = calldata(ESCROWED_FUNDS, &[address_word(account), address_word(token)]);
        let raw = self.call(&self.order_book, data).await?;
        decode_word(&raw)
    }

    fn order_book_address(&self) -> &Address {
        &self.order_book
    }
}

#[async_trait]
impl WalletProvider for EvmGateway {
    async fn request_accounts(&self) -> Result<Vec<Address>, ChainError> {
        let result = self.rpc("eth_requestAccounts", json!([])).await?;
        parse_accounts(result)
    }

    async fn accounts(&self) -> Result<Vec<Address>, ChainError> {
        let result = self.rpc("eth_accounts", json!([])).await?;
        parse_accounts(result)
    }

    async fn chain_id(&self) -> Result<ChainId, ChainError> {
        let result = self.rpc("eth_chainId", json!([])).await?;
        let hex_id = result
            .as_str()
            .ok_or_else(|| ChainError::Decode(format!("Unexpected chain id: {}", result)))?;
        Ok(ChainId(parse_quantity(hex_id)?))
    }
}

fn parse_accounts(value: Value) -> Result<Vec<Address>, ChainError> {
    let raw: Vec<String> = serde_json::from_value(value)?;
    raw.iter()
        .map(|a| Address::parse(a).map_err(|e| ChainError::Decode(e.to_string())))
        .collect()
}

fn receipt_from_raw(raw: RawReceipt) -> Result<TxReceipt, ChainError> {
    let block_number = match raw.block_number.as_deref() {
        Some(n) => parse_quantity(n)?,
        None => 0,
    };
    let gas_used = raw.gas_used.as_deref().map(parse_quantity).transpose()?;
    let success = match raw.status.as_deref() {
        Some(status) => parse_quantity(status)? == 1,
        None => true,
    };

    Ok(TxReceipt {
        tx_hash: TransactionHash(raw.transaction_hash),
        block_number,
        gas_used,
        success,
    })
}

/// Hex `0x`-quantity to integer.
pub fn parse_quantity(value: &str) -> Result<u64, ChainError> {
    let digits = value.trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| ChainError::Decode(format!("Invalid quantity '{}': {}", value, e)))
}

/// First four bytes of the keccak hash of a function signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = Keccak256::digest(signature.as_bytes());
    let mut out = [0u8; 4];
    out.copy_from_slice(&hash[..4]);
    out
}

fn address_word(address: &Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(&address.to_bytes());
    word
}

fn u256_word(value: U256) -> [u8; 32] {
    let mut word = [0u8; 32];
    value.to_big_endian(&mut word);
    word
}

/// ABI calldata for a call with static arguments.
pub fn calldata(signature: &str, words: &[[u8; 32]]) -> String {
    let mut bytes = Vec::with_capacity(4 + 32 * words.len());
    bytes.extend_from_slice(&selector(signature));
    for word in words {
        bytes.extend_from_slice(word);
    }
    format!("0x{}", hex::encode(bytes))
}

/// Decode the first 32-byte word of a call result; `None` for empty data.
pub fn decode_word(raw: &str) -> Result<Option<U256>, ChainError> {
    let digits = raw.trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(None);
    }

    let bytes = hex::decode(digits)
        .map_err(|e| ChainError::Decode(format!("Invalid hex result: {}", e)))?;
    if bytes.len() < 32 {
        return Err(ChainError::Decode(format!(
            "Result too short: {} bytes",
            bytes.len()
        )));
    }

    Ok(Some(U256::from_big_endian(&bytes[..32])))
}
