//! Tron Chain Connector
//!
//! Client for the Tron full-node HTTP API. The node builds each transaction;
//! the connector checks that `txID` is sha256 of the returned raw data before
//! signing it locally, then broadcasts the signed JSON back.

use anyhow::Context;
use async_trait::async_trait;
use ethereum_types::H160;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::abi::{decode_bytes32, decode_hex, decode_uint};
use super::{balance_of_call, CallOptions, ChainConnector, ContractCall, LogEntry, Receipt, TxRef};
use crate::config::{ServiceConfig, TronChainConfig};
use crate::crypto::SignerKey;
use crate::error::ChainError;
use crate::intent::Amount;

/// Version byte of every Tron account address
const ADDRESS_PREFIX: u8 = 0x41;

// ============================================================================
// ADDRESSES
// ============================================================================

/// Tron address: the 20 account bytes behind the `0x41` prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TronAddress(pub H160);

impl TronAddress {
    /// Parses a base58check address (`T...`) or its 21-byte hex form (`41...`).
    pub fn parse(value: &str) -> Result<Self, ChainError> {
        let trimmed = value.trim();
        let bytes = if trimmed.len() == 42 && trimmed.starts_with("41") {
            hex::decode(trimmed).map_err(|e| ChainError::invalid_address(value, e.to_string()))?
        } else {
            bs58::decode(trimmed)
                .with_check(None)
                .into_vec()
                .map_err(|e| ChainError::invalid_address(value, e.to_string()))?
        };

        if bytes.len() != 21 {
            return Err(ChainError::invalid_address(value, "expected 21 address bytes"));
        }
        if bytes[0] != ADDRESS_PREFIX {
            return Err(ChainError::invalid_address(value, "missing 0x41 prefix"));
        }
        Ok(Self(H160::from_slice(&bytes[1..])))
    }

    fn prefixed(&self) -> [u8; 21] {
        let mut out = [0u8; 21];
        out[0] = ADDRESS_PREFIX;
        out[1..].copy_from_slice(self.0.as_bytes());
        out
    }

    pub fn to_base58(&self) -> String {
        bs58::encode(self.prefixed()).with_check().into_string()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.prefixed())
    }
}

impl fmt::Display for TronAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

// ============================================================================
// API TYPES
// ============================================================================

#[derive(Debug, Deserialize)]
struct Account {
    #[serde(default)]
    balance: u64,
}

#[derive(Debug, Deserialize)]
struct TriggerResult {
    #[serde(default)]
    result: bool,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TriggerResponse {
    result: TriggerResult,
    #[serde(default)]
    transaction: Option<Value>,
    #[serde(default)]
    constant_result: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct BroadcastResponse {
    #[serde(default)]
    result: bool,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TxInfoReceipt {
    #[serde(default)]
    result: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TxInfoLog {
    address: String,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionInfo {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    block_number: u64,
    /// Milliseconds
    #[serde(default)]
    block_time_stamp: u64,
    #[serde(default)]
    fee: u64,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    receipt: TxInfoReceipt,
    #[serde(default)]
    log: Vec<TxInfoLog>,
}

#[derive(Debug, Deserialize)]
struct BlockRaw {
    #[serde(default)]
    number: u64,
    /// Milliseconds
    timestamp: u64,
}

#[derive(Debug, Deserialize)]
struct BlockHeader {
    raw_data: BlockRaw,
}

#[derive(Debug, Deserialize)]
struct NowBlock {
    block_header: BlockHeader,
}

/// Tron node messages are usually hex-encoded UTF-8.
fn decode_message(message: Option<&str>) -> String {
    match message {
        Some(msg) => hex::decode(msg)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .unwrap_or_else(|| msg.to_string()),
        None => String::new(),
    }
}

/// Maps a broadcast return code to a chain error.
fn broadcast_error(code: &str, message: String) -> ChainError {
    match code {
        "SIGERROR" => ChainError::Signing(message),
        "SERVER_BUSY"
        | "TRANSACTION_EXPIRATION_ERROR"
        | "TAPOS_ERROR"
        | "NOT_ENOUGH_EFFECTIVE_CONNECTION"
        | "NO_CONNECTION" => ChainError::Transport(format!("{}: {}", code, message)),
        _ => ChainError::Reverted(format!("{}: {}", code, message)),
    }
}

// ============================================================================
// CONNECTOR
// ============================================================================

/// Connector for a Tron chain
pub struct TronConnector {
    client: Client,
    base_url: String,
    name: String,
    chain_id: u64,
    signer: SignerKey,
    address: TronAddress,
    /// Maximum sun burned by one contract call
    fee_limit: u64,
    receipt_poll_interval: Duration,
}

impl TronConnector {
    /// Creates a new Tron connector
    ///
    /// # Arguments
    ///
    /// * `config` - Tron chain configuration
    /// * `service` - Service timing configuration
    /// * `private_key` - Hex-encoded signing key
    pub fn new(config: &TronChainConfig, service: &ServiceConfig, private_key: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .no_proxy() // Avoid macOS system-configuration issues in tests
            .build()
            .context("Failed to create HTTP client")?;
        let signer = SignerKey::from_hex(private_key)
            .with_context(|| format!("Invalid signing key for chain {}", config.name))?;
        let address = TronAddress(signer.address_bytes());

        Ok(Self {
            client,
            base_url: config.rpc_url.trim_end_matches('/').to_string(),
            name: config.name.clone(),
            chain_id: config.chain_id,
            signer,
            address,
            fee_limit: config.fee_limit,
            receipt_poll_interval: Duration::from_millis(service.receipt_poll_interval_ms),
        })
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: Value) -> Result<T, ChainError> {
        let url = format!("{}/wallet/{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChainError::Transport(format!("{} request failed: {}", path, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChainError::Transport(format!("{} returned HTTP {}", path, status)));
        }

        response
            .json()
            .await
            .map_err(|e| ChainError::MalformedResponse(format!("{} response: {}", path, e)))
    }

    async fn now_block(&self) -> Result<BlockRaw, ChainError> {
        let block: NowBlock = self.post("getnowblock", json!({})).await?;
        Ok(block.block_header.raw_data)
    }

    /// Signs a node-built transaction after checking its id against the raw data.
    fn sign_transaction(&self, mut transaction: Value) -> Result<Value, ChainError> {
        let tx_id = transaction
            .get("txID")
            .and_then(Value::as_str)
            .ok_or_else(|| ChainError::MalformedResponse("transaction without txID".into()))?
            .to_string();
        let raw_data_hex = transaction
            .get("raw_data_hex")
            .and_then(Value::as_str)
            .ok_or_else(|| ChainError::MalformedResponse("transaction without raw_data_hex".into()))?;

        let raw = decode_hex(raw_data_hex)?;
        let digest: [u8; 32] = Sha256::digest(&raw).into();
        if hex::encode(digest) != tx_id.to_lowercase() {
            return Err(ChainError::MalformedResponse(format!(
                "txID {} does not match sha256 of raw_data_hex",
                tx_id
            )));
        }

        let signature = self.signer.sign_prehash(&digest)?;
        transaction["signature"] = json!([hex::encode(signature.to_rsv_bytes())]);
        Ok(transaction)
    }

    async fn broadcast(&self, transaction: Value) -> Result<TxRef, ChainError> {
        let signed = self.sign_transaction(transaction)?;
        let tx_id = signed
            .get("txID")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let response: BroadcastResponse = self.post("broadcasttransaction", signed).await?;
        if !response.result {
            let code = response.code.unwrap_or_else(|| "UNKNOWN".to_string());
            let message = decode_message(response.message.as_deref());
            if code == "DUP_TRANSACTION_ERROR" {
                warn!("{}: tx {} was already broadcast", self.name, tx_id);
            } else {
                return Err(broadcast_error(&code, message));
            }
        }

        info!("{}: broadcast tx {}", self.name, tx_id);
        Ok(TxRef(tx_id))
    }

    fn trigger_body(&self, contract: &str, call: &ContractCall) -> Result<Value, ChainError> {
        let contract = TronAddress::parse(contract)?;
        Ok(json!({
            "owner_address": self.address.to_base58(),
            "contract_address": contract.to_base58(),
            "function_selector": call.signature,
            "parameter": hex::encode(call.encode_args()),
            "visible": true,
        }))
    }

    fn check_trigger(&self, method: &str, result: &TriggerResult) -> Result<(), ChainError> {
        if result.result {
            return Ok(());
        }
        let message = decode_message(result.message.as_deref());
        match result.code.as_deref() {
            Some("SERVER_BUSY") | Some("NO_CONNECTION") => {
                Err(ChainError::Transport(format!("{} failed: {}", method, message)))
            }
            code => Err(ChainError::Reverted(format!(
                "{} rejected ({}): {}",
                method,
                code.unwrap_or("no code"),
                message
            ))),
        }
    }

    fn build_receipt(&self, tx: &TxRef, info: TransactionInfo) -> Result<Receipt, ChainError> {
        let mut logs = Vec::with_capacity(info.log.len());
        for log in &info.log {
            let raw = decode_hex(&log.address)?;
            let address = match raw.len() {
                20 => H160::from_slice(&raw),
                21 if raw[0] == ADDRESS_PREFIX => H160::from_slice(&raw[1..]),
                _ => {
                    return Err(ChainError::MalformedResponse(format!(
                        "unexpected log address {}",
                        log.address
                    )))
                }
            };
            let mut topics = Vec::with_capacity(log.topics.len());
            for topic in &log.topics {
                topics.push(decode_bytes32(topic)?);
            }
            logs.push(LogEntry {
                address,
                topics,
                data: decode_hex(&log.data)?,
            });
        }

        let failed = info.result.as_deref() == Some("FAILED");
        let success = !failed && matches!(info.receipt.result.as_deref(), None | Some("SUCCESS"));

        Ok(Receipt {
            tx: tx.clone(),
            success,
            block_number: info.block_number,
            block_timestamp: info.block_time_stamp / 1000,
            fee_paid: Amount::from(info.fee),
            logs,
        })
    }
}

#[async_trait]
impl ChainConnector for TronConnector {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn address(&self) -> String {
        self.address.to_base58()
    }

    fn parse_address(&self, address: &str) -> Result<H160, ChainError> {
        TronAddress::parse(address).map(|a| a.0)
    }

    fn format_address(&self, address: &H160) -> String {
        TronAddress(*address).to_base58()
    }

    async fn chain_time(&self) -> Result<u64, ChainError> {
        Ok(self.now_block().await?.timestamp / 1000)
    }

    async fn get_balance(&self, address: Option<&str>) -> Result<Amount, ChainError> {
        let target = match address {
            Some(addr) => TronAddress::parse(addr)?,
            None => self.address,
        };
        let account: Account = self
            .post("getaccount", json!({ "address": target.to_base58(), "visible": true }))
            .await?;
        Ok(Amount::from(account.balance))
    }

    async fn get_token_balance(&self, token: &str, owner: &str) -> Result<Amount, ChainError> {
        let call = balance_of_call(TronAddress::parse(owner)?.0);
        let data = self.call_contract(token, &call).await?;
        decode_uint(&data)
    }

    async fn send_native(&self, to: &str, amount: Amount) -> Result<TxRef, ChainError> {
        let to = TronAddress::parse(to)?;
        if amount > Amount::from(i64::MAX as u64) {
            return Err(ChainError::Reverted(format!("TRX amount {} exceeds int64", amount)));
        }
        let transaction: Value = self
            .post(
                "createtransaction",
                json!({
                    "owner_address": self.address.to_base58(),
                    "to_address": to.to_base58(),
                    "amount": amount.as_u64(),
                    "visible": true,
                }),
            )
            .await?;
        if let Some(error) = transaction.get("Error").and_then(Value::as_str) {
            return Err(ChainError::Reverted(format!("createtransaction: {}", error)));
        }
        self.broadcast(transaction).await
    }

    async fn call_contract(&self, contract: &str, call: &ContractCall) -> Result<Vec<u8>, ChainError> {
        debug!("{}: constant call {} on {}", self.name, call.signature, contract);
        let body = self.trigger_body(contract, call)?;
        let response: TriggerResponse = self.post("triggerconstantcontract", body).await?;
        self.check_trigger(&call.signature, &response.result)?;

        let output = response.constant_result.first().ok_or_else(|| {
            ChainError::MalformedResponse(format!("{} returned no constant_result", call.signature))
        })?;
        decode_hex(output)
    }

    async fn send_contract(
        &self,
        contract: &str,
        call: &ContractCall,
        options: &CallOptions,
    ) -> Result<TxRef, ChainError> {
        if options.value > Amount::from(i64::MAX as u64) {
            return Err(ChainError::Reverted(format!("call value {} exceeds int64", options.value)));
        }
        let mut body = self.trigger_body(contract, call)?;
        body["fee_limit"] = json!(options.fee_limit.unwrap_or(self.fee_limit));
        body["call_value"] = json!(options.value.as_u64());

        debug!("{}: triggering {} on {}", self.name, call.signature, contract);
        let response: TriggerResponse = self.post("triggersmartcontract", body).await?;
        self.check_trigger(&call.signature, &response.result)?;

        let transaction = response.transaction.ok_or_else(|| {
            ChainError::MalformedResponse(format!("{} returned no transaction", call.signature))
        })?;
        self.broadcast(transaction).await
    }

    async fn wait_for_confirmation(
        &self,
        tx: &TxRef,
        confirmations: u64,
        timeout: Duration,
    ) -> Result<Receipt, ChainError> {
        let started = tokio::time::Instant::now();
        let required = confirmations.max(1);

        loop {
            match self
                .post::<TransactionInfo>("gettransactioninfobyid", json!({ "value": tx.as_str() }))
                .await
            {
                Ok(info) if info.id.is_some() => {
                    let head = if required > 1 {
                        self.now_block().await?.number
                    } else {
                        info.block_number
                    };
                    if head + 1 >= info.block_number + required {
                        let receipt = self.build_receipt(tx, info)?;
                        info!(
                            "{}: tx {} confirmed in block {} (success: {})",
                            self.name, tx, receipt.block_number, receipt.success
                        );
                        return Ok(receipt);
                    }
                }
                Ok(_) => {}
                Err(e) if e.is_retryable() => {
                    warn!("{}: info query for {} failed (will retry): {}", self.name, tx, e);
                }
                Err(e) => return Err(e),
            }

            if started.elapsed() >= timeout {
                return Err(ChainError::ConfirmationTimeout {
                    tx: tx.to_string(),
                    waited: started.elapsed(),
                });
            }
            tokio::time::sleep(self.receipt_poll_interval).await;
        }
    }
}
