//! EVM Chain Connector
//!
//! JSON-RPC client for EVM chains. Transactions are legacy EIP-155 transactions,
//! RLP encoded and signed locally with the configured secp256k1 key.

use anyhow::Context;
use async_trait::async_trait;
use ethereum_types::{H160, U256};
use reqwest::Client;
use rlp::RlpStream;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::abi::{decode_hex, keccak256, parse_quantity};
use super::{
    balance_of_call, u256_to_u64, CallOptions, ChainConnector, ContractCall, LogEntry, Receipt,
    TxRef,
};
use crate::config::{EvmChainConfig, ServiceConfig};
use crate::crypto::SignerKey;
use crate::error::ChainError;
use crate::intent::Amount;

/// JSON-RPC error code nodes use for `execution reverted`
const EXECUTION_REVERTED_CODE: i64 = 3;

/// EVM JSON-RPC request wrapper
#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: Vec<Value>,
    id: u64,
}

/// EVM JSON-RPC response wrapper
#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    #[allow(dead_code)]
    jsonrpc: String,
    result: Option<T>,
    error: Option<JsonRpcError>,
    #[allow(dead_code)]
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    block_number: String,
    /// "0x1" on success, "0x0" on revert
    status: Option<String>,
    gas_used: String,
    effective_gas_price: Option<String>,
    #[serde(default)]
    logs: Vec<RpcLog>,
}

#[derive(Debug, Deserialize)]
struct RpcLog {
    address: String,
    topics: Vec<String>,
    data: String,
}

#[derive(Debug, Deserialize)]
struct RpcBlock {
    timestamp: String,
}

// ============================================================================
// TRANSACTION ENCODING
// ============================================================================

/// Legacy (type 0) transaction.
#[derive(Debug, Clone)]
pub struct LegacyTransaction {
    pub nonce: U256,
    pub gas_price: U256,
    pub gas_limit: U256,
    pub to: H160,
    pub value: U256,
    pub data: Vec<u8>,
}

impl LegacyTransaction {
    fn append_body(&self, stream: &mut RlpStream) {
        stream.append(&self.nonce);
        stream.append(&self.gas_price);
        stream.append(&self.gas_limit);
        stream.append(&self.to);
        stream.append(&self.value);
        stream.append(&self.data);
    }

    /// keccak256 of rlp([nonce, gasPrice, gas, to, value, data, chainId, 0, 0]).
    pub fn signing_hash(&self, chain_id: u64) -> [u8; 32] {
        let mut stream = RlpStream::new_list(9);
        self.append_body(&mut stream);
        stream.append(&chain_id);
        stream.append(&0u8);
        stream.append(&0u8);
        keccak256(&stream.out())
    }

    /// Signed raw transaction bytes, ready for `eth_sendRawTransaction`.
    pub fn sign(&self, chain_id: u64, key: &SignerKey) -> Result<Vec<u8>, ChainError> {
        let signature = key.sign_prehash(&self.signing_hash(chain_id))?;
        let v = u64::from(signature.recid) + 35 + 2 * chain_id;

        let mut stream = RlpStream::new_list(9);
        self.append_body(&mut stream);
        stream.append(&v);
        stream.append(&U256::from_big_endian(&signature.r));
        stream.append(&U256::from_big_endian(&signature.s));
        Ok(stream.out().to_vec())
    }
}

// ============================================================================
// CONNECTOR
// ============================================================================

/// Connector for an EVM chain
pub struct EvmConnector {
    /// HTTP client for JSON-RPC calls
    client: Client,
    rpc_url: String,
    name: String,
    chain_id: u64,
    signer: SignerKey,
    address: H160,
    /// Fixed gas limit; estimated per transaction when unset
    gas_limit: Option<u64>,
    receipt_poll_interval: Duration,
    /// Serializes nonce read through broadcast for this signing key
    submit_lock: Mutex<()>,
    next_request_id: AtomicU64,
}

impl EvmConnector {
    /// Creates a new EVM connector
    ///
    /// # Arguments
    ///
    /// * `config` - EVM chain configuration
    /// * `service` - Service timing configuration
    /// * `private_key` - Hex-encoded signing key
    ///
    /// # Returns
    ///
    /// * `Ok(EvmConnector)` - Successfully created connector
    /// * `Err(anyhow::Error)` - Invalid key or HTTP client failure
    pub fn new(config: &EvmChainConfig, service: &ServiceConfig, private_key: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .no_proxy() // Avoid macOS system-configuration issues in tests
            .build()
            .context("Failed to create HTTP client")?;
        let signer = SignerKey::from_hex(private_key)
            .with_context(|| format!("Invalid signing key for chain {}", config.name))?;
        let address = signer.address_bytes();

        Ok(Self {
            client,
            rpc_url: config.rpc_url.clone(),
            name: config.name.clone(),
            chain_id: config.chain_id,
            signer,
            address,
            gas_limit: config.gas_limit,
            receipt_poll_interval: Duration::from_millis(service.receipt_poll_interval_ms),
            submit_lock: Mutex::new(()),
            next_request_id: AtomicU64::new(1),
        })
    }

    async fn rpc_optional<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<Option<T>, ChainError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
            id: self.next_request_id.fetch_add(1, Ordering::Relaxed),
        };

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ChainError::Transport(format!("{} request failed: {}", method, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChainError::Transport(format!("{} returned HTTP {}", method, status)));
        }

        let body: JsonRpcResponse<T> = response
            .json()
            .await
            .map_err(|e| ChainError::MalformedResponse(format!("{} response: {}", method, e)))?;

        if let Some(error) = body.error {
            let detail = match error.data {
                Some(Value::String(data)) => format!("{} ({})", error.message, data),
                _ => error.message,
            };
            return Err(if error.code == EXECUTION_REVERTED_CODE {
                ChainError::Reverted(detail)
            } else {
                ChainError::Transport(format!("{} failed: {} ({})", method, detail, error.code))
            });
        }

        Ok(body.result)
    }

    async fn rpc<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T, ChainError> {
        self.rpc_optional(method, params)
            .await?
            .ok_or_else(|| ChainError::MalformedResponse(format!("{} returned no result", method)))
    }

    async fn rpc_quantity(&self, method: &str, params: Vec<Value>) -> Result<U256, ChainError> {
        let value: String = self.rpc(method, params).await?;
        parse_quantity(&value)
    }

    fn hex_address(address: &H160) -> String {
        format!("0x{}", hex::encode(address.as_bytes()))
    }

    async fn block_number(&self) -> Result<u64, ChainError> {
        let number = self.rpc_quantity("eth_blockNumber", vec![]).await?;
        u256_to_u64(number, "block number")
    }

    async fn block_timestamp(&self, block: Value) -> Result<u64, ChainError> {
        let block: RpcBlock = self.rpc("eth_getBlockByNumber", vec![block, json!(false)]).await?;
        u256_to_u64(parse_quantity(&block.timestamp)?, "block timestamp")
    }

    async fn send_transaction(
        &self,
        to: H160,
        value: Amount,
        data: Vec<u8>,
        fee_limit: Option<u64>,
    ) -> Result<TxRef, ChainError> {
        let _guard = self.submit_lock.lock().await;

        let from = Self::hex_address(&self.address);
        let nonce = self
            .rpc_quantity("eth_getTransactionCount", vec![json!(from), json!("pending")])
            .await?;
        let gas_price = self.rpc_quantity("eth_gasPrice", vec![]).await?;
        let gas_limit = match fee_limit.or(self.gas_limit) {
            Some(limit) => U256::from(limit),
            None => {
                let estimate = self
                    .rpc_quantity(
                        "eth_estimateGas",
                        vec![json!({
                            "from": from,
                            "to": Self::hex_address(&to),
                            "value": format!("0x{:x}", value),
                            "data": format!("0x{}", hex::encode(&data)),
                        })],
                    )
                    .await?;
                estimate + estimate / 5
            }
        };

        let tx = LegacyTransaction {
            nonce,
            gas_price,
            gas_limit,
            to,
            value,
            data,
        };
        let raw = tx.sign(self.chain_id, &self.signer)?;
        let hash: String = self
            .rpc("eth_sendRawTransaction", vec![json!(format!("0x{}", hex::encode(raw)))])
            .await?;

        info!(
            "{}: submitted tx {} (nonce {}, gas {}, to {})",
            self.name,
            hash,
            nonce,
            gas_limit,
            Self::hex_address(&to)
        );
        Ok(TxRef(hash))
    }

    async fn build_receipt(&self, tx: &TxRef, receipt: RpcReceipt) -> Result<Receipt, ChainError> {
        let block_number = u256_to_u64(parse_quantity(&receipt.block_number)?, "block number")?;
        let block_timestamp = self
            .block_timestamp(json!(format!("0x{:x}", block_number)))
            .await?;
        let gas_used = parse_quantity(&receipt.gas_used)?;
        let gas_price = match &receipt.effective_gas_price {
            Some(price) => parse_quantity(price)?,
            None => U256::zero(),
        };

        let mut logs = Vec::with_capacity(receipt.logs.len());
        for log in &receipt.logs {
            logs.push(parse_log(log)?);
        }

        Ok(Receipt {
            tx: tx.clone(),
            success: receipt.status.as_deref() == Some("0x1"),
            block_number,
            block_timestamp,
            fee_paid: gas_used.saturating_mul(gas_price),
            logs,
        })
    }
}

fn parse_log(log: &RpcLog) -> Result<LogEntry, ChainError> {
    let address = parse_evm_address(&log.address)?;
    let mut topics = Vec::with_capacity(log.topics.len());
    for topic in &log.topics {
        topics.push(super::abi::decode_bytes32(topic)?);
    }
    Ok(LogEntry {
        address,
        topics,
        data: decode_hex(&log.data)?,
    })
}

/// Parses a `0x`-prefixed 20-byte hex address.
pub fn parse_evm_address(address: &str) -> Result<H160, ChainError> {
    let stripped = address
        .trim()
        .strip_prefix("0x")
        .ok_or_else(|| ChainError::invalid_address(address, "missing 0x prefix"))?;
    if stripped.len() != 40 {
        return Err(ChainError::invalid_address(address, "expected 40 hex characters"));
    }
    let bytes = hex::decode(stripped).map_err(|e| ChainError::invalid_address(address, e.to_string()))?;
    Ok(H160::from_slice(&bytes))
}

#[async_trait]
impl ChainConnector for EvmConnector {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn address(&self) -> String {
        Self::hex_address(&self.address)
    }

    fn parse_address(&self, address: &str) -> Result<H160, ChainError> {
        parse_evm_address(address)
    }

    fn format_address(&self, address: &H160) -> String {
        Self::hex_address(address)
    }

    async fn chain_time(&self) -> Result<u64, ChainError> {
        self.block_timestamp(json!("latest")).await
    }

    async fn get_balance(&self, address: Option<&str>) -> Result<Amount, ChainError> {
        let target = match address {
            Some(addr) => Self::hex_address(&parse_evm_address(addr)?),
            None => Self::hex_address(&self.address),
        };
        self.rpc_quantity("eth_getBalance", vec![json!(target), json!("latest")])
            .await
    }

    async fn get_token_balance(&self, token: &str, owner: &str) -> Result<Amount, ChainError> {
        let call = balance_of_call(parse_evm_address(owner)?);
        let data = self.call_contract(token, &call).await?;
        super::abi::decode_uint(&data)
    }

    async fn send_native(&self, to: &str, amount: Amount) -> Result<TxRef, ChainError> {
        let to = parse_evm_address(to)?;
        self.send_transaction(to, amount, Vec::new(), None).await
    }

    async fn call_contract(&self, contract: &str, call: &ContractCall) -> Result<Vec<u8>, ChainError> {
        let to = parse_evm_address(contract)?;
        debug!("{}: eth_call {} on {}", self.name, call.signature, contract);
        let result: String = self
            .rpc(
                "eth_call",
                vec![
                    json!({
                        "from": Self::hex_address(&self.address),
                        "to": Self::hex_address(&to),
                        "data": format!("0x{}", hex::encode(call.calldata())),
                    }),
                    json!("latest"),
                ],
            )
            .await?;
        decode_hex(&result)
    }

    async fn send_contract(
        &self,
        contract: &str,
        call: &ContractCall,
        options: &CallOptions,
    ) -> Result<TxRef, ChainError> {
        let to = parse_evm_address(contract)?;
        debug!("{}: sending {} to {}", self.name, call.signature, contract);
        self.send_transaction(to, options.value, call.calldata(), options.fee_limit)
            .await
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
                .rpc_optional::<RpcReceipt>("eth_getTransactionReceipt", vec![json!(tx.as_str())])
                .await
            {
                Ok(Some(receipt)) => {
                    let included = u256_to_u64(parse_quantity(&receipt.block_number)?, "block number")?;
                    let head = if required > 1 {
                        self.block_number().await?
                    } else {
                        included
                    };
                    if head + 1 >= included + required {
                        let receipt = self.build_receipt(tx, receipt).await?;
                        info!(
                            "{}: tx {} confirmed in block {} (success: {})",
                            self.name, tx, receipt.block_number, receipt.success
                        );
                        return Ok(receipt);
                    }
                }
                Ok(None) => {}
                Err(e) if e.is_retryable() => {
                    warn!("{}: receipt query for {} failed (will retry): {}", self.name, tx, e);
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
