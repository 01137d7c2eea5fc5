//! Chain Connectors Module
//!
//! This module provides the `ChainConnector` abstraction used by the swap services
//! and its two implementations: EVM chains over JSON-RPC and Tron over the
//! full-node HTTP API.

pub mod abi;
pub mod evm;
pub mod tron;

use async_trait::async_trait;
use ethereum_types::{H160, U256};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ChainConfig, ServiceConfig};
use crate::error::ChainError;
use crate::intent::Amount;

// Re-export for convenience
pub use abi::{AbiValue, ContractArtifact, ContractCall, EventSignature};
pub use evm::EvmConnector;
pub use tron::{TronAddress, TronConnector};

/// Reference to a submitted transaction (hash as the chain reports it).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TxRef(pub String);

impl TxRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TxRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Log emitted during a transaction. Addresses are the raw 20 bytes on both chain types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub address: H160,
    pub topics: Vec<[u8; 32]>,
    pub data: Vec<u8>,
}

/// Outcome of a confirmed transaction.
#[derive(Debug, Clone)]
pub struct Receipt {
    pub tx: TxRef,
    pub success: bool,
    pub block_number: u64,
    /// Unix seconds of the including block
    pub block_timestamp: u64,
    /// Native units paid by the sender (gas or energy/bandwidth burn)
    pub fee_paid: Amount,
    pub logs: Vec<LogEntry>,
}

/// Value and fee budget attached to a state-changing call.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub value: Amount,
    /// Overrides the connector's configured fee budget
    pub fee_limit: Option<u64>,
}

impl CallOptions {
    pub fn with_value(value: Amount) -> Self {
        Self {
            value,
            fee_limit: None,
        }
    }
}

/// One chain's RPC client and signing key.
///
/// Every state-changing method returns as soon as the transaction is accepted by
/// the node; confirmation is always a separate `wait_for_confirmation` step.
#[async_trait]
pub trait ChainConnector: Send + Sync {
    fn chain_id(&self) -> u64;

    /// Human-readable chain name for logs.
    fn name(&self) -> &str;

    /// Signer address in the chain's display format.
    fn address(&self) -> String;

    /// Parses an address in the chain's display format into its 20 raw bytes.
    fn parse_address(&self, address: &str) -> Result<H160, ChainError>;

    /// Formats raw address bytes in the chain's display format.
    fn format_address(&self, address: &H160) -> String;

    /// Timestamp of the latest block.
    async fn chain_time(&self) -> Result<u64, ChainError>;

    /// Native balance of `address`, or of the signer when `None`.
    async fn get_balance(&self, address: Option<&str>) -> Result<Amount, ChainError>;

    /// `balanceOf(owner)` on a token contract.
    async fn get_token_balance(&self, token: &str, owner: &str) -> Result<Amount, ChainError>;

    async fn send_native(&self, to: &str, amount: Amount) -> Result<TxRef, ChainError>;

    /// Read-only call; returns the raw ABI-encoded return data.
    async fn call_contract(&self, contract: &str, call: &ContractCall) -> Result<Vec<u8>, ChainError>;

    async fn send_contract(
        &self,
        contract: &str,
        call: &ContractCall,
        options: &CallOptions,
    ) -> Result<TxRef, ChainError>;

    /// Waits for the transaction to be included and `confirmations` blocks deep.
    ///
    /// A reverted transaction still yields a `Receipt` with `success == false`.
    async fn wait_for_confirmation(
        &self,
        tx: &TxRef,
        confirmations: u64,
        timeout: Duration,
    ) -> Result<Receipt, ChainError>;
}

/// Reads `allowance(owner, spender)` on a token contract.
pub async fn token_allowance(
    connector: &dyn ChainConnector,
    token: &str,
    owner: &str,
    spender: &str,
) -> Result<Amount, ChainError> {
    let call = ContractCall::new(
        "allowance(address,address)",
        vec![
            AbiValue::Address(connector.parse_address(owner)?),
            AbiValue::Address(connector.parse_address(spender)?),
        ],
    );
    let data = connector.call_contract(token, &call).await?;
    abi::decode_uint(&data)
}

pub(crate) fn balance_of_call(owner: H160) -> ContractCall {
    ContractCall::new("balanceOf(address)", vec![AbiValue::Address(owner)])
}

/// Creates the connector for a configured chain.
///
/// The signing key is read from the environment variable named in the chain config.
///
/// Submissions are serialized per connector, not per key. Every swap signing
/// with one key must share the single connector returned here; a second
/// `connect()` for the same key gets its own nonce lock and can race the first.
pub fn connect(chain: &ChainConfig, service: &ServiceConfig) -> anyhow::Result<Arc<dyn ChainConnector>> {
    use anyhow::Context;

    let key_env = chain.private_key_env();
    let private_key = std::env::var(key_env)
        .with_context(|| format!("{} env var is required for chain {}", key_env, chain.name()))?;

    let connector: Arc<dyn ChainConnector> = match chain {
        ChainConfig::Evm(cfg) => Arc::new(EvmConnector::new(cfg, service, &private_key)?),
        ChainConfig::Tron(cfg) => Arc::new(TronConnector::new(cfg, service, &private_key)?),
    };
    Ok(connector)
}

pub(crate) fn u256_to_u64(value: U256, what: &str) -> Result<u64, ChainError> {
    if value > U256::from(u64::MAX) {
        return Err(ChainError::MalformedResponse(format!("{} {} exceeds u64", what, value)));
    }
    Ok(value.as_u64())
}
