//! Configuration Management Module
//!
//! This module handles loading and validating configuration for the swap coordinator.
//! Configuration covers service timing, the two chains of the swap, the swap itself,
//! the optional order API and the optional deployed-address registry.

use anyhow::Context;
use ethereum_types::H160;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::chains::evm::parse_evm_address;
use crate::chains::TronAddress;
use crate::error::ChainError;
use crate::intent::{parse_amount, Amount, SwapIntent, TokenId};
use crate::registry::AddressRegistry;

/// Environment variable overriding the configuration path
pub const CONFIG_PATH_ENV: &str = "SWAP_COORDINATOR_CONFIG_PATH";

/// Default configuration path
pub const DEFAULT_CONFIG_PATH: &str = "config/swap-coordinator.toml";

// ============================================================================
// CONFIGURATION STRUCTURES
// ============================================================================

/// Main configuration structure containing all coordinator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Service configuration (polling, retries, confirmation waits)
    #[serde(default)]
    pub service: ServiceConfig,
    /// Chain the initiator locks funds on
    pub source_chain: ChainConfig,
    /// Chain the beneficiary is paid on
    pub destination_chain: ChainConfig,
    /// Swap parameters
    pub swap: SwapConfig,
    /// Order/relayer API (required for the sdk variant)
    #[serde(default)]
    pub order_api: Option<OrderApiConfig>,
    /// Deployed address registry
    #[serde(default)]
    pub registry: Option<RegistryConfig>,
}

/// Service-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Order status polling interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Hard cap on order status polls (the timelock deadline always applies)
    #[serde(default)]
    pub max_polls: Option<u32>,
    /// Attempts for retryable operations, including the first
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    /// Backoff base delay; attempt `n` waits `n * base`
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Blocks a transaction must be buried under
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,
    #[serde(default = "default_receipt_poll_interval_ms")]
    pub receipt_poll_interval_ms: u64,
    /// Minimum timelock, leaving room for cross-chain relay latency
    #[serde(default = "default_min_timelock_margin_secs")]
    pub min_timelock_margin_secs: u64,
    /// Allowed balance delta deviation, in smallest units
    #[serde(default = "default_consistency_tolerance")]
    pub consistency_tolerance: u64,
    /// Refund automatically once an unclaimed lock expires
    #[serde(default = "default_auto_refund")]
    pub auto_refund: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_polls: None,
            max_retry_attempts: default_max_retry_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            confirmations: default_confirmations(),
            confirmation_timeout_secs: default_confirmation_timeout_secs(),
            receipt_poll_interval_ms: default_receipt_poll_interval_ms(),
            min_timelock_margin_secs: default_min_timelock_margin_secs(),
            consistency_tolerance: default_consistency_tolerance(),
            auto_refund: default_auto_refund(),
        }
    }
}

impl ServiceConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }
}

fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_confirmations() -> u64 {
    1
}

fn default_confirmation_timeout_secs() -> u64 {
    300
}

fn default_receipt_poll_interval_ms() -> u64 {
    2000
}

fn default_min_timelock_margin_secs() -> u64 {
    600
}

fn default_consistency_tolerance() -> u64 {
    1
}

fn default_auto_refund() -> bool {
    true
}

fn default_tron_fee_limit() -> u64 {
    1_000_000_000
}

fn default_preset() -> String {
    "fast".to_string()
}

fn default_order_api_timeout_secs() -> u64 {
    30
}

/// Configuration for one chain of the swap.
/// Use the `type` field to specify which type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChainConfig {
    /// EVM chain configuration
    #[serde(rename = "evm")]
    Evm(EvmChainConfig),
    /// Tron chain configuration
    #[serde(rename = "tron")]
    Tron(TronChainConfig),
}

/// Configuration for an EVM-compatible chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvmChainConfig {
    /// Human-readable name for the chain
    pub name: String,
    /// RPC endpoint URL for EVM chain communication
    pub rpc_url: String,
    /// Chain ID (e.g., 11155111 for Sepolia)
    pub chain_id: u64,
    /// Environment variable name containing the private key
    pub private_key_env: String,
    /// HTLC escrow contract address
    #[serde(default)]
    pub escrow_contract_addr: Option<String>,
    /// Counterparty that claims the source lock
    #[serde(default)]
    pub counterparty_addr: Option<String>,
    /// Resolver contract address
    #[serde(default)]
    pub resolver_contract_addr: Option<String>,
    /// Registry key used when `escrow_contract_addr` is unset
    #[serde(default)]
    pub escrow_registry_key: Option<String>,
    /// Registry key used when `resolver_contract_addr` is unset
    #[serde(default)]
    pub resolver_registry_key: Option<String>,
    /// Compiled escrow artifact; the HTLCCreated signature is taken from its ABI
    #[serde(default)]
    pub escrow_artifact: Option<String>,
    /// Fixed gas limit; estimated per transaction when unset
    #[serde(default)]
    pub gas_limit: Option<u64>,
}

/// Configuration for a Tron chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TronChainConfig {
    /// Human-readable name for the chain
    pub name: String,
    /// Full-node HTTP API URL (e.g., "https://nile.trongrid.io")
    pub rpc_url: String,
    /// Chain ID (used for routing and logs)
    pub chain_id: u64,
    /// Environment variable name containing the private key
    pub private_key_env: String,
    #[serde(default)]
    pub escrow_contract_addr: Option<String>,
    #[serde(default)]
    pub counterparty_addr: Option<String>,
    #[serde(default)]
    pub resolver_contract_addr: Option<String>,
    #[serde(default)]
    pub escrow_registry_key: Option<String>,
    #[serde(default)]
    pub resolver_registry_key: Option<String>,
    #[serde(default)]
    pub escrow_artifact: Option<String>,
    /// Maximum sun burned per contract call
    #[serde(default = "default_tron_fee_limit")]
    pub fee_limit: u64,
}

impl ChainConfig {
    pub fn name(&self) -> &str {
        match self {
            ChainConfig::Evm(cfg) => &cfg.name,
            ChainConfig::Tron(cfg) => &cfg.name,
        }
    }

    pub fn chain_id(&self) -> u64 {
        match self {
            ChainConfig::Evm(cfg) => cfg.chain_id,
            ChainConfig::Tron(cfg) => cfg.chain_id,
        }
    }

    /// Get the chain type as a string
    pub fn chain_type(&self) -> &'static str {
        match self {
            ChainConfig::Evm(_) => "evm",
            ChainConfig::Tron(_) => "tron",
        }
    }

    pub fn rpc_url(&self) -> &str {
        match self {
            ChainConfig::Evm(cfg) => &cfg.rpc_url,
            ChainConfig::Tron(cfg) => &cfg.rpc_url,
        }
    }

    pub fn private_key_env(&self) -> &str {
        match self {
            ChainConfig::Evm(cfg) => &cfg.private_key_env,
            ChainConfig::Tron(cfg) => &cfg.private_key_env,
        }
    }

    pub fn escrow_contract_addr(&self) -> Option<&str> {
        match self {
            ChainConfig::Evm(cfg) => cfg.escrow_contract_addr.as_deref(),
            ChainConfig::Tron(cfg) => cfg.escrow_contract_addr.as_deref(),
        }
    }

    pub fn counterparty_addr(&self) -> Option<&str> {
        match self {
            ChainConfig::Evm(cfg) => cfg.counterparty_addr.as_deref(),
            ChainConfig::Tron(cfg) => cfg.counterparty_addr.as_deref(),
        }
    }

    pub fn resolver_contract_addr(&self) -> Option<&str> {
        match self {
            ChainConfig::Evm(cfg) => cfg.resolver_contract_addr.as_deref(),
            ChainConfig::Tron(cfg) => cfg.resolver_contract_addr.as_deref(),
        }
    }

    pub fn escrow_artifact(&self) -> Option<&str> {
        match self {
            ChainConfig::Evm(cfg) => cfg.escrow_artifact.as_deref(),
            ChainConfig::Tron(cfg) => cfg.escrow_artifact.as_deref(),
        }
    }

    /// Parses an address in this chain's format.
    pub fn parse_address(&self, address: &str) -> Result<H160, ChainError> {
        match self {
            ChainConfig::Evm(_) => parse_evm_address(address),
            ChainConfig::Tron(_) => TronAddress::parse(address).map(|a| a.0),
        }
    }

    fn validate_token(&self, token: &str) -> Result<(), ChainError> {
        match TokenId::parse(token) {
            TokenId::Native => Ok(()),
            TokenId::Contract(addr) => self.parse_address(&addr).map(|_| ()),
        }
    }

    /// Fills unset contract addresses from the registry by key.
    fn resolve_from_registry(&mut self, registry: &AddressRegistry) {
        let (escrow, escrow_key, resolver, resolver_key) = match self {
            ChainConfig::Evm(cfg) => (
                &mut cfg.escrow_contract_addr,
                &cfg.escrow_registry_key,
                &mut cfg.resolver_contract_addr,
                &cfg.resolver_registry_key,
            ),
            ChainConfig::Tron(cfg) => (
                &mut cfg.escrow_contract_addr,
                &cfg.escrow_registry_key,
                &mut cfg.resolver_contract_addr,
                &cfg.resolver_registry_key,
            ),
        };
        if escrow.is_none() {
            if let Some(addr) = escrow_key.as_deref().and_then(|k| registry.address(k)) {
                *escrow = Some(addr.to_string());
            }
        }
        if resolver.is_none() {
            if let Some(addr) = resolver_key.as_deref().and_then(|k| registry.address(k)) {
                *resolver = Some(addr.to_string());
            }
        }
    }

    fn validate(&self, role: &str) -> anyhow::Result<()> {
        let url = self.rpc_url();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            anyhow::bail!(
                "Configuration error: {} chain rpc_url '{}' must start with http:// or https://",
                role,
                url
            );
        }
        if self.private_key_env().trim().is_empty() {
            anyhow::bail!("Configuration error: {} chain private_key_env is empty", role);
        }
        for (field, value) in [
            ("escrow_contract_addr", self.escrow_contract_addr()),
            ("counterparty_addr", self.counterparty_addr()),
            ("resolver_contract_addr", self.resolver_contract_addr()),
        ] {
            if let Some(addr) = value {
                self.parse_address(addr).map_err(|e| {
                    anyhow::anyhow!("Configuration error: {} chain {}: {}", role, field, e)
                })?;
            }
        }
        Ok(())
    }
}

/// Which settlement path a swap takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwapVariant {
    /// Lock on the source escrow, claim through the destination resolver
    Direct,
    /// Place an order with the relayer API and feed secrets to its fills
    Sdk,
}

/// Swap parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapConfig {
    pub variant: SwapVariant,
    /// "native" or a token contract address on the source chain
    pub source_token: String,
    /// "native" or a token contract address on the destination chain
    pub destination_token: String,
    /// Amount in smallest units (decimal string)
    pub amount: String,
    /// Beneficiary address on the destination chain
    pub beneficiary: String,
    /// Timelock duration in seconds from lock time
    pub timelock_secs: u64,
    /// Relayer quote preset (sdk variant)
    #[serde(default = "default_preset")]
    pub preset: String,
    /// Native amount sent to the resolver contract before claiming
    #[serde(default)]
    pub resolver_funding: Option<String>,
}

/// Order/relayer API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderApiConfig {
    /// Base URL, e.g. "https://api.1inch.dev/fusion-plus"
    pub base_url: String,
    /// Environment variable holding the API bearer token
    #[serde(default)]
    pub auth_key_env: Option<String>,
    #[serde(default = "default_order_api_timeout_secs")]
    pub timeout_secs: u64,
}

/// Deployed address registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub path: String,
}

impl CoordinatorConfig {
    /// Loads configuration from a TOML file.
    ///
    /// This function:
    /// 1. Uses the provided path, SWAP_COORDINATOR_CONFIG_PATH, or config/swap-coordinator.toml
    /// 2. Parses the configuration
    /// 3. Fills missing contract addresses from the registry, if one is configured
    /// 4. Validates the configuration
    ///
    /// # Arguments
    ///
    /// * `path` - Optional path to config file
    ///
    /// # Returns
    ///
    /// * `Ok(CoordinatorConfig)` - Successfully loaded and validated configuration
    /// * `Err(anyhow::Error)` - Missing file, parse failure, or validation failure
    pub fn load_from_path(path: Option<&str>) -> anyhow::Result<Self> {
        let config_path = path
            .map(|p| p.to_string())
            .or_else(|| std::env::var(CONFIG_PATH_ENV).ok())
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

        if !std::path::Path::new(&config_path).exists() {
            return Err(anyhow::anyhow!(
                "Configuration file '{}' not found. Please copy the template:\n\
                cp config/swap-coordinator.template.toml config/swap-coordinator.toml\n\
                Then edit config/swap-coordinator.toml with your actual values.",
                config_path
            ));
        }

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path))?;
        let mut config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path))?;

        if let Some(registry) = &config.registry {
            let registry = AddressRegistry::load(&registry.path)?;
            config.apply_registry(&registry);
        }

        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from the default location.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from_path(None)
    }

    /// Parses configuration text without validating it.
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        toml::from_str(content).context("Invalid configuration TOML")
    }

    /// Fills unset contract addresses on both chains from the registry.
    pub fn apply_registry(&mut self, registry: &AddressRegistry) {
        self.source_chain.resolve_from_registry(registry);
        self.destination_chain.resolve_from_registry(registry);
    }

    /// Validates the configuration for consistency and correctness.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Configuration is valid
    /// * `Err(anyhow::Error)` - Validation failed with error message
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.source_chain.chain_id() == self.destination_chain.chain_id() {
            anyhow::bail!(
                "Configuration error: source and destination chains have the same chain ID ({})",
                self.source_chain.chain_id()
            );
        }
        self.source_chain.validate("source")?;
        self.destination_chain.validate("destination")?;

        if self.service.poll_interval_ms == 0 {
            anyhow::bail!("Configuration error: service.poll_interval_ms must be positive");
        }
        if self.service.max_retry_attempts == 0 {
            anyhow::bail!("Configuration error: service.max_retry_attempts must be positive");
        }
        if self.service.max_polls == Some(0) {
            anyhow::bail!("Configuration error: service.max_polls must be positive when set");
        }

        let amount = parse_amount(&self.swap.amount)
            .map_err(|e| anyhow::anyhow!("Configuration error: swap.amount: {}", e))?;
        if amount.is_zero() {
            anyhow::bail!("Configuration error: swap.amount must be positive");
        }
        if let Some(funding) = &self.swap.resolver_funding {
            parse_amount(funding)
                .map_err(|e| anyhow::anyhow!("Configuration error: swap.resolver_funding: {}", e))?;
        }
        if self.swap.timelock_secs < self.service.min_timelock_margin_secs {
            anyhow::bail!(
                "Configuration error: swap.timelock_secs ({}) is shorter than the minimum margin ({}s)",
                self.swap.timelock_secs,
                self.service.min_timelock_margin_secs
            );
        }

        self.source_chain
            .validate_token(&self.swap.source_token)
            .map_err(|e| anyhow::anyhow!("Configuration error: swap.source_token: {}", e))?;
        self.destination_chain
            .validate_token(&self.swap.destination_token)
            .map_err(|e| anyhow::anyhow!("Configuration error: swap.destination_token: {}", e))?;
        self.destination_chain
            .parse_address(&self.swap.beneficiary)
            .map_err(|e| anyhow::anyhow!("Configuration error: swap.beneficiary: {}", e))?;

        match self.swap.variant {
            SwapVariant::Direct => {
                if self.source_chain.escrow_contract_addr().is_none() {
                    anyhow::bail!(
                        "Configuration error: direct swaps need source_chain.escrow_contract_addr (or a registry key)"
                    );
                }
                if self.source_chain.counterparty_addr().is_none() {
                    anyhow::bail!("Configuration error: direct swaps need source_chain.counterparty_addr");
                }
                if self.destination_chain.resolver_contract_addr().is_none() {
                    anyhow::bail!(
                        "Configuration error: direct swaps need destination_chain.resolver_contract_addr (or a registry key)"
                    );
                }
            }
            SwapVariant::Sdk => {
                let api = self.order_api.as_ref().ok_or_else(|| {
                    anyhow::anyhow!("Configuration error: sdk swaps need an [order_api] section")
                })?;
                if !(api.base_url.starts_with("http://") || api.base_url.starts_with("https://")) {
                    anyhow::bail!(
                        "Configuration error: order_api.base_url '{}' must start with http:// or https://",
                        api.base_url
                    );
                }
            }
        }

        Ok(())
    }

    /// Builds the swap intent, optionally overriding amount and beneficiary.
    pub fn swap_intent(
        &self,
        amount: Option<&str>,
        beneficiary: Option<&str>,
    ) -> anyhow::Result<SwapIntent> {
        let amount: Amount = parse_amount(amount.unwrap_or(&self.swap.amount))?;
        let beneficiary = beneficiary.unwrap_or(&self.swap.beneficiary);
        self.destination_chain
            .parse_address(beneficiary)
            .context("Invalid beneficiary address")?;

        let intent = SwapIntent::new(
            self.source_chain.chain_id(),
            self.destination_chain.chain_id(),
            TokenId::parse(&self.swap.source_token),
            TokenId::parse(&self.swap.destination_token),
            amount,
            beneficiary,
            self.swap.timelock_secs,
        )?;
        Ok(intent)
    }

    /// Resolver funding amount, if configured.
    pub fn resolver_funding(&self) -> anyhow::Result<Option<Amount>> {
        match &self.swap.resolver_funding {
            Some(value) => Ok(Some(parse_amount(value)?)),
            None => Ok(None),
        }
    }
}
