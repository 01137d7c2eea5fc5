//! Order API Client
//!
//! HTTP client for the cross-chain order relayer (quotes, order placement,
//! order status, ready-to-accept-secret fills, secret submission).
//!
//! Status mapping:
//! - 2xx: parsed body
//! - 4xx (except 429): `SwapError::OrderRejected`, not retryable
//! - 429, 5xx, network failures: `SwapError::Transport`, retryable

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::config::OrderApiConfig;
use crate::crypto::Secret;
use crate::error::SwapError;
use crate::intent::{parse_amount, Amount};

// ============================================================================
// API STRUCTURES
// ============================================================================

/// Parameters of a quote request.
#[derive(Debug, Clone)]
pub struct QuoteRequest {
    pub src_chain_id: u64,
    pub dst_chain_id: u64,
    pub src_token_address: String,
    pub dst_token_address: String,
    pub amount: Amount,
    pub wallet_address: String,
}

/// Per-preset quote parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotePreset {
    /// Number of secrets (fill slots) the order must commit to
    pub secrets_count: usize,
    #[serde(default)]
    pub allow_partial_fills: bool,
}

/// Quote returned by the relayer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    #[serde(default)]
    pub quote_id: Option<String>,
    pub src_token_amount: String,
    pub dst_token_amount: String,
    #[serde(default)]
    pub presets: HashMap<String, QuotePreset>,
    #[serde(default)]
    pub recommended_preset: Option<String>,
}

impl Quote {
    /// Secrets count for `preset`.
    pub fn secrets_count(&self, preset: &str) -> Result<usize, SwapError> {
        self.presets
            .get(preset)
            .map(|p| p.secrets_count)
            .ok_or_else(|| SwapError::Validation(format!("quote has no '{}' preset", preset)))
    }

    /// Amount the destination side is expected to receive.
    pub fn dst_amount(&self) -> Result<Amount, SwapError> {
        parse_amount(&self.dst_token_amount)
    }
}

/// Order placement request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSubmission {
    pub quote_id: Option<String>,
    pub preset: String,
    pub src_chain_id: u64,
    pub dst_chain_id: u64,
    pub wallet_address: String,
    pub receiver: String,
    pub hash_lock: String,
    pub secret_hashes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacedOrder {
    pub order_hash: String,
}

/// Order status as reported by the relayer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatus {
    pub status: String,
}

impl OrderStatus {
    pub fn is_executed(&self) -> bool {
        self.status.eq_ignore_ascii_case("executed")
    }

    pub fn is_expired(&self) -> bool {
        self.status.eq_ignore_ascii_case("expired")
    }

    /// Cancelled, refunded or otherwise failed orders.
    pub fn is_failed(&self) -> bool {
        matches!(
            self.status.to_ascii_lowercase().as_str(),
            "cancelled" | "refunded" | "refunding" | "failed"
        )
    }
}

/// Fill whose escrows are deployed and final; it awaits the secret at `idx`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillEvent {
    /// Fill slot index, which is also the secret-hash index
    pub idx: usize,
    #[serde(default)]
    pub src_escrow_deploy_tx_hash: Option<String>,
    #[serde(default)]
    pub dst_escrow_deploy_tx_hash: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReadyFills {
    #[serde(default)]
    fills: Vec<FillEvent>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SecretSubmission<'a> {
    order_hash: &'a str,
    secret: String,
}

// ============================================================================
// TRAIT
// ============================================================================

/// Relayer operations used by the SDK-mediated swap variant.
#[async_trait]
pub trait OrderApi: Send + Sync {
    async fn get_quote(&self, request: &QuoteRequest) -> Result<Quote, SwapError>;

    async fn place_order(&self, order: &OrderSubmission) -> Result<PlacedOrder, SwapError>;

    async fn get_order_status(&self, order_hash: &str) -> Result<OrderStatus, SwapError>;

    async fn get_ready_to_accept_secret_fills(&self, order_hash: &str) -> Result<Vec<FillEvent>, SwapError>;

    async fn submit_secret(&self, order_hash: &str, secret: &Secret) -> Result<(), SwapError>;
}

// ============================================================================
// HTTP CLIENT
// ============================================================================

/// HTTP implementation of `OrderApi`
pub struct FusionOrderClient {
    client: Client,
    /// Base URL, e.g. "https://api.1inch.dev/fusion-plus"
    base_url: String,
    auth_key: Option<String>,
}

impl FusionOrderClient {
    /// Creates a new order API client
    ///
    /// # Arguments
    ///
    /// * `base_url` - Relayer base URL
    /// * `auth_key` - Optional bearer token
    /// * `timeout` - Per-request timeout
    pub fn new(base_url: impl Into<String>, auth_key: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .no_proxy() // Avoid macOS system-configuration issues in tests
            .build()
            .context("Failed to create HTTP client")?;
        let base_url: String = base_url.into();

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_key,
        })
    }

    /// Creates a client from configuration, reading the bearer token from its env var.
    pub fn from_config(config: &OrderApiConfig) -> anyhow::Result<Self> {
        let auth_key = match &config.auth_key_env {
            Some(var) => Some(
                std::env::var(var).with_context(|| format!("{} env var is required for the order API", var))?,
            ),
            None => None,
        };
        Self::new(&config.base_url, auth_key, Duration::from_secs(config.timeout_secs))
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn send_checked(&self, label: &str, request: RequestBuilder) -> Result<Response, SwapError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| SwapError::Transport(format!("{} request failed: {}", label, e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        debug!("{} failed with HTTP {}: {}", label, status, body);
        if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
            Err(SwapError::OrderRejected {
                status: status.as_u16(),
                message: body,
            })
        } else {
            Err(SwapError::Transport(format!("{} returned HTTP {}: {}", label, status, body)))
        }
    }

    async fn send<T: DeserializeOwned>(&self, label: &str, request: RequestBuilder) -> Result<T, SwapError> {
        self.send_checked(label, request)
            .await?
            .json()
            .await
            .map_err(|e| SwapError::Transport(format!("{} returned malformed body: {}", label, e)))
    }
}

#[async_trait]
impl OrderApi for FusionOrderClient {
    async fn get_quote(&self, request: &QuoteRequest) -> Result<Quote, SwapError> {
        let query = [
            ("srcChain", request.src_chain_id.to_string()),
            ("dstChain", request.dst_chain_id.to_string()),
            ("srcTokenAddress", request.src_token_address.clone()),
            ("dstTokenAddress", request.dst_token_address.clone()),
            ("amount", request.amount.to_string()),
            ("walletAddress", request.wallet_address.clone()),
            ("enableEstimate", "true".to_string()),
        ];
        let builder = self.client.get(self.url("quoter/v1.0/quote/receive")).query(&query);
        self.send("GET quote", builder).await
    }

    async fn place_order(&self, order: &OrderSubmission) -> Result<PlacedOrder, SwapError> {
        let builder = self.client.post(self.url("relayer/v1.0/submit")).json(order);
        self.send("POST order", builder).await
    }

    async fn get_order_status(&self, order_hash: &str) -> Result<OrderStatus, SwapError> {
        let builder = self
            .client
            .get(self.url(&format!("orders/v1.0/order/status/{}", order_hash)));
        self.send("GET order status", builder).await
    }

    async fn get_ready_to_accept_secret_fills(&self, order_hash: &str) -> Result<Vec<FillEvent>, SwapError> {
        let builder = self.client.get(self.url(&format!(
            "orders/v1.0/order/ready-to-accept-secret-fills/{}",
            order_hash
        )));
        let ready: ReadyFills = self.send("GET ready fills", builder).await?;
        Ok(ready.fills)
    }

    async fn submit_secret(&self, order_hash: &str, secret: &Secret) -> Result<(), SwapError> {
        let body = SecretSubmission {
            order_hash,
            secret: secret.to_hex(),
        };
        let builder = self.client.post(self.url("relayer/v1.0/submit/secret")).json(&body);
        // the relayer answers with an empty body
        self.send_checked("POST secret", builder).await?;
        Ok(())
    }
}
