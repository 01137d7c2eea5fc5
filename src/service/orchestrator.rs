//! Swap Orchestrator
//!
//! Sequences one swap end to end and reports a structured `SwapOutcome`.
//!
//! Direct-resolver flow:
//! 1. **Snapshot**: read the source signer's and the beneficiary's balances
//! 2. **Secret**: generate the secret and its single-fill hashlock
//! 3. **Lock**: lock on the source escrow and extract the swap id
//! 4. **Claim**: reveal the secret to the destination resolver (only after step 3)
//! 5. **Refund**: if the claim fails, wait out the timelock and refund
//! 6. **Verify**: re-read balances and compare the deltas with the intent
//!
//! SDK-mediated flow: quote, secrets sized by the quote preset, order
//! placement, then the fill poller reveals one secret per ready fill.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::chains::{ChainConnector, ContractArtifact, TxRef};
use crate::config::{CoordinatorConfig, SwapVariant};
use crate::crypto::SecretMaterial;
use crate::error::{ErrorKind, SwapError};
use crate::intent::{Amount, SwapIntent, TokenId, NATIVE_TOKEN_SENTINEL};
use crate::order_client::{FusionOrderClient, OrderApi, OrderSubmission, PlacedOrder, Quote, QuoteRequest};
use crate::service::escrow::{EscrowLockManager, LockRecord, HTLC_CREATED_EVENT_NAME};
use crate::service::poller::{cancelled, FillPoller, PollReport, PollState, PollerSettings};
use crate::service::resolver::ResolverRelay;
use crate::service::retry::{retry_with_backoff, RetryPolicy};

/// Longest single sleep while waiting for a timelock to pass
const MAX_EXPIRY_WAIT: Duration = Duration::from_secs(60);

// ============================================================================
// STATE AND RESULT TYPES
// ============================================================================

/// Orchestrator-level swap state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapState {
    Created,
    SecretGenerated,
    Locked,
    /// SDK variant: order accepted by the relayer
    OrderPlaced,
    ClaimSubmitted,
    Claimed,
    TimelockExpired,
    Refunded,
    Verified,
    Inconsistent,
    Failed,
}

/// Signed balance change over arbitrary-precision magnitudes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceDelta {
    negative: bool,
    magnitude: Amount,
}

impl BalanceDelta {
    pub fn zero() -> Self {
        Self::increase(Amount::zero())
    }

    pub fn increase(magnitude: Amount) -> Self {
        Self {
            negative: false,
            magnitude,
        }
    }

    pub fn decrease(magnitude: Amount) -> Self {
        Self {
            negative: !magnitude.is_zero(),
            magnitude,
        }
    }

    pub fn between(before: Amount, after: Amount) -> Self {
        if after >= before {
            Self::increase(after - before)
        } else {
            Self::decrease(before - after)
        }
    }

    pub fn is_negative(&self) -> bool {
        self.negative
    }

    pub fn magnitude(&self) -> Amount {
        self.magnitude
    }

    /// Adds a non-negative amount (e.g. fees paid back onto the observed delta).
    pub fn plus(self, amount: Amount) -> Self {
        if !self.negative {
            Self::increase(self.magnitude.saturating_add(amount))
        } else if amount >= self.magnitude {
            Self::increase(amount - self.magnitude)
        } else {
            Self::decrease(self.magnitude - amount)
        }
    }

    /// Absolute difference between two deltas.
    pub fn distance(&self, other: &BalanceDelta) -> Amount {
        if self.negative == other.negative {
            if self.magnitude >= other.magnitude {
                self.magnitude - other.magnitude
            } else {
                other.magnitude - self.magnitude
            }
        } else {
            self.magnitude.saturating_add(other.magnitude)
        }
    }
}

impl fmt::Display for BalanceDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.magnitude.is_zero() {
            f.write_str("0")
        } else if self.negative {
            write!(f, "-{}", self.magnitude)
        } else {
            write!(f, "+{}", self.magnitude)
        }
    }
}

impl Serialize for BalanceDelta {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Post-execution balance reconciliation
#[derive(Debug, Clone, Serialize)]
pub struct SwapResult {
    /// Source signer's delta, fees added back for native assets
    pub source_delta: BalanceDelta,
    /// Beneficiary's delta, signer costs added back when it is the destination signer
    pub destination_delta: BalanceDelta,
    pub expected_source_delta: BalanceDelta,
    pub expected_destination_delta: BalanceDelta,
    /// Both deltas within tolerance of the expectation
    pub success: bool,
    pub locked_at: Option<DateTime<Utc>>,
    pub claimed_at: Option<DateTime<Utc>>,
}

/// Structured result of `SwapOrchestrator::execute`
#[derive(Debug, Clone, Serialize)]
pub struct SwapOutcome {
    pub success: bool,
    pub state: SwapState,
    pub error_kind: Option<ErrorKind>,
    pub message: String,
    pub result: Option<SwapResult>,
    pub lock: Option<LockRecord>,
    pub order_hash: Option<String>,
    pub poll: Option<PollReport>,
}

/// Tunables shared by both swap variants
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub retry: RetryPolicy,
    pub auto_refund: bool,
    pub consistency_tolerance: Amount,
    pub poll_interval: Duration,
    pub max_polls: Option<u32>,
    /// Quote preset used by the SDK variant
    pub preset: String,
    /// Native amount sent to the resolver before claiming
    pub resolver_funding: Option<Amount>,
}

impl OrchestratorSettings {
    pub fn from_config(config: &CoordinatorConfig) -> anyhow::Result<Self> {
        Ok(Self {
            retry: RetryPolicy::from_service(&config.service),
            auto_refund: config.service.auto_refund,
            consistency_tolerance: Amount::from(config.service.consistency_tolerance),
            poll_interval: config.service.poll_interval(),
            max_polls: config.service.max_polls,
            preset: config.swap.preset.clone(),
            resolver_funding: config.resolver_funding()?,
        })
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::new(3, Duration::from_secs(1)),
            auto_refund: true,
            consistency_tolerance: Amount::one(),
            poll_interval: Duration::from_secs(5),
            max_polls: None,
            preset: "fast".to_string(),
            resolver_funding: None,
        }
    }
}

/// What has happened so far; turned into the outcome at the end.
struct Progress {
    state: SwapState,
    lock: Option<LockRecord>,
    order_hash: Option<String>,
    poll: Option<PollReport>,
    result: Option<SwapResult>,
}

impl Progress {
    fn new() -> Self {
        Self {
            state: SwapState::Created,
            lock: None,
            order_hash: None,
            poll: None,
            result: None,
        }
    }

    fn advance(&mut self, next: SwapState) {
        info!("Swap state: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn into_outcome(mut self, run: Result<(), SwapError>) -> SwapOutcome {
        let (success, error_kind, message) = match run {
            Ok(()) => (true, None, "swap completed and balances verified".to_string()),
            Err(e) => {
                if !matches!(
                    self.state,
                    SwapState::Refunded | SwapState::Inconsistent | SwapState::TimelockExpired
                ) {
                    self.state = SwapState::Failed;
                }
                error!("Swap ended in {:?}: {}", self.state, e);
                (false, Some(e.kind()), e.to_string())
            }
        };
        SwapOutcome {
            success,
            state: self.state,
            error_kind,
            message,
            result: self.result,
            lock: self.lock,
            order_hash: self.order_hash,
            poll: self.poll,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Snapshot {
    source: Amount,
    destination: Amount,
}

fn to_datetime(secs: u64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(i64::try_from(secs).ok()?, 0)
}

/// Native or token balance of `owner`.
async fn asset_balance(connector: &dyn ChainConnector, token: &TokenId, owner: &str) -> Result<Amount, SwapError> {
    let balance = match token.contract() {
        Some(addr) => connector.get_token_balance(addr, owner).await?,
        None => connector.get_balance(Some(owner)).await?,
    };
    Ok(balance)
}

/// Turns a transient failure after broadcast into a final `Unconfirmed` error.
fn unconfirmed(tx: &TxRef, err: SwapError) -> SwapError {
    if err.is_retryable() {
        warn!("Transaction {} still unconfirmed after retries: {}", tx, err);
        SwapError::Unconfirmed {
            tx: tx.to_string(),
            reason: err.to_string(),
        }
    } else {
        err
    }
}

fn same_address(connector: &dyn ChainConnector, a: &str, b: &str) -> bool {
    match (connector.parse_address(a), connector.parse_address(b)) {
        (Ok(x), Ok(y)) => x == y,
        _ => false,
    }
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

enum Route {
    Direct {
        escrow: EscrowLockManager,
        resolver: ResolverRelay,
        /// Source-chain beneficiary of the lock (the resolver's account there)
        counterparty: String,
    },
    Sdk {
        api: Arc<dyn OrderApi>,
    },
}

/// Runs swaps between one source and one destination chain.
pub struct SwapOrchestrator {
    source: Arc<dyn ChainConnector>,
    destination: Arc<dyn ChainConnector>,
    route: Route,
    settings: OrchestratorSettings,
}

impl SwapOrchestrator {
    /// Direct-resolver variant: lock on the source escrow, claim through the resolver.
    pub fn direct(
        escrow: EscrowLockManager,
        resolver: ResolverRelay,
        counterparty: impl Into<String>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            source: escrow.connector().clone(),
            destination: resolver.connector().clone(),
            route: Route::Direct {
                escrow,
                resolver,
                counterparty: counterparty.into(),
            },
            settings,
        }
    }

    /// SDK-mediated variant: the relayer's resolvers deploy escrows and fill the order.
    pub fn sdk(
        source: Arc<dyn ChainConnector>,
        destination: Arc<dyn ChainConnector>,
        api: Arc<dyn OrderApi>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            source,
            destination,
            route: Route::Sdk { api },
            settings,
        }
    }

    /// Builds the orchestrator for the configured variant.
    ///
    /// # Arguments
    ///
    /// * `config` - Validated coordinator configuration
    /// * `source` - Connector for `config.source_chain`
    /// * `destination` - Connector for `config.destination_chain`
    ///
    /// # Returns
    ///
    /// * `Ok(SwapOrchestrator)` - Ready to execute swaps
    /// * `Err(anyhow::Error)` - Missing addresses, unreadable artifact, or bad order API config
    pub fn from_config(
        config: &CoordinatorConfig,
        source: Arc<dyn ChainConnector>,
        destination: Arc<dyn ChainConnector>,
    ) -> anyhow::Result<Self> {
        use anyhow::Context;

        let settings = OrchestratorSettings::from_config(config)?;
        match config.swap.variant {
            SwapVariant::Direct => {
                let escrow_addr = config
                    .source_chain
                    .escrow_contract_addr()
                    .context("source_chain.escrow_contract_addr is required for direct swaps")?;
                let counterparty = config
                    .source_chain
                    .counterparty_addr()
                    .context("source_chain.counterparty_addr is required for direct swaps")?;
                let resolver_addr = config
                    .destination_chain
                    .resolver_contract_addr()
                    .context("destination_chain.resolver_contract_addr is required for direct swaps")?;

                let mut escrow = EscrowLockManager::new(source, escrow_addr, &config.service);
                if let Some(path) = config.source_chain.escrow_artifact() {
                    let artifact = ContractArtifact::load(path)
                        .with_context(|| format!("Failed to load escrow artifact {}", path))?;
                    escrow = escrow.with_created_event(artifact.event(HTLC_CREATED_EVENT_NAME)?);
                }
                let resolver = ResolverRelay::new(destination, resolver_addr, &config.service);
                Ok(Self::direct(escrow, resolver, counterparty, settings))
            }
            SwapVariant::Sdk => {
                let api_config = config
                    .order_api
                    .as_ref()
                    .context("[order_api] section is required for sdk swaps")?;
                let api = FusionOrderClient::from_config(api_config)?;
                Ok(Self::sdk(source, destination, Arc::new(api), settings))
            }
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Executes one swap. Never returns a raw error; failures are reported in the outcome.
    ///
    /// `cancel` stops the fill poller and the wait for timelock expiry. Submitted
    /// transactions are never withdrawn.
    pub async fn execute(&self, intent: &SwapIntent, cancel: watch::Receiver<bool>) -> SwapOutcome {
        let mut progress = Progress::new();
        let run = match &self.route {
            Route::Direct {
                escrow,
                resolver,
                counterparty,
            } => {
                self.run_direct(escrow, resolver, counterparty, intent, cancel, &mut progress)
                    .await
            }
            Route::Sdk { api } => self.run_sdk(api, intent, cancel, &mut progress).await,
        };
        progress.into_outcome(run)
    }

    fn check_chains(&self, intent: &SwapIntent) -> Result<(), SwapError> {
        if intent.source_chain_id() != self.source.chain_id()
            || intent.destination_chain_id() != self.destination.chain_id()
        {
            return Err(SwapError::Validation(format!(
                "intent routes {} -> {} but the orchestrator connects {} -> {}",
                intent.source_chain_id(),
                intent.destination_chain_id(),
                self.source.chain_id(),
                self.destination.chain_id()
            )));
        }
        Ok(())
    }

    async fn snapshot(&self, intent: &SwapIntent) -> Result<Snapshot, SwapError> {
        let source = self.source.as_ref();
        let destination = self.destination.as_ref();
        let signer = self.source.address();
        let signer = signer.as_str();

        let source_balance = retry_with_backoff(&self.settings.retry, "read source balance", move |_| {
            asset_balance(source, intent.source_token(), signer)
        })
        .await?;
        let destination_balance =
            retry_with_backoff(&self.settings.retry, "read destination balance", move |_| {
                asset_balance(destination, intent.destination_token(), intent.beneficiary())
            })
            .await?;

        Ok(Snapshot {
            source: source_balance,
            destination: destination_balance,
        })
    }

    /// Compares observed deltas against the expectation and records the result.
    ///
    /// `source_costs` and `destination_costs` are native amounts the tracked
    /// accounts spent on the swap itself (fees, resolver funding); they are added
    /// back before comparing.
    #[allow(clippy::too_many_arguments)]
    async fn verify(
        &self,
        intent: &SwapIntent,
        before: Snapshot,
        expected_source: BalanceDelta,
        expected_destination: BalanceDelta,
        source_costs: Amount,
        destination_costs: Amount,
        timestamps: (Option<DateTime<Utc>>, Option<DateTime<Utc>>),
        progress: &mut Progress,
    ) -> Result<(), SwapError> {
        let after = self.snapshot(intent).await?;

        let source_delta = BalanceDelta::between(before.source, after.source).plus(source_costs);
        let destination_delta =
            BalanceDelta::between(before.destination, after.destination).plus(destination_costs);

        let tolerance = self.settings.consistency_tolerance;
        let source_gap = source_delta.distance(&expected_source);
        let destination_gap = destination_delta.distance(&expected_destination);
        let success = source_gap <= tolerance && destination_gap <= tolerance;

        progress.result = Some(SwapResult {
            source_delta,
            destination_delta,
            expected_source_delta: expected_source,
            expected_destination_delta: expected_destination,
            success,
            locked_at: timestamps.0,
            claimed_at: timestamps.1,
        });

        if success {
            info!(
                "Balances consistent: source {} (expected {}), destination {} (expected {})",
                source_delta, expected_source, destination_delta, expected_destination
            );
            return Ok(());
        }

        warn!(
            "Balance mismatch: source {} (expected {}), destination {} (expected {})",
            source_delta, expected_source, destination_delta, expected_destination
        );
        progress.advance(SwapState::Inconsistent);
        Err(SwapError::SwapInconsistent(format!(
            "source delta {} expected {}, destination delta {} expected {} (tolerance {})",
            source_delta, expected_source, destination_delta, expected_destination, tolerance
        )))
    }

    /// Native costs the beneficiary paid when it is also the destination signer.
    fn destination_costs(&self, intent: &SwapIntent, costs: Amount) -> Amount {
        let beneficiary_signs = same_address(
            self.destination.as_ref(),
            intent.beneficiary(),
            &self.destination.address(),
        );
        if intent.destination_token().is_native() && beneficiary_signs {
            costs
        } else {
            Amount::zero()
        }
    }

    // ------------------------------------------------------------------------
    // Direct-resolver variant
    // ------------------------------------------------------------------------

    async fn run_direct(
        &self,
        escrow: &EscrowLockManager,
        resolver: &ResolverRelay,
        counterparty: &str,
        intent: &SwapIntent,
        cancel: watch::Receiver<bool>,
        progress: &mut Progress,
    ) -> Result<(), SwapError> {
        self.check_chains(intent)?;
        let policy = &self.settings.retry;
        let before = self.snapshot(intent).await?;

        let secrets = SecretMaterial::single();
        let descriptor = secrets.descriptor();
        let secret = secrets
            .secret(0)
            .ok_or_else(|| SwapError::Validation("secret material is empty".into()))?;
        progress.advance(SwapState::SecretGenerated);

        let pending = retry_with_backoff(policy, "submit lock", move |_| {
            escrow.submit_lock(intent, descriptor, counterparty)
        })
        .await?;
        let pending = &pending;
        let record = retry_with_backoff(policy, "confirm lock", move |_| escrow.confirm_lock(pending))
            .await
            .map_err(|e| unconfirmed(&pending.tx, e))?;
        info!(
            "Locked swap {} (deadline {}, tx {})",
            record.swap_id_hex(),
            record.timelock_deadline,
            record.lock_tx
        );
        progress.lock = Some(record.clone());
        progress.advance(SwapState::Locked);

        let mut funding_spent = Amount::zero();
        if let Some(amount) = self.settings.resolver_funding {
            let receipt = retry_with_backoff(policy, "fund resolver", move |_| resolver.fund(amount)).await?;
            funding_spent = amount.saturating_add(receipt.fee_paid);
        }

        progress.advance(SwapState::ClaimSubmitted);
        let source = self.source.as_ref();
        let locked = &record;
        let sent = retry_with_backoff(policy, "submit claim", move |_| async move {
            let now = source.chain_time().await?;
            if now > locked.timelock_deadline {
                return Err(SwapError::TimelockExpired {
                    swap_id: locked.swap_id_hex(),
                });
            }
            resolver
                .send_claim(locked, secret, intent.beneficiary(), intent.destination_token())
                .await
        })
        .await;
        let claim = match sent {
            Ok(tx) => {
                let claim_tx = &tx;
                let confirmed =
                    retry_with_backoff(policy, "confirm claim", move |_| resolver.confirm_claim(locked, claim_tx))
                        .await;
                match confirmed {
                    Err(e) if e.is_retryable() => {
                        // the claim may still land; refunding now would race it
                        let mut unsettled = record.clone();
                        unsettled.claim_tx = Some(tx.clone());
                        progress.lock = Some(unsettled);
                        return Err(unconfirmed(&tx, e));
                    }
                    other => other,
                }
            }
            Err(e) => Err(e),
        };

        let mut record = record;
        match claim {
            Ok(receipt) => {
                record.mark_claimed(&receipt)?;
                progress.lock = Some(record.clone());
                progress.advance(SwapState::Claimed);
            }
            Err(e) => {
                warn!("Claim for swap {} failed: {}", record.swap_id_hex(), e);
                if !self.settings.auto_refund {
                    return Err(e);
                }
                self.refund_path(escrow, &mut record, cancel, progress).await?;
                let costs = if intent.source_token().is_native() {
                    record.source_fees
                } else {
                    Amount::zero()
                };
                // A failed claim moves nothing; only the refund shows up on the source side.
                self.verify(
                    intent,
                    before,
                    BalanceDelta::zero(),
                    BalanceDelta::zero(),
                    costs,
                    self.destination_costs(intent, funding_spent),
                    (to_datetime(record.locked_at), None),
                    progress,
                )
                .await?;
                return Err(e);
            }
        }

        let source_costs = if intent.source_token().is_native() {
            record.source_fees
        } else {
            Amount::zero()
        };
        let destination_costs = self.destination_costs(intent, funding_spent.saturating_add(record.claim_fees));
        self.verify(
            intent,
            before,
            BalanceDelta::decrease(intent.amount()),
            BalanceDelta::increase(intent.amount()),
            source_costs,
            destination_costs,
            (to_datetime(record.locked_at), record.claimed_at.and_then(to_datetime)),
            progress,
        )
        .await?;
        progress.advance(SwapState::Verified);
        Ok(())
    }

    /// Waits for the source timelock to pass, then refunds the lock.
    async fn refund_path(
        &self,
        escrow: &EscrowLockManager,
        record: &mut LockRecord,
        mut cancel: watch::Receiver<bool>,
        progress: &mut Progress,
    ) -> Result<(), SwapError> {
        let policy = &self.settings.retry;
        let source = self.source.as_ref();

        loop {
            let now = retry_with_backoff(policy, "read chain time", move |_| async move {
                source.chain_time().await.map_err(SwapError::from)
            })
            .await?;
            if record.mark_expired_if_due(now) {
                break;
            }
            let remaining = Duration::from_secs(record.timelock_deadline.saturating_sub(now).saturating_add(1));
            let wait = remaining.min(MAX_EXPIRY_WAIT);
            info!(
                "Swap {} refundable in {:?}; waiting {:?}",
                record.swap_id_hex(),
                remaining,
                wait
            );
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = cancelled(&mut cancel) => {
                    warn!("Refund wait for swap {} cancelled; lock stays refundable", record.swap_id_hex());
                    progress.lock = Some(record.clone());
                    return Err(SwapError::Cancelled);
                }
            }
        }
        progress.lock = Some(record.clone());
        progress.advance(SwapState::TimelockExpired);

        let expired = &*record;
        let receipt = retry_with_backoff(policy, "refund", move |_| escrow.submit_refund(expired)).await?;
        record.mark_refunded(&receipt)?;
        progress.lock = Some(record.clone());
        progress.advance(SwapState::Refunded);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // SDK-mediated variant
    // ------------------------------------------------------------------------

    fn token_address(token: &TokenId) -> String {
        match token.contract() {
            Some(addr) => addr.to_string(),
            None => NATIVE_TOKEN_SENTINEL.to_string(),
        }
    }

    async fn quote_and_place(
        &self,
        api: &dyn OrderApi,
        intent: &SwapIntent,
    ) -> Result<(Quote, SecretMaterial, PlacedOrder), SwapError> {
        let policy = &self.settings.retry;
        let request = QuoteRequest {
            src_chain_id: intent.source_chain_id(),
            dst_chain_id: intent.destination_chain_id(),
            src_token_address: Self::token_address(intent.source_token()),
            dst_token_address: Self::token_address(intent.destination_token()),
            amount: intent.amount(),
            wallet_address: self.source.address(),
        };
        let request = &request;
        let preset = self.settings.preset.as_str();

        let mut fresh_retry_used = false;
        loop {
            let quote = retry_with_backoff(policy, "quote", move |_| api.get_quote(request)).await?;
            let count = quote.secrets_count(preset)?;
            let secrets = SecretMaterial::generate(count)?;
            let descriptor = secrets.descriptor();
            info!(
                "Quote received: {} -> {} with {} secret(s) ({:?})",
                quote.src_token_amount, quote.dst_token_amount, count, descriptor.mode
            );

            let submission = OrderSubmission {
                quote_id: quote.quote_id.clone(),
                preset: preset.to_string(),
                src_chain_id: intent.source_chain_id(),
                dst_chain_id: intent.destination_chain_id(),
                wallet_address: self.source.address(),
                receiver: intent.beneficiary().to_string(),
                hash_lock: descriptor.hashlock_hex(),
                secret_hashes: descriptor.secret_hashes_hex(),
            };
            let submission = &submission;
            match retry_with_backoff(policy, "place order", move |_| api.place_order(submission)).await {
                Ok(placed) => return Ok((quote, secrets, placed)),
                Err(SwapError::OrderRejected { status: 400, message }) if !fresh_retry_used => {
                    warn!("Order rejected ({}); retrying once with a fresh quote", message);
                    fresh_retry_used = true;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn run_sdk(
        &self,
        api: &Arc<dyn OrderApi>,
        intent: &SwapIntent,
        cancel: watch::Receiver<bool>,
        progress: &mut Progress,
    ) -> Result<(), SwapError> {
        self.check_chains(intent)?;
        let before = self.snapshot(intent).await?;

        let (quote, secrets, placed) = self.quote_and_place(api.as_ref(), intent).await?;
        progress.advance(SwapState::SecretGenerated);
        let placed_at = Utc::now();
        info!("Order placed: {}", placed.order_hash);
        progress.order_hash = Some(placed.order_hash.clone());
        progress.advance(SwapState::OrderPlaced);

        let deadline = tokio::time::Instant::now().checked_add(Duration::from_secs(intent.timelock_secs()));
        if deadline.is_none() {
            warn!(
                "Timelock of {}s is beyond the clock range; polling without a deadline",
                intent.timelock_secs()
            );
        }
        let settings = PollerSettings {
            interval: self.settings.poll_interval,
            max_polls: self.settings.max_polls,
            deadline,
        };
        let poller = FillPoller::new(Arc::clone(api), settings);
        progress.advance(SwapState::ClaimSubmitted);
        let report = match poller.run(&placed.order_hash, &secrets, cancel).await {
            Ok(report) => report,
            Err(e @ SwapError::PollingTimeout { .. }) => {
                progress.advance(SwapState::TimelockExpired);
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        let state = report.state;
        progress.poll = Some(report);

        match state {
            PollState::Executed => progress.advance(SwapState::Claimed),
            PollState::Expired => {
                progress.advance(SwapState::TimelockExpired);
                return Err(SwapError::TimelockExpired {
                    swap_id: placed.order_hash,
                });
            }
            _ => {
                return Err(SwapError::OrderFailed {
                    order_hash: placed.order_hash,
                })
            }
        }

        let expected_destination = quote.dst_amount()?;
        self.verify(
            intent,
            before,
            BalanceDelta::decrease(intent.amount()),
            BalanceDelta::increase(expected_destination),
            Amount::zero(),
            Amount::zero(),
            (Some(placed_at), Some(Utc::now())),
            progress,
        )
        .await?;
        progress.advance(SwapState::Verified);
        Ok(())
    }
}
