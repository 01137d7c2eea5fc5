//! Order/Fill Poller
//!
//! Polls the relayer for an order's status and its ready-to-accept-secret fills,
//! submitting exactly one secret per fill index.
//!
//! Flow per tick:
//! 1. Query order status; `executed` ends polling, `expired`/failed states too.
//! 2. Query ready fills; submit the secret for every fill index not yet processed.
//!
//! Polling stops on a terminal status, on cancellation, or once the poll cap or the
//! deadline derived from the swap's timelock is reached.

use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ServiceConfig;
use crate::crypto::SecretMaterial;
use crate::error::SwapError;
use crate::order_client::OrderApi;

/// State of a polled order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollState {
    /// Order placed, no poll yet
    Submitted,
    Polling,
    Executed,
    Expired,
    /// Cancelled or refunded by the relayer
    Failed,
}

/// Poll loop bounds
#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub interval: Duration,
    pub max_polls: Option<u32>,
    /// Hard stop, normally the swap's timelock deadline
    pub deadline: Option<Instant>,
}

impl PollerSettings {
    pub fn from_service(service: &ServiceConfig, deadline: Option<Instant>) -> Self {
        Self {
            interval: service.poll_interval(),
            max_polls: service.max_polls,
            deadline,
        }
    }
}

/// Result of a finished poll loop
#[derive(Debug, Clone, Serialize)]
pub struct PollReport {
    pub order_hash: String,
    pub state: PollState,
    pub polls: u32,
    /// Fill indices that received their secret, ascending
    pub processed_fills: Vec<usize>,
}

/// Resolves once the cancel flag is set. Never resolves if the sender is gone.
pub(crate) async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

enum Tick {
    Continue,
    Terminal(PollState),
}

/// Poller for one order
pub struct FillPoller {
    api: Arc<dyn OrderApi>,
    settings: PollerSettings,
}

impl FillPoller {
    pub fn new(api: Arc<dyn OrderApi>, settings: PollerSettings) -> Self {
        Self { api, settings }
    }

    async fn tick(
        &self,
        order_hash: &str,
        secrets: &SecretMaterial,
        processed: &mut BTreeSet<usize>,
        cancel: &watch::Receiver<bool>,
    ) -> Result<Tick, SwapError> {
        let status = self.api.get_order_status(order_hash).await?;
        debug!("Order {} status: {}", order_hash, status.status);
        if status.is_executed() {
            return Ok(Tick::Terminal(PollState::Executed));
        }
        if status.is_expired() {
            return Ok(Tick::Terminal(PollState::Expired));
        }
        if status.is_failed() {
            return Ok(Tick::Terminal(PollState::Failed));
        }

        let fills = self.api.get_ready_to_accept_secret_fills(order_hash).await?;
        for fill in fills {
            if processed.contains(&fill.idx) {
                continue;
            }
            // results after a cancel are discarded
            if *cancel.borrow() {
                return Ok(Tick::Continue);
            }
            let secret = secrets.secret(fill.idx).ok_or_else(|| {
                SwapError::Validation(format!(
                    "order {} reported fill index {} but only {} secrets exist",
                    order_hash,
                    fill.idx,
                    secrets.len()
                ))
            })?;
            self.api.submit_secret(order_hash, secret).await?;
            processed.insert(fill.idx);
            info!("Submitted secret for fill {} of order {}", fill.idx, order_hash);
        }
        Ok(Tick::Continue)
    }

    /// Polls `order_hash` until a terminal state, cancellation, or the cap.
    ///
    /// # Returns
    ///
    /// * `Ok(PollReport)` - Terminal state reached (`Executed`, `Expired` or `Failed`)
    /// * `Err(SwapError::PollingTimeout)` - Poll cap or deadline reached first
    /// * `Err(SwapError::Cancelled)` - Cancel flag set
    /// * `Err(_)` - Non-retryable relayer error
    pub async fn run(
        &self,
        order_hash: &str,
        secrets: &SecretMaterial,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<PollReport, SwapError> {
        let mut processed = BTreeSet::new();
        let mut polls: u32 = 0;
        let mut state = PollState::Submitted;
        info!(
            "Polling order {} every {:?} (cap: {:?})",
            order_hash, self.settings.interval, self.settings.max_polls
        );

        loop {
            if *cancel.borrow() {
                info!("Polling of order {} cancelled after {} polls", order_hash, polls);
                return Err(SwapError::Cancelled);
            }
            let over_cap = self.settings.max_polls.is_some_and(|max| polls >= max);
            let past_deadline = self.settings.deadline.is_some_and(|d| Instant::now() >= d);
            if over_cap || past_deadline {
                warn!(
                    "Order {} still {:?} after {} polls; giving up",
                    order_hash, state, polls
                );
                return Err(SwapError::PollingTimeout {
                    order_hash: order_hash.to_string(),
                    polls,
                });
            }

            polls += 1;
            state = PollState::Polling;
            match self.tick(order_hash, secrets, &mut processed, &cancel).await {
                _ if *cancel.borrow() => {
                    info!("Polling of order {} cancelled after {} polls", order_hash, polls);
                    return Err(SwapError::Cancelled);
                }
                Ok(Tick::Terminal(terminal)) => {
                    info!("Order {} reached {:?} after {} polls", order_hash, terminal, polls);
                    return Ok(PollReport {
                        order_hash: order_hash.to_string(),
                        state: terminal,
                        polls,
                        processed_fills: processed.into_iter().collect(),
                    });
                }
                Ok(Tick::Continue) => {}
                Err(e) if e.is_retryable() => {
                    warn!("Poll {} of order {} failed (will retry): {}", polls, order_hash, e);
                }
                Err(e) => {
                    warn!("Polling of order {} aborted: {}", order_hash, e);
                    return Err(e);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.interval) => {}
                _ = cancelled(&mut cancel) => {}
            }
        }
    }
}
