//! Error Taxonomy
//!
//! Chain-level failures (`ChainError`) and swap-level failures (`SwapError`),
//! each mapped to exactly one `ErrorKind`. Callers decide retry vs abort from
//! the kind, never from the message text.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::service::escrow::LockStatus;

// ============================================================================
// ERROR KINDS
// ============================================================================

/// Classification used by the orchestrator to decide retry vs abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// RPC timeout, rate limiting, dropped connection. Retryable with backoff.
    Transient,
    /// Malformed input, missing configuration, secret/hash mismatch. Fail fast.
    Validation,
    /// The contract (or relayer) refused the request. Retrying with the same inputs fails again.
    ContractRejected,
    /// Post-swap balance check failed.
    ConsistencyViolation,
    /// An order, claim or broadcast transaction never reached a terminal state in time.
    PollingStale,
    /// Stopped by an external cancel signal.
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Validation => "validation",
            ErrorKind::ContractRejected => "contract_rejected",
            ErrorKind::ConsistencyViolation => "consistency_violation",
            ErrorKind::PollingStale => "polling_stale",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

// ============================================================================
// CHAIN ERRORS
// ============================================================================

/// Errors raised by a chain connector.
#[derive(Debug, Clone, Error)]
pub enum ChainError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("confirmation of {tx} timed out after {waited:?}")]
    ConfirmationTimeout { tx: String, waited: Duration },

    #[error("contract reverted: {0}")]
    Reverted(String),

    #[error("invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("malformed node response: {0}")]
    MalformedResponse(String),

    #[error("signing failed: {0}")]
    Signing(String),
}

impl ChainError {
    pub fn invalid_address(address: &str, reason: impl Into<String>) -> Self {
        ChainError::InvalidAddress {
            address: address.to_string(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ChainError::Transport(_)
            | ChainError::ConfirmationTimeout { .. }
            | ChainError::MalformedResponse(_) => ErrorKind::Transient,
            ChainError::Reverted(_) => ErrorKind::ContractRejected,
            ChainError::InvalidAddress { .. } | ChainError::Signing(_) => ErrorKind::Validation,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

impl From<reqwest::Error> for ChainError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ChainError::MalformedResponse(err.to_string())
        } else {
            ChainError::Transport(err.to_string())
        }
    }
}

// ============================================================================
// SWAP ERRORS
// ============================================================================

/// Errors surfaced by the swap services and the orchestrator.
#[derive(Debug, Error)]
pub enum SwapError {
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("order API transport error: {0}")]
    Transport(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("lock failed: {0}")]
    LockFailed(String),

    #[error("claim rejected for swap {swap_id}: {reason}")]
    ClaimRejected { swap_id: String, reason: String },

    #[error("swap {swap_id} is already finalized ({status})")]
    AlreadyFinalized { swap_id: String, status: LockStatus },

    #[error("timelock of swap {swap_id} is still active (deadline {deadline}, chain time {now})")]
    TimelockActive { swap_id: String, deadline: u64, now: u64 },

    #[error("order rejected by relayer (HTTP {status}): {message}")]
    OrderRejected { status: u16, message: String },

    #[error("order {order_hash} was cancelled or refunded by the relayer")]
    OrderFailed { order_hash: String },

    #[error("swap inconsistent: {0}")]
    SwapInconsistent(String),

    #[error("order {order_hash} did not reach a terminal state after {polls} polls")]
    PollingTimeout { order_hash: String, polls: u32 },

    #[error("timelock of swap {swap_id} expired before it was claimed")]
    TimelockExpired { swap_id: String },

    /// Broadcast but never confirmed; the transaction may still land, so it is never resent.
    #[error("transaction {tx} was broadcast but not confirmed: {reason}")]
    Unconfirmed { tx: String, reason: String },

    #[error("operation cancelled")]
    Cancelled,
}

impl SwapError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SwapError::Chain(err) => err.kind(),
            SwapError::Transport(_) => ErrorKind::Transient,
            SwapError::Validation(_) | SwapError::TimelockActive { .. } => ErrorKind::Validation,
            SwapError::LockFailed(_)
            | SwapError::ClaimRejected { .. }
            | SwapError::AlreadyFinalized { .. }
            | SwapError::OrderRejected { .. }
            | SwapError::OrderFailed { .. } => ErrorKind::ContractRejected,
            SwapError::SwapInconsistent(_) => ErrorKind::ConsistencyViolation,
            SwapError::PollingTimeout { .. }
            | SwapError::TimelockExpired { .. }
            | SwapError::Unconfirmed { .. } => ErrorKind::PollingStale,
            SwapError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}
