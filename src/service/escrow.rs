//! Escrow Lock Manager
//!
//! Drives the source-chain HTLC escrow: locks funds behind a hashlock and a
//! timelock, extracts the swap id from the confirmed `HTLCCreated` event, and
//! refunds expired locks.
//!
//! Lock lifecycle:
//! 1. **Pending**: lock transaction submitted, not yet confirmed
//! 2. **Locked**: confirmed, swap id known; the secret may now be revealed
//! 3. **Claimed** / **Refunded**: final
//! 4. **Expired**: deadline passed without a claim; only refund remains

use ethereum_types::{H160, U256};
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::chains::abi::{word_at, word_to_address, word_to_u256};
use crate::chains::{
    token_allowance, AbiValue, CallOptions, ChainConnector, ContractCall, EventSignature, LogEntry,
    Receipt, TxRef,
};
use crate::config::ServiceConfig;
use crate::crypto::HashlockDescriptor;
use crate::error::{ChainError, SwapError};
use crate::intent::{serialize_amount, Amount, SwapIntent, TokenId};

/// Canonical signature of the escrow's lock event
pub const HTLC_CREATED_EVENT: &str =
    "HTLCCreated(bytes32,address,address,address,uint256,bytes32,uint256)";

/// Event name as it appears in the escrow ABI
pub const HTLC_CREATED_EVENT_NAME: &str = "HTLCCreated";

const CREATE_HTLC: &str = "createHTLC(address,address,uint256,bytes32,uint256)";
const REFUND: &str = "refund(bytes32)";

// ============================================================================
// LOCK STATE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LockStatus {
    Pending,
    Locked,
    Claimed,
    Refunded,
    Expired,
}

impl LockStatus {
    pub fn is_final(&self) -> bool {
        matches!(self, LockStatus::Claimed | LockStatus::Refunded)
    }

    pub fn can_transition_to(&self, next: LockStatus) -> bool {
        matches!(
            (self, next),
            (LockStatus::Pending, LockStatus::Locked)
                | (LockStatus::Locked, LockStatus::Claimed)
                | (LockStatus::Locked, LockStatus::Expired)
                | (LockStatus::Locked, LockStatus::Refunded)
                | (LockStatus::Expired, LockStatus::Refunded)
        )
    }
}

impl fmt::Display for LockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LockStatus::Pending => "pending",
            LockStatus::Locked => "locked",
            LockStatus::Claimed => "claimed",
            LockStatus::Refunded => "refunded",
            LockStatus::Expired => "expired",
        };
        f.write_str(label)
    }
}

fn serialize_bytes32<S: Serializer>(value: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("0x{}", hex::encode(value)))
}

/// On-chain escrow state as observed by the coordinator.
#[derive(Debug, Clone, Serialize)]
pub struct LockRecord {
    #[serde(serialize_with = "serialize_bytes32")]
    pub swap_id: [u8; 32],
    #[serde(serialize_with = "serialize_amount")]
    pub amount: Amount,
    pub token: TokenId,
    #[serde(serialize_with = "serialize_bytes32")]
    pub hashlock: [u8; 32],
    /// Source-chain beneficiary of the lock
    pub beneficiary: String,
    /// Absolute deadline (chain seconds)
    pub timelock_deadline: u64,
    pub status: LockStatus,
    pub lock_tx: TxRef,
    pub locked_at: u64,
    /// Native fees paid by the source signer (approve + lock + refund)
    #[serde(serialize_with = "serialize_amount")]
    pub source_fees: Amount,
    pub claim_tx: Option<TxRef>,
    pub claimed_at: Option<u64>,
    /// Native fees paid by the destination signer for the claim
    #[serde(serialize_with = "serialize_amount")]
    pub claim_fees: Amount,
    pub refund_tx: Option<TxRef>,
}

impl LockRecord {
    pub fn swap_id_hex(&self) -> String {
        format!("0x{}", hex::encode(self.swap_id))
    }

    /// Moves to `next`, rejecting transitions out of final states.
    pub fn transition(&mut self, next: LockStatus) -> Result<(), SwapError> {
        if self.status.is_final() {
            return Err(SwapError::AlreadyFinalized {
                swap_id: self.swap_id_hex(),
                status: self.status,
            });
        }
        if !self.status.can_transition_to(next) {
            return Err(SwapError::Validation(format!(
                "swap {} cannot move from {} to {}",
                self.swap_id_hex(),
                self.status,
                next
            )));
        }
        info!("Swap {}: {} -> {}", self.swap_id_hex(), self.status, next);
        self.status = next;
        Ok(())
    }

    /// Marks a locked record expired once chain time is past the deadline.
    pub fn mark_expired_if_due(&mut self, now: u64) -> bool {
        if self.status == LockStatus::Locked && now > self.timelock_deadline {
            self.status = LockStatus::Expired;
            info!("Swap {}: locked -> expired", self.swap_id_hex());
            return true;
        }
        false
    }

    /// Records a successful destination claim.
    pub fn mark_claimed(&mut self, receipt: &Receipt) -> Result<(), SwapError> {
        self.transition(LockStatus::Claimed)?;
        self.claim_tx = Some(receipt.tx.clone());
        self.claimed_at = Some(receipt.block_timestamp);
        self.claim_fees = self.claim_fees.saturating_add(receipt.fee_paid);
        Ok(())
    }

    /// Records a confirmed refund.
    pub fn mark_refunded(&mut self, receipt: &Receipt) -> Result<(), SwapError> {
        self.transition(LockStatus::Refunded)?;
        self.refund_tx = Some(receipt.tx.clone());
        self.source_fees = self.source_fees.saturating_add(receipt.fee_paid);
        Ok(())
    }
}

/// Lock transaction accepted by the node, not yet confirmed.
#[derive(Debug, Clone)]
pub struct PendingLock {
    pub tx: TxRef,
    pub hashlock: [u8; 32],
    pub amount: Amount,
    pub token: TokenId,
    /// Source-chain beneficiary of the lock
    pub beneficiary: String,
    /// Deadline sent with the lock call (chain seconds)
    pub deadline: u64,
    /// Fee of an approval sent ahead of the lock
    pub approve_fee: Amount,
}

// ============================================================================
// EVENT DECODING
// ============================================================================

/// Decoded `HTLCCreated` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtlcCreated {
    pub swap_id: [u8; 32],
    pub sender: H160,
    pub beneficiary: H160,
    pub token: H160,
    pub amount: U256,
    pub hashlock: [u8; 32],
    pub timelock: U256,
}

/// Decodes an `HTLCCreated` log: three indexed topics after topic0, four data words.
pub fn decode_htlc_created(log: &LogEntry) -> Result<HtlcCreated, ChainError> {
    if log.topics.len() < 4 {
        return Err(ChainError::MalformedResponse(format!(
            "HTLCCreated log has {} topics, expected 4",
            log.topics.len()
        )));
    }
    Ok(HtlcCreated {
        swap_id: log.topics[1],
        sender: word_to_address(&log.topics[2]),
        beneficiary: word_to_address(&log.topics[3]),
        token: word_to_address(&word_at(&log.data, 0)?),
        amount: word_to_u256(&word_at(&log.data, 1)?),
        hashlock: word_at(&log.data, 2)?,
        timelock: word_to_u256(&word_at(&log.data, 3)?),
    })
}

/// Finds the lock event for `hashlock` among a receipt's logs.
///
/// Only logs emitted by `escrow` with the named event's topic are considered.
pub fn find_lock_event(
    logs: &[LogEntry],
    escrow: &H160,
    event: &EventSignature,
    hashlock: &[u8; 32],
) -> Result<Option<HtlcCreated>, ChainError> {
    let topic = event.topic();
    for log in logs {
        if &log.address != escrow || log.topics.first() != Some(&topic) {
            continue;
        }
        let decoded = decode_htlc_created(log)?;
        if &decoded.hashlock == hashlock {
            return Ok(Some(decoded));
        }
    }
    Ok(None)
}

// ============================================================================
// MANAGER
// ============================================================================

/// Escrow lock manager bound to one source-chain connector and escrow contract.
pub struct EscrowLockManager {
    connector: Arc<dyn ChainConnector>,
    escrow_addr: String,
    created_event: EventSignature,
    confirmations: u64,
    confirmation_timeout: Duration,
    min_timelock_margin_secs: u64,
}

impl EscrowLockManager {
    pub fn new(connector: Arc<dyn ChainConnector>, escrow_addr: impl Into<String>, service: &ServiceConfig) -> Self {
        Self {
            connector,
            escrow_addr: escrow_addr.into(),
            created_event: EventSignature::new(HTLC_CREATED_EVENT),
            confirmations: service.confirmations,
            confirmation_timeout: service.confirmation_timeout(),
            min_timelock_margin_secs: service.min_timelock_margin_secs,
        }
    }

    /// Uses a different lock event signature (e.g. taken from the escrow artifact).
    pub fn with_created_event(mut self, event: EventSignature) -> Self {
        self.created_event = event;
        self
    }

    pub fn connector(&self) -> &Arc<dyn ChainConnector> {
        &self.connector
    }

    async fn confirm(&self, tx: &TxRef) -> Result<Receipt, SwapError> {
        Ok(self
            .connector
            .wait_for_confirmation(tx, self.confirmations, self.confirmation_timeout)
            .await?)
    }

    /// Checks the signer holds `amount` and the escrow may pull it, approving if needed.
    ///
    /// Returns the fee paid for an approval, if one was sent.
    async fn ensure_funds(&self, token: &TokenId, amount: Amount) -> Result<Amount, SwapError> {
        let signer = self.connector.address();
        match token.contract() {
            None => {
                let balance = self.connector.get_balance(None).await?;
                if balance < amount {
                    return Err(SwapError::Validation(format!(
                        "insufficient native balance on {}: have {}, need {}",
                        self.connector.name(),
                        balance,
                        amount
                    )));
                }
                Ok(Amount::zero())
            }
            Some(token_addr) => {
                let balance = self.connector.get_token_balance(token_addr, &signer).await?;
                if balance < amount {
                    return Err(SwapError::Validation(format!(
                        "insufficient {} balance on {}: have {}, need {}",
                        token_addr,
                        self.connector.name(),
                        balance,
                        amount
                    )));
                }

                let allowance =
                    token_allowance(self.connector.as_ref(), token_addr, &signer, &self.escrow_addr).await?;
                if allowance >= amount {
                    return Ok(Amount::zero());
                }

                info!(
                    "Allowance {} below {}; approving escrow {} on token {}",
                    allowance, amount, self.escrow_addr, token_addr
                );
                let approve = ContractCall::new(
                    "approve(address,uint256)",
                    vec![
                        AbiValue::Address(self.connector.parse_address(&self.escrow_addr)?),
                        AbiValue::Uint(amount),
                    ],
                );
                let tx = self
                    .connector
                    .send_contract(token_addr, &approve, &CallOptions::default())
                    .await
                    .map_err(|e| match e {
                        ChainError::Reverted(msg) => SwapError::LockFailed(format!("approve reverted: {}", msg)),
                        other => SwapError::Chain(other),
                    })?;
                let receipt = self.confirm(&tx).await?;
                if !receipt.success {
                    return Err(SwapError::LockFailed(format!("approve transaction {} reverted", tx)));
                }
                Ok(receipt.fee_paid)
            }
        }
    }

    /// Checks funds and broadcasts the lock transaction without waiting for it.
    ///
    /// Safe to repeat until it returns: nothing is broadcast before the final
    /// `send_contract`, and an approval already in place is not sent again.
    ///
    /// # Arguments
    ///
    /// * `intent` - Swap parameters (amount, token, timelock duration)
    /// * `hashlock` - Commitment the claim must open
    /// * `counterparty` - Source-chain beneficiary of the lock
    ///
    /// # Returns
    ///
    /// * `Ok(PendingLock)` - Lock transaction accepted by the node
    /// * `Err(SwapError::LockFailed)` - The escrow reverted; not retryable
    /// * `Err(SwapError::Validation)` - Bad intent, short or overflowing timelock
    /// * `Err(SwapError::Chain)` - Transport failure before broadcast; retryable
    pub async fn submit_lock(
        &self,
        intent: &SwapIntent,
        hashlock: &HashlockDescriptor,
        counterparty: &str,
    ) -> Result<PendingLock, SwapError> {
        if intent.source_chain_id() != self.connector.chain_id() {
            return Err(SwapError::Validation(format!(
                "intent source chain {} does not match connector chain {}",
                intent.source_chain_id(),
                self.connector.chain_id()
            )));
        }
        if intent.timelock_secs() < self.min_timelock_margin_secs {
            return Err(SwapError::Validation(format!(
                "timelock of {}s is below the {}s relay margin",
                intent.timelock_secs(),
                self.min_timelock_margin_secs
            )));
        }

        let beneficiary = self.connector.parse_address(counterparty)?;
        let token_addr = match intent.source_token().contract() {
            Some(addr) => self.connector.parse_address(addr)?,
            None => H160::zero(),
        };

        let approve_fee = self.ensure_funds(intent.source_token(), intent.amount()).await?;

        let now = self.connector.chain_time().await?;
        let deadline = now.checked_add(intent.timelock_secs()).ok_or_else(|| {
            SwapError::Validation(format!(
                "timelock of {}s overflows chain time {}",
                intent.timelock_secs(),
                now
            ))
        })?;

        let call = ContractCall::new(
            CREATE_HTLC,
            vec![
                AbiValue::Address(beneficiary),
                AbiValue::Address(token_addr),
                AbiValue::Uint(intent.amount()),
                AbiValue::Bytes32(hashlock.hashlock),
                AbiValue::Uint(U256::from(deadline)),
            ],
        );
        let options = if intent.source_token().is_native() {
            CallOptions::with_value(intent.amount())
        } else {
            CallOptions::default()
        };

        info!(
            "Locking {} {} on {} (hashlock {}, deadline {})",
            intent.amount(),
            intent.source_token(),
            self.connector.name(),
            hashlock.hashlock_hex(),
            deadline
        );
        let tx = self
            .connector
            .send_contract(&self.escrow_addr, &call, &options)
            .await
            .map_err(|e| match e {
                ChainError::Reverted(msg) => SwapError::LockFailed(msg),
                other => SwapError::Chain(other),
            })?;

        Ok(PendingLock {
            tx,
            hashlock: hashlock.hashlock,
            amount: intent.amount(),
            token: intent.source_token().clone(),
            beneficiary: counterparty.to_string(),
            deadline,
            approve_fee,
        })
    }

    /// Waits for a broadcast lock and extracts its swap id.
    ///
    /// Only ever waits on `pending.tx`; repeating it never sends a transaction.
    ///
    /// # Returns
    ///
    /// * `Ok(LockRecord)` - Confirmed lock in `Locked` state
    /// * `Err(SwapError::LockFailed)` - Reverted, or no lock event for the hashlock
    /// * `Err(SwapError::Chain)` - Transport failure or confirmation timeout; retryable
    pub async fn confirm_lock(&self, pending: &PendingLock) -> Result<LockRecord, SwapError> {
        let escrow = self.connector.parse_address(&self.escrow_addr)?;
        let tx = &pending.tx;

        let receipt = self.confirm(tx).await?;
        if !receipt.success {
            return Err(SwapError::LockFailed(format!("lock transaction {} reverted", tx)));
        }

        let hashlock_hex = format!("0x{}", hex::encode(pending.hashlock));
        let event = find_lock_event(&receipt.logs, &escrow, &self.created_event, &pending.hashlock)?
            .ok_or_else(|| {
                SwapError::LockFailed(format!(
                    "no {} event for hashlock {} in transaction {}",
                    self.created_event.name, hashlock_hex, tx
                ))
            })?;
        if event.amount != pending.amount {
            warn!(
                "Escrow recorded amount {} but {} was requested",
                event.amount, pending.amount
            );
        }
        let timelock_deadline = if event.timelock > U256::from(u64::MAX) {
            pending.deadline
        } else {
            event.timelock.as_u64()
        };

        let mut record = LockRecord {
            swap_id: event.swap_id,
            amount: event.amount,
            token: pending.token.clone(),
            hashlock: event.hashlock,
            beneficiary: pending.beneficiary.clone(),
            timelock_deadline,
            status: LockStatus::Pending,
            lock_tx: tx.clone(),
            locked_at: receipt.block_timestamp,
            source_fees: pending.approve_fee.saturating_add(receipt.fee_paid),
            claim_tx: None,
            claimed_at: None,
            claim_fees: Amount::zero(),
            refund_tx: None,
        };
        record.transition(LockStatus::Locked)?;
        Ok(record)
    }

    /// Locks `intent.amount` on the source escrow behind `hashlock`.
    ///
    /// One broadcast followed by one confirmation wait. Callers that retry
    /// should repeat the two halves separately so a slow confirmation never
    /// leads to a second lock.
    pub async fn lock(
        &self,
        intent: &SwapIntent,
        hashlock: &HashlockDescriptor,
        counterparty: &str,
    ) -> Result<LockRecord, SwapError> {
        let pending = self.submit_lock(intent, hashlock, counterparty).await?;
        self.confirm_lock(&pending).await
    }

    /// Fails unless `record` can be refunded at chain time `now`.
    pub fn check_refundable(&self, record: &LockRecord, now: u64) -> Result<(), SwapError> {
        if record.status.is_final() {
            return Err(SwapError::AlreadyFinalized {
                swap_id: record.swap_id_hex(),
                status: record.status,
            });
        }
        if record.status == LockStatus::Pending {
            return Err(SwapError::Validation(format!(
                "swap {} is not confirmed yet",
                record.swap_id_hex()
            )));
        }
        if now <= record.timelock_deadline {
            return Err(SwapError::TimelockActive {
                swap_id: record.swap_id_hex(),
                deadline: record.timelock_deadline,
                now,
            });
        }
        Ok(())
    }

    /// Sends and confirms the refund transaction without touching `record`.
    pub async fn submit_refund(&self, record: &LockRecord) -> Result<Receipt, SwapError> {
        let now = self.connector.chain_time().await?;
        self.check_refundable(record, now)?;

        info!("Refunding swap {} on {}", record.swap_id_hex(), self.connector.name());
        let call = ContractCall::new(REFUND, vec![AbiValue::Bytes32(record.swap_id)]);
        let tx = self
            .connector
            .send_contract(&self.escrow_addr, &call, &CallOptions::default())
            .await?;
        let receipt = self.confirm(&tx).await?;
        if !receipt.success {
            return Err(SwapError::Chain(ChainError::Reverted(format!(
                "refund transaction {} reverted",
                tx
            ))));
        }
        Ok(receipt)
    }

    /// Refunds an expired, unclaimed lock.
    ///
    /// # Returns
    ///
    /// * `Ok(TxRef)` - Refund confirmed; `record.status` is `Refunded`
    /// * `Err(SwapError::AlreadyFinalized)` - Already claimed or refunded
    /// * `Err(SwapError::TimelockActive)` - Deadline not yet passed
    pub async fn refund(&self, record: &mut LockRecord) -> Result<TxRef, SwapError> {
        let receipt = self.submit_refund(record).await?;
        let now = receipt.block_timestamp.max(record.timelock_deadline.saturating_add(1));
        record.mark_expired_if_due(now);
        record.mark_refunded(&receipt)?;
        Ok(receipt.tx)
    }
}
