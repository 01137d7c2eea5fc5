//! Resolver Relay
//!
//! Submits the claim (swap id + secret) to the destination-chain resolver
//! contract. The secret only ever leaves the process for a lock that is
//! confirmed on the source chain and whose hashlock it opens.

use ethereum_types::H160;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::chains::{AbiValue, CallOptions, ChainConnector, ContractCall, Receipt, TxRef};
use crate::config::ServiceConfig;
use crate::crypto::{hash_commitment, Secret};
use crate::error::{ChainError, SwapError};
use crate::intent::{Amount, TokenId};
use crate::service::escrow::{LockRecord, LockStatus};

const CLAIM: &str = "claim(bytes32,bytes32,address,address,uint256)";

/// Resolver relay bound to one destination-chain connector and resolver contract.
pub struct ResolverRelay {
    connector: Arc<dyn ChainConnector>,
    resolver_addr: String,
    confirmations: u64,
    confirmation_timeout: Duration,
}

impl ResolverRelay {
    pub fn new(connector: Arc<dyn ChainConnector>, resolver_addr: impl Into<String>, service: &ServiceConfig) -> Self {
        Self {
            connector,
            resolver_addr: resolver_addr.into(),
            confirmations: service.confirmations,
            confirmation_timeout: service.confirmation_timeout(),
        }
    }

    pub fn connector(&self) -> &Arc<dyn ChainConnector> {
        &self.connector
    }

    fn reject(record: &LockRecord, reason: impl Into<String>) -> SwapError {
        SwapError::ClaimRejected {
            swap_id: record.swap_id_hex(),
            reason: reason.into(),
        }
    }

    /// Sends native currency to the resolver contract and waits for it to land.
    pub async fn fund(&self, amount: Amount) -> Result<Receipt, SwapError> {
        info!(
            "Funding resolver {} with {} on {}",
            self.resolver_addr,
            amount,
            self.connector.name()
        );
        let tx = self.connector.send_native(&self.resolver_addr, amount).await?;
        let receipt = self
            .connector
            .wait_for_confirmation(&tx, self.confirmations, self.confirmation_timeout)
            .await?;
        if !receipt.success {
            return Err(SwapError::Chain(ChainError::Reverted(format!(
                "funding transfer {} failed",
                tx
            ))));
        }
        Ok(receipt)
    }

    /// Checks the secret against `record` and broadcasts the claim.
    ///
    /// Nothing is broadcast when a check fails, so a transport error from this
    /// call leaves the secret unrevealed on the destination chain.
    ///
    /// # Arguments
    ///
    /// * `record` - Confirmed source lock
    /// * `secret` - Preimage of `record.hashlock`
    /// * `beneficiary` - Destination-chain recipient
    /// * `token` - Destination asset
    ///
    /// # Returns
    ///
    /// * `Ok(TxRef)` - Claim accepted by the node
    /// * `Err(SwapError::ClaimRejected)` - Secret mismatch, lock not claimable, or revert
    /// * `Err(SwapError::AlreadyFinalized)` - Lock already claimed or refunded
    /// * `Err(SwapError::Chain)` - Transport failure before broadcast; retryable
    pub async fn send_claim(
        &self,
        record: &LockRecord,
        secret: &Secret,
        beneficiary: &str,
        token: &TokenId,
    ) -> Result<TxRef, SwapError> {
        match record.status {
            LockStatus::Locked => {}
            LockStatus::Claimed | LockStatus::Refunded => {
                return Err(SwapError::AlreadyFinalized {
                    swap_id: record.swap_id_hex(),
                    status: record.status,
                })
            }
            LockStatus::Expired => return Err(Self::reject(record, "timelock expired")),
            LockStatus::Pending => return Err(Self::reject(record, "source lock is not confirmed")),
        }

        if hash_commitment(secret) != record.hashlock {
            return Err(Self::reject(record, "secret does not open the recorded hashlock"));
        }

        let beneficiary_addr = self.connector.parse_address(beneficiary)?;
        let token_addr = match token.contract() {
            Some(addr) => self.connector.parse_address(addr)?,
            None => H160::zero(),
        };
        let call = ContractCall::new(
            CLAIM,
            vec![
                AbiValue::Bytes32(record.swap_id),
                AbiValue::Bytes32(*secret.as_bytes()),
                AbiValue::Address(beneficiary_addr),
                AbiValue::Address(token_addr),
                AbiValue::Uint(record.amount),
            ],
        );

        info!(
            "Claiming swap {} on {} for {}",
            record.swap_id_hex(),
            self.connector.name(),
            beneficiary
        );
        self.connector
            .send_contract(&self.resolver_addr, &call, &CallOptions::default())
            .await
            .map_err(|e| match e {
                ChainError::Reverted(msg) => Self::reject(record, msg),
                other => SwapError::Chain(other),
            })
    }

    /// Waits for a broadcast claim. Only ever waits on `tx`.
    ///
    /// # Returns
    ///
    /// * `Ok(Receipt)` - Claim confirmed
    /// * `Err(SwapError::ClaimRejected)` - The claim transaction reverted
    /// * `Err(SwapError::Chain)` - Transport failure or confirmation timeout; retryable
    pub async fn confirm_claim(&self, record: &LockRecord, tx: &TxRef) -> Result<Receipt, SwapError> {
        let receipt = self
            .connector
            .wait_for_confirmation(tx, self.confirmations, self.confirmation_timeout)
            .await?;
        if !receipt.success {
            warn!("Claim transaction {} for swap {} reverted", tx, record.swap_id_hex());
            return Err(Self::reject(record, format!("claim transaction {} reverted", tx)));
        }
        Ok(receipt)
    }

    /// Claims the lock and records the outcome on `record`.
    ///
    /// On any error `record` is left unchanged.
    pub async fn claim(
        &self,
        record: &mut LockRecord,
        secret: &Secret,
        beneficiary: &str,
        token: &TokenId,
    ) -> Result<TxRef, SwapError> {
        let tx = self.send_claim(record, secret, beneficiary, token).await?;
        let receipt = self.confirm_claim(record, &tx).await?;
        record.mark_claimed(&receipt)?;
        Ok(receipt.tx)
    }
}
