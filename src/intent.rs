//! Swap Intent
//!
//! User-declared swap parameters. A `SwapIntent` is validated once at
//! construction and is immutable afterwards.

use ethereum_types::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::error::SwapError;

/// On-chain amount in the token's smallest unit. Used for every amount in the crate.
pub type Amount = U256;

/// Sentinel many relayers use for the chain's native currency.
pub const NATIVE_TOKEN_SENTINEL: &str = "0xeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee";

/// Asset being moved on one side of a swap.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TokenId {
    /// The chain's native currency (ETH, TRX, ...).
    Native,
    /// A token contract, in the chain's own address format.
    Contract(String),
}

impl TokenId {
    /// Parses `"native"`, the `0xeeee...` sentinel, or a contract address.
    pub fn parse(value: &str) -> Self {
        let trimmed = value.trim();
        if trimmed.eq_ignore_ascii_case("native") || trimmed.eq_ignore_ascii_case(NATIVE_TOKEN_SENTINEL)
        {
            TokenId::Native
        } else {
            TokenId::Contract(trimmed.to_string())
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self, TokenId::Native)
    }

    pub fn contract(&self) -> Option<&str> {
        match self {
            TokenId::Native => None,
            TokenId::Contract(addr) => Some(addr),
        }
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenId::Native => f.write_str("native"),
            TokenId::Contract(addr) => f.write_str(addr),
        }
    }
}

impl Serialize for TokenId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(TokenId::parse(&raw))
    }
}

/// Serializes an amount as a decimal string.
pub fn serialize_amount<S: Serializer>(amount: &Amount, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&amount.to_string())
}

/// Parses a decimal amount string into an arbitrary-precision integer.
pub fn parse_amount(value: &str) -> Result<Amount, SwapError> {
    let trimmed = value.trim().replace('_', "");
    if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_digit()) {
        return Err(SwapError::Validation(format!(
            "amount '{}' is not a decimal integer",
            value
        )));
    }
    U256::from_dec_str(&trimmed)
        .map_err(|e| SwapError::Validation(format!("amount '{}' out of range: {:?}", value, e)))
}

/// User-declared swap parameters.
///
/// Deserialization goes through `SwapIntent::new`, so a decoded intent is
/// validated like a constructed one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "IntentFields")]
pub struct SwapIntent {
    source_chain_id: u64,
    destination_chain_id: u64,
    source_token: TokenId,
    destination_token: TokenId,
    amount: Amount,
    beneficiary: String,
    timelock_secs: u64,
}

#[derive(Deserialize)]
struct IntentFields {
    source_chain_id: u64,
    destination_chain_id: u64,
    source_token: TokenId,
    destination_token: TokenId,
    amount: Amount,
    beneficiary: String,
    timelock_secs: u64,
}

impl TryFrom<IntentFields> for SwapIntent {
    type Error = SwapError;

    fn try_from(fields: IntentFields) -> Result<Self, Self::Error> {
        SwapIntent::new(
            fields.source_chain_id,
            fields.destination_chain_id,
            fields.source_token,
            fields.destination_token,
            fields.amount,
            fields.beneficiary,
            fields.timelock_secs,
        )
    }
}

impl SwapIntent {
    /// Creates a validated intent.
    ///
    /// # Returns
    ///
    /// * `Ok(SwapIntent)` - Parameters are well-formed
    /// * `Err(SwapError::Validation)` - Zero amount, zero timelock, empty beneficiary,
    ///   or identical chain ids
    pub fn new(
        source_chain_id: u64,
        destination_chain_id: u64,
        source_token: TokenId,
        destination_token: TokenId,
        amount: Amount,
        beneficiary: impl Into<String>,
        timelock_secs: u64,
    ) -> Result<Self, SwapError> {
        let beneficiary = beneficiary.into();
        if amount.is_zero() {
            return Err(SwapError::Validation("swap amount must be positive".into()));
        }
        if timelock_secs == 0 {
            return Err(SwapError::Validation("timelock duration must be positive".into()));
        }
        if beneficiary.trim().is_empty() {
            return Err(SwapError::Validation("beneficiary address is empty".into()));
        }
        if source_chain_id == destination_chain_id {
            return Err(SwapError::Validation(format!(
                "source and destination chain ids are both {}",
                source_chain_id
            )));
        }

        Ok(Self {
            source_chain_id,
            destination_chain_id,
            source_token,
            destination_token,
            amount,
            beneficiary: beneficiary.trim().to_string(),
            timelock_secs,
        })
    }

    pub fn source_chain_id(&self) -> u64 {
        self.source_chain_id
    }

    pub fn destination_chain_id(&self) -> u64 {
        self.destination_chain_id
    }

    pub fn source_token(&self) -> &TokenId {
        &self.source_token
    }

    pub fn destination_token(&self) -> &TokenId {
        &self.destination_token
    }

    pub fn amount(&self) -> Amount {
        self.amount
    }

    /// Beneficiary address on the destination chain.
    pub fn beneficiary(&self) -> &str {
        &self.beneficiary
    }

    /// Timelock duration in seconds, counted from lock time.
    pub fn timelock_secs(&self) -> u64 {
        self.timelock_secs
    }
}
