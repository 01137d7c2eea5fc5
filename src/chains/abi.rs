//! Contract ABI Encoding
//!
//! Minimal Solidity ABI support shared by the EVM and Tron connectors:
//! call encoding, event topics, log word decoding, and compiled artifact loading.

use anyhow::{Context, Result};
use ethereum_types::{H160, U256};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::path::Path;

use crate::error::ChainError;

/// keccak256 of arbitrary bytes.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// First four bytes of keccak256 of a canonical method signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// topic0 of an event given its canonical signature.
pub fn event_topic(signature: &str) -> [u8; 32] {
    keccak256(signature.as_bytes())
}

/// A Solidity value passed to a contract method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbiValue {
    Address(H160),
    Uint(U256),
    Bytes32([u8; 32]),
    Bytes(Vec<u8>),
}

impl AbiValue {
    fn is_dynamic(&self) -> bool {
        matches!(self, AbiValue::Bytes(_))
    }

    fn head_word(&self) -> [u8; 32] {
        let mut word = [0u8; 32];
        match self {
            AbiValue::Address(addr) => word[12..].copy_from_slice(addr.as_bytes()),
            AbiValue::Uint(value) => value.to_big_endian(&mut word),
            AbiValue::Bytes32(bytes) => word.copy_from_slice(bytes),
            AbiValue::Bytes(_) => {}
        }
        word
    }
}

/// A state-changing or read-only contract method invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    /// Canonical signature, e.g. `refund(bytes32)`
    pub signature: String,
    pub args: Vec<AbiValue>,
}

impl ContractCall {
    pub fn new(signature: impl Into<String>, args: Vec<AbiValue>) -> Self {
        Self {
            signature: signature.into(),
            args,
        }
    }

    /// Method name without the parameter list.
    pub fn method_name(&self) -> &str {
        self.signature
            .split('(')
            .next()
            .unwrap_or(self.signature.as_str())
    }

    /// ABI-encoded arguments without the selector (Tron's `parameter` field).
    pub fn encode_args(&self) -> Vec<u8> {
        encode_args(&self.args)
    }

    /// Full calldata: selector followed by the encoded arguments.
    pub fn calldata(&self) -> Vec<u8> {
        let mut data = selector(&self.signature).to_vec();
        data.extend(self.encode_args());
        data
    }
}

/// Encodes a tuple of values with the standard head/tail layout.
pub fn encode_args(args: &[AbiValue]) -> Vec<u8> {
    let head_len = args.len() * 32;
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for arg in args {
        if let AbiValue::Bytes(bytes) = arg {
            let offset = U256::from(head_len + tail.len());
            let mut word = [0u8; 32];
            offset.to_big_endian(&mut word);
            head.extend_from_slice(&word);

            let mut len_word = [0u8; 32];
            U256::from(bytes.len()).to_big_endian(&mut len_word);
            tail.extend_from_slice(&len_word);
            tail.extend_from_slice(bytes);
            let padding = (32 - bytes.len() % 32) % 32;
            tail.extend(std::iter::repeat(0u8).take(padding));
        } else {
            debug_assert!(!arg.is_dynamic());
            head.extend_from_slice(&arg.head_word());
        }
    }

    head.extend(tail);
    head
}

/// Returns the `index`-th 32-byte word of ABI-encoded data.
pub fn word_at(data: &[u8], index: usize) -> Result<[u8; 32], ChainError> {
    let start = index * 32;
    let slice = data.get(start..start + 32).ok_or_else(|| {
        ChainError::MalformedResponse(format!(
            "ABI data too short: need word {} but only {} bytes",
            index,
            data.len()
        ))
    })?;
    let mut word = [0u8; 32];
    word.copy_from_slice(slice);
    Ok(word)
}

pub fn word_to_u256(word: &[u8; 32]) -> U256 {
    U256::from_big_endian(word)
}

pub fn word_to_address(word: &[u8; 32]) -> H160 {
    H160::from_slice(&word[12..])
}

/// Decodes a single `uint256` return value.
pub fn decode_uint(data: &[u8]) -> Result<U256, ChainError> {
    Ok(word_to_u256(&word_at(data, 0)?))
}

/// Decodes a `0x`-optional hex string into bytes.
pub fn decode_hex(value: &str) -> Result<Vec<u8>, ChainError> {
    let stripped = value.strip_prefix("0x").unwrap_or(value);
    hex::decode(stripped)
        .map_err(|e| ChainError::MalformedResponse(format!("invalid hex '{}': {}", value, e)))
}

/// Decodes a hex string into exactly 32 bytes.
pub fn decode_bytes32(value: &str) -> Result<[u8; 32], ChainError> {
    let bytes = decode_hex(value)?;
    if bytes.len() != 32 {
        return Err(ChainError::MalformedResponse(format!(
            "expected 32 bytes, got {} in '{}'",
            bytes.len(),
            value
        )));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// Parses a JSON-RPC quantity (`0x`-prefixed hex) into a U256.
pub fn parse_quantity(value: &str) -> Result<U256, ChainError> {
    let stripped = value.strip_prefix("0x").unwrap_or(value);
    if stripped.is_empty() {
        return Ok(U256::zero());
    }
    U256::from_str_radix(stripped, 16)
        .map_err(|e| ChainError::MalformedResponse(format!("invalid quantity '{}': {:?}", value, e)))
}

// ============================================================================
// EVENT SIGNATURES
// ============================================================================

/// A named event and its canonical signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSignature {
    pub name: String,
    pub signature: String,
}

impl EventSignature {
    pub fn new(signature: impl Into<String>) -> Self {
        let signature = signature.into();
        let name = signature
            .split('(')
            .next()
            .unwrap_or(signature.as_str())
            .to_string();
        Self { name, signature }
    }

    pub fn topic(&self) -> [u8; 32] {
        event_topic(&self.signature)
    }
}

// ============================================================================
// COMPILED ARTIFACTS
// ============================================================================

/// Parameter entry of an ABI item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbiParam {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub indexed: bool,
    #[serde(default)]
    pub components: Vec<AbiParam>,
}

impl AbiParam {
    fn canonical_type(&self) -> String {
        match self.kind.strip_prefix("tuple") {
            Some(suffix) => {
                let inner: Vec<String> = self.components.iter().map(|c| c.canonical_type()).collect();
                format!("({}){}", inner.join(","), suffix)
            }
            None => self.kind.clone(),
        }
    }
}

/// One entry of a contract ABI array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbiItem {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<AbiParam>,
}

/// Compiled contract artifact (Truffle, Hardhat or Forge JSON). Only the ABI is read.
#[derive(Debug, Clone, Deserialize)]
pub struct ContractArtifact {
    pub abi: Vec<AbiItem>,
}

impl ContractArtifact {
    /// Parses an artifact from its JSON text.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse contract artifact JSON")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read contract artifact {}", path.display()))?;
        Self::from_json(&content)
    }

    /// Canonical signature of the event with the given name.
    pub fn event(&self, name: &str) -> Result<EventSignature> {
        let item = self
            .abi
            .iter()
            .find(|item| item.kind == "event" && item.name == name)
            .ok_or_else(|| anyhow::anyhow!("Event '{}' not found in artifact ABI", name))?;
        let types: Vec<String> = item.inputs.iter().map(|p| p.canonical_type()).collect();
        Ok(EventSignature::new(format!("{}({})", name, types.join(","))))
    }
}
