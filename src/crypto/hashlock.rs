//! Secret and hashlock generation
//!
//! The commitment is keccak256 of the raw 32-byte secret, which is what the
//! escrow and resolver contracts recompute on claim. Multi-fill hashlocks
//! commit to one secret per partial-fill slot through a Merkle root.

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::chains::abi::{decode_bytes32, keccak256};
use crate::crypto::merkle::{merkle_leaf, MerkleTree};
use crate::error::SwapError;

/// A 32-byte preimage. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret([u8; 32]);

impl Secret {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(value: &str) -> Result<Self, SwapError> {
        decode_bytes32(value)
            .map(Self)
            .map_err(|e| SwapError::Validation(format!("invalid secret: {}", e)))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// 0x-prefixed hex, the form relayers and claim calls expect.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

/// Generates a secret from the operating system CSPRNG.
pub fn generate_secret() -> Secret {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    Secret(bytes)
}

/// keccak256 of the secret.
pub fn hash_commitment(secret: &Secret) -> [u8; 32] {
    keccak256(secret.as_bytes())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillMode {
    SingleFill,
    MultiFill,
}

/// Hashlock plus the per-fill material a relayer needs to verify partial fills.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashlockDescriptor {
    pub mode: FillMode,
    /// Value committed on-chain
    pub hashlock: [u8; 32],
    /// keccak256 of each secret, in fill-index order
    pub secret_hashes: Vec<[u8; 32]>,
    /// Merkle leaves in fill-index order (empty for single fill)
    pub merkle_leaves: Vec<[u8; 32]>,
}

impl HashlockDescriptor {
    pub fn hashlock_hex(&self) -> String {
        format!("0x{}", hex::encode(self.hashlock))
    }

    pub fn secret_hashes_hex(&self) -> Vec<String> {
        self.secret_hashes
            .iter()
            .map(|h| format!("0x{}", hex::encode(h)))
            .collect()
    }
}

/// Builds the hashlock for `secrets` in the given mode.
///
/// # Returns
///
/// * `Ok(HashlockDescriptor)` - Single fill over exactly one secret, or a
///   Merkle root over more than two secrets with the top 16 bits set to `N - 1`
/// * `Err(SwapError::Validation)` - Wrong secret count for the mode
pub fn build_hashlock(secrets: &[Secret], mode: FillMode) -> Result<HashlockDescriptor, SwapError> {
    let secret_hashes: Vec<[u8; 32]> = secrets.iter().map(hash_commitment).collect();

    match mode {
        FillMode::SingleFill => {
            if secret_hashes.len() != 1 {
                return Err(SwapError::Validation(format!(
                    "single-fill hashlock needs exactly one secret, got {}",
                    secret_hashes.len()
                )));
            }
            Ok(HashlockDescriptor {
                mode,
                hashlock: secret_hashes[0],
                secret_hashes,
                merkle_leaves: Vec::new(),
            })
        }
        FillMode::MultiFill => {
            if secret_hashes.len() <= 2 || secret_hashes.len() > usize::from(u16::MAX) + 1 {
                return Err(SwapError::Validation(format!(
                    "multi-fill hashlock needs more than two secrets, got {}",
                    secret_hashes.len()
                )));
            }
            let leaves: Vec<[u8; 32]> = secret_hashes
                .iter()
                .enumerate()
                .map(|(i, h)| merkle_leaf(i as u64, h))
                .collect();
            let tree = MerkleTree::from_leaves(&leaves)
                .ok_or_else(|| SwapError::Validation("empty Merkle tree".into()))?;

            let mut hashlock = tree.root();
            let parts = (leaves.len() - 1) as u16;
            hashlock[..2].copy_from_slice(&parts.to_be_bytes());

            Ok(HashlockDescriptor {
                mode,
                hashlock,
                secret_hashes,
                merkle_leaves: leaves,
            })
        }
    }
}

/// The initiator's secrets and the hashlock derived from them.
///
/// Held locally until the corresponding lock is confirmed.
#[derive(Debug, Clone)]
pub struct SecretMaterial {
    secrets: Vec<Secret>,
    descriptor: HashlockDescriptor,
}

impl SecretMaterial {
    /// One fresh secret, single-fill hashlock.
    pub fn single() -> Self {
        let secret = generate_secret();
        let descriptor = HashlockDescriptor {
            mode: FillMode::SingleFill,
            hashlock: hash_commitment(&secret),
            secret_hashes: vec![hash_commitment(&secret)],
            merkle_leaves: Vec::new(),
        };
        Self {
            secrets: vec![secret],
            descriptor,
        }
    }

    /// `count` fresh secrets; single fill for one, Merkle multi-fill otherwise.
    pub fn generate(count: usize) -> Result<Self, SwapError> {
        if count == 0 {
            return Err(SwapError::Validation("secrets count must be positive".into()));
        }
        let secrets: Vec<Secret> = (0..count).map(|_| generate_secret()).collect();
        let mode = if count == 1 {
            FillMode::SingleFill
        } else {
            FillMode::MultiFill
        };
        Self::from_secrets(secrets, mode)
    }

    pub fn from_secrets(secrets: Vec<Secret>, mode: FillMode) -> Result<Self, SwapError> {
        let descriptor = build_hashlock(&secrets, mode)?;
        Ok(Self {
            secrets,
            descriptor,
        })
    }

    pub fn descriptor(&self) -> &HashlockDescriptor {
        &self.descriptor
    }

    pub fn hashlock(&self) -> [u8; 32] {
        self.descriptor.hashlock
    }

    /// Secret for fill slot `index`.
    pub fn secret(&self, index: usize) -> Option<&Secret> {
        self.secrets.get(index)
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}
