//! Cryptographic operations for the swap coordinator
//!
//! This module provides secret/hashlock generation, Merkle multi-fill
//! commitments and secp256k1 transaction signing keys.

pub mod hashlock;
pub mod merkle;
pub mod signing;

// Re-export for convenience
pub use hashlock::{
    build_hashlock, generate_secret, hash_commitment, FillMode, HashlockDescriptor, Secret,
    SecretMaterial,
};
pub use merkle::{merkle_leaf, MerkleTree};
pub use signing::{RecoverableSignature, SignerKey};
