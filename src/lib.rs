//! Cross-chain atomic swap coordinator
//!
//! Locks funds behind a hashlock on the source chain, reveals the secret to the
//! destination-chain resolver once the lock is confirmed, and reconciles both
//! chains' balances afterwards.

pub mod chains;
pub mod config;
pub mod crypto;
pub mod error;
pub mod intent;
pub mod order_client;
pub mod registry;
pub mod service;

// Re-export public types for convenience
pub use chains::{connect, CallOptions, ChainConnector, EvmConnector, Receipt, TronConnector, TxRef};
pub use config::{ChainConfig, CoordinatorConfig, ServiceConfig, SwapVariant};
pub use crypto::{hash_commitment, FillMode, HashlockDescriptor, Secret, SecretMaterial};
pub use error::{ChainError, ErrorKind, SwapError};
pub use intent::{Amount, SwapIntent, TokenId};
pub use order_client::{FusionOrderClient, OrderApi};
pub use registry::AddressRegistry;
pub use service::{
    EscrowLockManager, FillPoller, LockRecord, LockStatus, ResolverRelay, SwapOrchestrator,
    SwapOutcome, SwapState,
};
