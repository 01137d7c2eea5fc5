//! Swap coordination services
//!
//! The escrow lock manager and resolver relay drive the two chains' contracts,
//! the fill poller follows relayer-mediated orders, and the orchestrator
//! sequences them into one swap.

pub mod escrow;
pub mod orchestrator;
pub mod poller;
pub mod resolver;
pub mod retry;

// Re-export for convenience
pub use escrow::{EscrowLockManager, LockRecord, LockStatus, PendingLock};
pub use orchestrator::{
    BalanceDelta, OrchestratorSettings, SwapOrchestrator, SwapOutcome, SwapResult, SwapState,
};
pub use poller::{FillPoller, PollReport, PollState, PollerSettings};
pub use resolver::ResolverRelay;
pub use retry::{retry_with_backoff, RetryPolicy};
