//! Orchestration of deployments, transfers and cancellations
//!
//! The orchestrator:
//! 1. Takes the per-address lock
//! 2. Resolves a nonce from a fresh account snapshot
//! 3. Builds, signs and submits the transaction
//! 4. Waits for the receipt, retrying only nonce races and drops

pub mod engine;
pub mod lock;
pub mod phase;

pub use engine::{DeployOutcome, DeploymentOrchestrator, OrchestratorConfig, TxOutcome};
pub use lock::{AccountGuard, AccountLocks};
pub use phase::{Phase, PhaseTrail};
