//! Nonce Keeper - nonce-aware transaction submission and replacement
//!
//! Deploys contracts, sends transfers and cancels stuck transactions for a
//! signing account, resolving nonces from the chain node on every attempt
//! and serializing work per account.

pub mod api;
pub mod chain;
pub mod config;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod tx;
