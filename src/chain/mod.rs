//! Chain module - the boundary to a remote chain node
//!
//! This module provides:
//! - The `ChainClient` trait every lifecycle component talks through
//! - An ethers-backed provider with multi-RPC failover for reads
//! - A scripted in-memory chain for tests

pub mod provider;
#[cfg(test)]
pub(crate) mod testing;

pub use provider::ChainProvider;

use crate::tx::Receipt;

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256};
use std::fmt;
use thiserror::Error;

/// Which transaction counter to read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    /// Transactions included in the canonical chain
    Latest,
    /// Including transactions broadcast but not yet mined
    Pending,
}

impl fmt::Display for BlockTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockTag::Latest => f.write_str("latest"),
            BlockTag::Pending => f.write_str("pending"),
        }
    }
}

/// Failure reported by a chain client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Node unreachable or the request never completed
    #[error("transport failure: {0}")]
    Transport(String),

    /// Node answered with a JSON-RPC error
    #[error("node rejected request: {0}")]
    Rejected(String),

    /// Node answered with something we cannot interpret
    #[error("malformed response: {0}")]
    Malformed(String),
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Remote chain node operations used by the lifecycle components
///
/// Implementations must be shareable across tasks; calls for unrelated
/// addresses must not serialize behind each other.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Chain id used for replay-protected signing
    fn chain_id(&self) -> u64;

    /// Transaction count of `address` at the given tag
    async fn transaction_count(&self, address: Address, tag: BlockTag) -> ClientResult<u64>;

    /// Broadcast a signed transaction, returning its hash
    async fn send_raw_transaction(&self, raw: Bytes) -> ClientResult<H256>;

    /// Receipt for a mined transaction, `None` while unmined
    async fn transaction_receipt(&self, hash: H256) -> ClientResult<Option<Receipt>>;

    /// Whether the node still knows the transaction (mined or in its pool)
    async fn transaction_known(&self, hash: H256) -> ClientResult<bool>;
}
