//! Error types for the transaction lifecycle service

use ethers::types::{Address, H256};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Why a node refused to accept a broadcast transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectionReason {
    NonceTooLow,
    /// Identical signed bytes are already in the node's pool
    AlreadyKnown,
    Underpriced,
    InsufficientFunds,
    Other,
}

impl RejectionReason {
    /// Classify a node error message
    pub fn classify(message: &str) -> Self {
        let message = message.to_lowercase();

        if message.contains("nonce too low") || message.contains("nonce is too low") {
            RejectionReason::NonceTooLow
        } else if message.contains("already known") || message.contains("known transaction") {
            RejectionReason::AlreadyKnown
        } else if message.contains("underpriced") {
            // "replacement transaction underpriced" and "transaction underpriced"
            RejectionReason::Underpriced
        } else if message.contains("insufficient funds") {
            RejectionReason::InsufficientFunds
        } else {
            RejectionReason::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::NonceTooLow => "nonce-too-low",
            RejectionReason::AlreadyKnown => "already-known",
            RejectionReason::Underpriced => "underpriced",
            RejectionReason::InsufficientFunds => "insufficient-funds",
            RejectionReason::Other => "other",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for the service
#[derive(Error, Debug)]
pub enum TxError {
    #[error("RPC error during {operation}: {message}")]
    Rpc { operation: String, message: String },

    #[error("Inconsistent nonce for {address:?}: pending {pending} < confirmed {confirmed}")]
    InconsistentNonce {
        address: Address,
        confirmed: u64,
        pending: u64,
    },

    #[error("Submission rejected at nonce {nonce} ({reason}): {message}")]
    Submission {
        reason: RejectionReason,
        message: String,
        nonce: u64,
        /// Earlier broadcast at the same nonce, when there was one
        hash: Option<H256>,
    },

    #[error("No receipt for {hash:?} (nonce {nonce}) after {waited:?}; retry with a higher gas price")]
    Timeout {
        hash: H256,
        nonce: u64,
        waited: Duration,
    },

    #[error("Transaction {hash:?} (nonce {nonce}) is no longer known to the node")]
    Dropped { hash: H256, nonce: u64 },

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Transaction {hash:?} reverted in block {block_number}")]
    Reverted { hash: H256, block_number: u64 },

    #[error("No pending transaction to cancel for {address:?} (nonce {nonce})")]
    NothingToCancel { address: Address, nonce: u64 },

    #[error("Account {address:?} already has an orchestration in flight")]
    AccountBusy { address: Address },

    #[error("Wait for {hash:?} cancelled; the transaction remains broadcast")]
    Cancelled { hash: H256 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Wallet error: {0}")]
    Wallet(String),
}

impl TxError {
    /// Check if the caller can act on this error and try again
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TxError::Timeout { .. }
                | TxError::Dropped { .. }
                | TxError::AccountBusy { .. }
                | TxError::Cancelled { .. }
        )
    }

    /// Stable tag used in logs, metric labels and API bodies
    pub fn kind(&self) -> &'static str {
        match self {
            TxError::Rpc { .. } => "rpc_error",
            TxError::InconsistentNonce { .. } => "inconsistent_nonce",
            TxError::Submission { .. } => "submission_error",
            TxError::Timeout { .. } => "timeout",
            TxError::Dropped { .. } => "dropped",
            TxError::MalformedRequest(_) => "malformed_request",
            TxError::Reverted { .. } => "reverted",
            TxError::NothingToCancel { .. } => "nothing_to_cancel",
            TxError::AccountBusy { .. } => "account_busy",
            TxError::Cancelled { .. } => "cancelled",
            TxError::Config(_) => "config_error",
            TxError::Wallet(_) => "wallet_error",
        }
    }

    /// Last nonce the failed operation was working with, if any
    pub fn nonce(&self) -> Option<u64> {
        match self {
            TxError::Submission { nonce, .. }
            | TxError::Timeout { nonce, .. }
            | TxError::Dropped { nonce, .. }
            | TxError::NothingToCancel { nonce, .. } => Some(*nonce),
            TxError::InconsistentNonce { confirmed, .. } => Some(*confirmed),
            _ => None,
        }
    }

    /// Hash of the broadcast transaction the error refers to, if any
    pub fn hash(&self) -> Option<H256> {
        match self {
            TxError::Timeout { hash, .. }
            | TxError::Dropped { hash, .. }
            | TxError::Reverted { hash, .. }
            | TxError::Cancelled { hash } => Some(*hash),
            TxError::Submission { hash, .. } => *hash,
            _ => None,
        }
    }

    /// Node rejected the transaction because its nonce was already used
    pub fn is_nonce_too_low(&self) -> bool {
        matches!(
            self,
            TxError::Submission {
                reason: RejectionReason::NonceTooLow,
                ..
            }
        )
    }

    pub(crate) fn rpc(operation: &str, message: impl ToString) -> Self {
        TxError::Rpc {
            operation: operation.to_string(),
            message: message.to_string(),
        }
    }
}

/// Result type for service operations
pub type TxResult<T> = Result<T, TxError>;
