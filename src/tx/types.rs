//! Core data model shared by the lifecycle components

use crate::error::{TxError, TxResult};

use chrono::{DateTime, Utc};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::to_checksum;
use serde::{Deserialize, Serialize, Serializer};

/// Serialize an address in its checksummed text form
pub(crate) fn checksummed<S: Serializer>(address: &Address, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&to_checksum(address, None))
}

/// Snapshot of an account's nonce counters, fetched fresh for every use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Account {
    #[serde(serialize_with = "checksummed")]
    pub address: Address,
    pub confirmed_nonce: u64,
    pub pending_nonce: u64,
}

impl Account {
    /// Build a snapshot, refusing counters where pending < confirmed
    pub fn new(address: Address, confirmed_nonce: u64, pending_nonce: u64) -> TxResult<Self> {
        if pending_nonce < confirmed_nonce {
            return Err(TxError::InconsistentNonce {
                address,
                confirmed: confirmed_nonce,
                pending: pending_nonce,
            });
        }

        Ok(Self {
            address,
            confirmed_nonce,
            pending_nonce,
        })
    }

    pub fn has_pending(&self) -> bool {
        self.pending_nonce > self.confirmed_nonce
    }

    /// Number of broadcast but unmined transactions
    pub fn pending_count(&self) -> u64 {
        self.pending_nonce - self.confirmed_nonce
    }

    /// Nonce for new work that must not collide with anything in flight
    pub fn next_nonce(&self) -> u64 {
        self.pending_nonce
    }

    /// Nonce of the oldest stuck transaction, if there is one
    pub fn stuck_nonce(&self) -> Option<u64> {
        self.has_pending().then_some(self.confirmed_nonce)
    }
}

/// An unsigned transaction; immutable once built
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRequest {
    to: Option<Address>,
    value: U256,
    nonce: u64,
    gas_limit: u64,
    gas_price: U256,
    data: Bytes,
}

impl TransactionRequest {
    pub(crate) fn new(
        to: Option<Address>,
        value: U256,
        nonce: u64,
        gas_limit: u64,
        gas_price: U256,
        data: Bytes,
    ) -> Self {
        Self {
            to,
            value,
            nonce,
            gas_limit,
            gas_price,
            data,
        }
    }

    /// Recipient; `None` means contract creation
    pub fn to(&self) -> Option<Address> {
        self.to
    }

    pub fn value(&self) -> U256 {
        self.value
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn gas_limit(&self) -> u64 {
        self.gas_limit
    }

    pub fn gas_price(&self) -> U256 {
        self.gas_price
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn is_contract_creation(&self) -> bool {
        self.to.is_none()
    }
}

/// A broadcast transaction awaiting its receipt
#[derive(Debug, Clone)]
pub struct SubmittedTransaction {
    pub hash: H256,
    pub request: TransactionRequest,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Success,
    Reverted,
}

/// Node-attested record that a transaction was mined
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub hash: H256,
    pub block_number: u64,
    pub contract_address: Option<Address>,
    pub status: ReceiptStatus,
}

impl Receipt {
    pub fn is_success(&self) -> bool {
        self.status == ReceiptStatus::Success
    }
}
