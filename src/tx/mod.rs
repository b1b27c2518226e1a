//! Transaction lifecycle: nonce inspection, building, signing, submission
//! and receipt tracking

mod builder;
mod gas;
mod nonce;
mod receipt;
mod signer;
mod submitter;
mod types;

pub use builder::TransactionBuilder;
pub use gas::{GasParams, TRANSFER_GAS_LIMIT};
pub use nonce::NonceTracker;
pub use receipt::ReceiptWaiter;
pub use signer::TxSigner;
#[cfg(test)]
pub use signer::MockTxSigner;
pub use submitter::Submitter;
pub use types::{Account, Receipt, ReceiptStatus, SubmittedTransaction, TransactionRequest};
