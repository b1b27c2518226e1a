//! Transaction signing

use super::types::TransactionRequest;
use crate::error::{TxError, TxResult};

use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes};

/// Produces broadcastable bytes for a request
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TxSigner: Send + Sync {
    /// Address the signer signs for
    fn address(&self) -> Address;

    /// Sign `request` for `chain_id`, returning the raw encoded transaction
    async fn sign(&self, request: &TransactionRequest, chain_id: u64) -> TxResult<Bytes>;
}

/// Convert a request into an ethers legacy transaction
pub(crate) fn to_typed(
    request: &TransactionRequest,
    from: Address,
    chain_id: u64,
) -> TypedTransaction {
    let mut tx = ethers::types::TransactionRequest::new()
        .from(from)
        .value(request.value())
        .nonce(request.nonce())
        .gas(request.gas_limit())
        .gas_price(request.gas_price())
        .data(request.data().clone())
        .chain_id(chain_id);

    if let Some(to) = request.to() {
        tx = tx.to(to);
    }

    TypedTransaction::Legacy(tx)
}

#[async_trait]
impl TxSigner for LocalWallet {
    fn address(&self) -> Address {
        Signer::address(self)
    }

    async fn sign(&self, request: &TransactionRequest, chain_id: u64) -> TxResult<Bytes> {
        let wallet = self.clone().with_chain_id(chain_id);
        let tx = to_typed(request, Signer::address(&wallet), chain_id);

        let signature = wallet
            .sign_transaction(&tx)
            .await
            .map_err(|e| TxError::Wallet(e.to_string()))?;

        Ok(tx.rlp_signed(&signature))
    }
}
