//! Transaction broadcast
//!
//! One signed transaction, one RPC call. Retrying is left to the caller:
//! a blind resend after a failed broadcast can desynchronize nonces.

use super::signer::TxSigner;
use super::types::{SubmittedTransaction, TransactionRequest};
use crate::chain::{ChainClient, ClientError};
use crate::error::{RejectionReason, TxError, TxResult};

use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Signs and broadcasts transaction requests
pub struct Submitter {
    client: Arc<dyn ChainClient>,
}

impl Submitter {
    /// Create a new submitter
    pub fn new(client: Arc<dyn ChainClient>) -> Self {
        Self { client }
    }

    /// Sign and broadcast `request`
    pub async fn submit(
        &self,
        request: &TransactionRequest,
        signer: &dyn TxSigner,
    ) -> TxResult<SubmittedTransaction> {
        let nonce = request.nonce();

        let raw = signer
            .sign(request, self.client.chain_id())
            .await
            .map_err(|e| {
                error!("Failed to sign transaction at nonce {}: {}", nonce, e);
                TxError::Submission {
                    reason: RejectionReason::Other,
                    message: format!("signing failed: {}", e),
                    nonce,
                    hash: None,
                }
            })?;

        let hash = match self.client.send_raw_transaction(raw).await {
            Ok(hash) => hash,
            Err(ClientError::Rejected(message)) => {
                let reason = RejectionReason::classify(&message);
                warn!(
                    "Node rejected transaction at nonce {} ({}): {}",
                    nonce, reason, message
                );
                return Err(TxError::Submission {
                    reason,
                    message,
                    nonce,
                    hash: None,
                });
            }
            Err(e) => return Err(TxError::rpc("eth_sendRawTransaction", e)),
        };

        info!(
            "Transaction sent: {:?} (nonce {}, gas price {})",
            hash,
            nonce,
            request.gas_price()
        );
        crate::metrics::record_tx_submitted();

        Ok(SubmittedTransaction {
            hash,
            request: request.clone(),
            submitted_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::testing::FakeSigner;
    use crate::chain::MockChainClient;
    use crate::tx::signer::MockTxSigner;
    use crate::tx::{GasParams, TransactionBuilder};
    use ethers::types::{Address, H256, U256};

    fn request() -> TransactionRequest {
        let gas = GasParams::transfer(U256::from(3_000_000_000u64)).unwrap();
        TransactionBuilder::build_cancellation(Address::repeat_byte(0x42), 5, gas)
    }

    fn rejecting_client(message: &'static str) -> MockChainClient {
        let mut mock = MockChainClient::new();
        mock.expect_chain_id().return_const(97u64);
        mock.expect_send_raw_transaction()
            .times(1)
            .returning(move |_| Err(ClientError::Rejected(message.to_string())));
        mock
    }

    #[tokio::test]
    async fn test_submit_broadcasts_exactly_once() {
        let mut mock = MockChainClient::new();
        mock.expect_chain_id().return_const(97u64);
        mock.expect_send_raw_transaction()
            .times(1)
            .returning(|_| Ok(H256::repeat_byte(0x01)));

        let signer = FakeSigner::new(Address::repeat_byte(0x42));
        let submitted = Submitter::new(Arc::new(mock))
            .submit(&request(), &signer)
            .await
            .unwrap();

        assert_eq!(submitted.hash, H256::repeat_byte(0x01));
        assert_eq!(submitted.request, request());
    }

    #[tokio::test]
    async fn test_each_rejection_has_a_distinct_reason() {
        let cases = [
            ("nonce too low", RejectionReason::NonceTooLow),
            ("replacement transaction underpriced", RejectionReason::Underpriced),
            (
                "insufficient funds for gas * price + value",
                RejectionReason::InsufficientFunds,
            ),
            ("exceeds block gas limit", RejectionReason::Other),
        ];

        for (message, expected) in cases {
            let signer = FakeSigner::new(Address::repeat_byte(0x42));
            let err = Submitter::new(Arc::new(rejecting_client(message)))
                .submit(&request(), &signer)
                .await
                .unwrap_err();

            match err {
                TxError::Submission { reason, nonce, .. } => {
                    assert_eq!(reason, expected);
                    assert_eq!(nonce, 5);
                }
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    #[tokio::test]
    async fn test_transport_failure_is_rpc_error() {
        let mut mock = MockChainClient::new();
        mock.expect_chain_id().return_const(97u64);
        mock.expect_send_raw_transaction()
            .times(1)
            .returning(|_| Err(ClientError::Transport("timed out".to_string())));

        let signer = FakeSigner::new(Address::repeat_byte(0x42));
        let err = Submitter::new(Arc::new(mock))
            .submit(&request(), &signer)
            .await
            .unwrap_err();
        assert!(matches!(err, TxError::Rpc { .. }));
    }

    #[tokio::test]
    async fn test_signing_failure_never_reaches_the_node() {
        let mut mock = MockChainClient::new();
        mock.expect_chain_id().return_const(97u64);
        mock.expect_send_raw_transaction().never();

        let mut signer = MockTxSigner::new();
        signer
            .expect_sign()
            .returning(|_, _| Err(TxError::Wallet("locked keystore".to_string())));

        let err = Submitter::new(Arc::new(mock))
            .submit(&request(), &signer)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TxError::Submission {
                reason: RejectionReason::Other,
                ..
            }
        ));
    }
}
