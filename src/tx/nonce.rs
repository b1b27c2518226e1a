//! Nonce inspection for reliable transaction submission
//!
//! Handles:
//! - Reading confirmed ("latest") and pending counters, in that order
//! - Detecting stuck transactions (pending > confirmed)
//! - Refusing inconsistent counters instead of clamping them

use super::types::Account;
use crate::chain::{BlockTag, ChainClient};
use crate::error::{TxError, TxResult};

use ethers::types::Address;
use std::sync::Arc;
use tracing::{debug, warn};

/// Reads account nonce state from the chain; never caches
pub struct NonceTracker {
    client: Arc<dyn ChainClient>,
}

impl NonceTracker {
    /// Create a new nonce tracker
    pub fn new(client: Arc<dyn ChainClient>) -> Self {
        Self { client }
    }

    /// Fetch a fresh account snapshot
    pub async fn inspect(&self, address: Address) -> TxResult<Account> {
        let confirmed = self.fetch(address, BlockTag::Latest).await?;
        let pending = self.fetch(address, BlockTag::Pending).await?;

        let account = Account::new(address, confirmed, pending).map_err(|e| {
            warn!(
                "Node reported pending nonce {} below confirmed nonce {} for {:?}",
                pending, confirmed, address
            );
            e
        })?;

        if account.has_pending() {
            debug!(
                "Account {:?} has {} pending transaction(s), oldest at nonce {}",
                address,
                account.pending_count(),
                confirmed
            );
        } else {
            debug!("Account {:?} idle at nonce {}", address, confirmed);
        }

        crate::metrics::record_pending_count(&account);
        Ok(account)
    }

    async fn fetch(&self, address: Address, tag: BlockTag) -> TxResult<u64> {
        self.client
            .transaction_count(address, tag)
            .await
            .map_err(|e| TxError::rpc(&format!("eth_getTransactionCount({})", tag), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::testing::ScriptedChain;
    use crate::chain::{ClientError, MockChainClient};
    use mockall::predicate::eq;
    use mockall::Sequence;

    fn addr() -> Address {
        Address::repeat_byte(0xaa)
    }

    #[tokio::test]
    async fn test_idle_account() {
        let chain = Arc::new(ScriptedChain::new());
        chain.set_nonces(addr(), 5, 5);

        let account = NonceTracker::new(chain).inspect(addr()).await.unwrap();
        assert!(!account.has_pending());
        assert_eq!(account.next_nonce(), 5);
    }

    #[tokio::test]
    async fn test_stuck_account_targets_confirmed_nonce() {
        let chain = Arc::new(ScriptedChain::new());
        chain.set_nonces(addr(), 5, 6);

        let account = NonceTracker::new(chain).inspect(addr()).await.unwrap();
        assert!(account.has_pending());
        assert_eq!(account.stuck_nonce(), Some(5));
    }

    #[tokio::test]
    async fn test_queries_latest_before_pending() {
        let mut mock = MockChainClient::new();
        let mut seq = Sequence::new();
        mock.expect_transaction_count()
            .with(eq(addr()), eq(BlockTag::Latest))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(3));
        mock.expect_transaction_count()
            .with(eq(addr()), eq(BlockTag::Pending))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(4));

        let account = NonceTracker::new(Arc::new(mock)).inspect(addr()).await.unwrap();
        assert_eq!(account.confirmed_nonce, 3);
        assert_eq!(account.pending_nonce, 4);
    }

    #[tokio::test]
    async fn test_inconsistent_counters_are_never_clamped() {
        let chain = Arc::new(ScriptedChain::new());
        for (confirmed, pending) in [(1, 0), (6, 5), (100, 2)] {
            chain.report_nonces(addr(), confirmed, pending);
            let err = NonceTracker::new(chain.clone())
                .inspect(addr())
                .await
                .unwrap_err();
            assert!(matches!(err, TxError::InconsistentNonce { .. }), "{err}");
        }
    }

    #[tokio::test]
    async fn test_rpc_failure_surfaces_as_rpc_error() {
        let mut mock = MockChainClient::new();
        mock.expect_transaction_count()
            .returning(|_, _| Err(ClientError::Transport("connection refused".to_string())));

        let err = NonceTracker::new(Arc::new(mock))
            .inspect(addr())
            .await
            .unwrap_err();
        assert!(matches!(err, TxError::Rpc { .. }));
        assert!(!err.is_recoverable());
    }
}
