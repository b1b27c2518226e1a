//! Receipt polling
//!
//! Polling is the only suspension point. Abandoning a wait (timeout,
//! cancellation, or dropping the future) never touches the broadcast
//! transaction itself.

use super::types::{Receipt, SubmittedTransaction};
use crate::chain::ChainClient;
use crate::error::{TxError, TxResult};

use ethers::types::H256;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Waits for a submitted transaction to be mined
pub struct ReceiptWaiter {
    client: Arc<dyn ChainClient>,
    poll_interval: Duration,
    /// Consecutive polls where the node no longer knows the transaction
    dropped_after_misses: u32,
}

impl ReceiptWaiter {
    /// Create a new receipt waiter
    pub fn new(client: Arc<dyn ChainClient>, poll_interval: Duration, dropped_after_misses: u32) -> Self {
        Self {
            client,
            poll_interval,
            dropped_after_misses: dropped_after_misses.max(1),
        }
    }

    /// Poll until mined, dropped, or `limit` elapses
    pub async fn await_receipt(
        &self,
        submitted: &SubmittedTransaction,
        limit: Duration,
    ) -> TxResult<Receipt> {
        let hash = submitted.hash;
        let nonce = submitted.request.nonce();
        let started = Instant::now();

        let result = match timeout(limit, self.poll(submitted)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "No receipt for {:?} (nonce {}) within {:?}",
                    hash, nonce, limit
                );
                Err(TxError::Timeout {
                    hash,
                    nonce,
                    waited: limit,
                })
            }
        };

        crate::metrics::record_receipt_wait(started.elapsed().as_secs_f64());
        result
    }

    /// Like `await_receipt`, but gives up as soon as `cancel` turns true
    pub async fn await_receipt_or_cancel(
        &self,
        submitted: &SubmittedTransaction,
        limit: Duration,
        cancel: &mut watch::Receiver<bool>,
    ) -> TxResult<Receipt> {
        tokio::select! {
            result = self.await_receipt(submitted, limit) => result,
            _ = cancelled(cancel) => {
                info!(
                    "Stopped waiting for {:?}; transaction left as broadcast",
                    submitted.hash
                );
                Err(TxError::Cancelled { hash: submitted.hash })
            }
        }
    }

    /// Single receipt lookup, without waiting
    pub async fn receipt(&self, hash: H256) -> TxResult<Option<Receipt>> {
        self.client
            .transaction_receipt(hash)
            .await
            .map_err(|e| TxError::rpc("eth_getTransactionReceipt", e))
    }

    async fn poll(&self, submitted: &SubmittedTransaction) -> TxResult<Receipt> {
        let hash = submitted.hash;
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut misses = 0u32;

        loop {
            ticker.tick().await;

            if let Some(receipt) = self.receipt(hash).await? {
                info!(
                    "Transaction {:?} mined in block {}",
                    hash, receipt.block_number
                );
                return Ok(receipt);
            }

            let known = self
                .client
                .transaction_known(hash)
                .await
                .map_err(|e| TxError::rpc("eth_getTransactionByHash", e))?;

            if known {
                misses = 0;
                continue;
            }

            misses += 1;
            debug!(
                "Transaction {:?} unknown to node ({}/{})",
                hash, misses, self.dropped_after_misses
            );
            if misses >= self.dropped_after_misses {
                warn!("Transaction {:?} dropped from the node", hash);
                return Err(TxError::Dropped {
                    hash,
                    nonce: submitted.request.nonce(),
                });
            }
        }
    }
}

/// Resolves once the flag is set; never resolves if the sender is gone
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|flag| *flag).await.is_err() {
        std::future::pending::<()>().await;
    }
}
