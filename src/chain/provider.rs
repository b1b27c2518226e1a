//! Chain provider with multi-RPC support and automatic failover

use super::{BlockTag, ChainClient, ClientError, ClientResult};
use crate::config::ChainConfig;
use crate::error::{TxError, TxResult};
use crate::tx::{Receipt, ReceiptStatus};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, Provider, ProviderError, RpcError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Multi-provider wrapper with automatic failover
///
/// Reads rotate to the next RPC URL on transport failure. Broadcasts go to
/// the active provider exactly once.
pub struct ChainProvider {
    /// Chain configuration
    config: ChainConfig,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
}

impl ChainProvider {
    /// Create a new chain provider
    pub fn new(config: ChainConfig) -> TxResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider =
                        provider.interval(Duration::from_millis(config.request_interval_ms));
                    http_providers.push(provider);
                    debug!("Added HTTP provider for chain {}: {}", config.chain_id, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(TxError::Config(format!(
                "No valid RPC providers for chain {}",
                config.chain_id
            )));
        }

        Ok(Self {
            config,
            http_providers,
            current_provider: AtomicUsize::new(0),
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.config.chain_id, next);
    }

    /// Chain name from configuration
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Run a read against each provider in turn until one answers.
    /// Node-level rejections are returned immediately.
    async fn read_with_failover<T, F, Fut>(&self, operation: &str, call: F) -> ClientResult<T>
    where
        F: Fn(Provider<Http>) -> Fut,
        Fut: std::future::Future<Output = Result<T, ProviderError>>,
    {
        let mut last_error = None;

        for _ in 0..self.http_providers.len() {
            match call(self.http().clone()).await {
                Ok(value) => return Ok(value),
                Err(e) => match classify_provider_error(e) {
                    ClientError::Transport(message) => {
                        warn!(
                            "{} failed on chain {}: {}",
                            operation, self.config.chain_id, message
                        );
                        last_error = Some(ClientError::Transport(message));
                        self.failover();
                    }
                    other => return Err(other),
                },
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ClientError::Transport(format!("All providers failed during {}", operation))
        }))
    }
}

#[async_trait]
impl ChainClient for ChainProvider {
    fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    async fn transaction_count(&self, address: Address, tag: BlockTag) -> ClientResult<u64> {
        let block = match tag {
            BlockTag::Latest => BlockNumber::Latest,
            BlockTag::Pending => BlockNumber::Pending,
        };

        let count = self
            .read_with_failover("eth_getTransactionCount", |p| async move {
                p.get_transaction_count(address, Some(block.into())).await
            })
            .await?;

        if count > U256::from(u64::MAX) {
            return Err(ClientError::Malformed(format!(
                "transaction count {} does not fit in u64",
                count
            )));
        }
        Ok(count.as_u64())
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> ClientResult<H256> {
        self.http()
            .send_raw_transaction(raw)
            .await
            .map(|pending| pending.tx_hash())
            .map_err(classify_provider_error)
    }

    async fn transaction_receipt(&self, hash: H256) -> ClientResult<Option<Receipt>> {
        let receipt = self
            .read_with_failover("eth_getTransactionReceipt", |p| async move {
                p.get_transaction_receipt(hash).await
            })
            .await?;

        match receipt {
            Some(receipt) => convert_receipt(receipt),
            None => Ok(None),
        }
    }

    async fn transaction_known(&self, hash: H256) -> ClientResult<bool> {
        let tx = self
            .read_with_failover("eth_getTransactionByHash", |p| async move {
                p.get_transaction(hash).await
            })
            .await?;

        Ok(tx.is_some())
    }
}

/// Split provider errors into node rejections and transport failures
fn classify_provider_error(e: ProviderError) -> ClientError {
    if let Some(resp) = RpcError::as_error_response(&e) {
        return ClientError::Rejected(resp.message.clone());
    }
    if RpcError::as_serde_error(&e).is_some() {
        return ClientError::Malformed(e.to_string());
    }
    ClientError::Transport(e.to_string())
}

/// Map an ethers receipt; a receipt without a block is not yet mined
fn convert_receipt(receipt: TransactionReceipt) -> ClientResult<Option<Receipt>> {
    let block_number = match receipt.block_number {
        Some(block) => block.as_u64(),
        None => return Ok(None),
    };

    let status = match receipt.status.map(|s| s.as_u64()) {
        Some(1) => ReceiptStatus::Success,
        Some(0) => ReceiptStatus::Reverted,
        other => {
            return Err(ClientError::Malformed(format!(
                "unexpected receipt status {:?} for {:?}",
                other, receipt.transaction_hash
            )))
        }
    };

    Ok(Some(Receipt {
        hash: receipt.transaction_hash,
        block_number,
        contract_address: receipt.contract_address,
        status,
    }))
}
