//! Deployment orchestrator
//!
//! Drives one operation through the phase machine while holding the
//! account lock. Nonce-too-low rejections before the first broadcast
//! re-enter `Idle` (bounded); drops resubmit the same request at the same
//! nonce (bounded); everything else is terminal. The caller's timeout
//! bounds the whole operation, resubmissions included.

use super::lock::AccountLocks;
use super::phase::{Phase, PhaseTrail};
use crate::chain::ChainClient;
use crate::config::Settings;
use crate::error::{RejectionReason, TxError, TxResult};
use crate::tx::{
    Account, GasParams, NonceTracker, Receipt, ReceiptWaiter, SubmittedTransaction, Submitter,
    TransactionBuilder, TransactionRequest, TxSigner,
};

use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::get_contract_address;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Retry bounds and timing for orchestrations
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_nonce_retries: u32,
    pub max_drop_resubmits: u32,
    pub poll_interval: Duration,
    pub dropped_after_misses: u32,
    pub default_timeout: Duration,
}

impl OrchestratorConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_nonce_retries: settings.service.max_nonce_retries,
            max_drop_resubmits: settings.service.max_drop_resubmits,
            poll_interval: settings.poll_interval(),
            dropped_after_misses: settings.service.dropped_after_misses,
            default_timeout: settings.receipt_timeout(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_nonce_retries: 3,
            max_drop_resubmits: 3,
            poll_interval: Duration::from_secs(1),
            dropped_after_misses: 3,
            default_timeout: Duration::from_secs(120),
        }
    }
}

/// Confirmed contract creation
#[derive(Debug, Clone)]
pub struct DeployOutcome {
    pub operation_id: Uuid,
    pub contract_address: Address,
    pub block_number: u64,
    pub transaction_hash: H256,
    pub nonce: u64,
    pub trail: PhaseTrail,
}

/// Confirmed transfer or cancellation
#[derive(Debug, Clone)]
pub struct TxOutcome {
    pub operation_id: Uuid,
    pub block_number: u64,
    pub transaction_hash: H256,
    pub nonce: u64,
    pub trail: PhaseTrail,
}

enum Operation {
    Deploy { init_code: Bytes, gas: GasParams },
    Transfer { to: Address, value: U256, gas: GasParams },
    Cancel { gas: GasParams },
}

impl Operation {
    fn label(&self) -> &'static str {
        match self {
            Operation::Deploy { .. } => "deploy",
            Operation::Transfer { .. } => "transfer",
            Operation::Cancel { .. } => "cancel",
        }
    }

    /// New work goes after anything in flight; cancellations reuse the
    /// oldest stuck nonce
    fn select_nonce(&self, account: &Account) -> TxResult<u64> {
        match self {
            Operation::Deploy { .. } | Operation::Transfer { .. } => Ok(account.next_nonce()),
            Operation::Cancel { .. } => {
                account
                    .stuck_nonce()
                    .ok_or(TxError::NothingToCancel {
                        address: account.address,
                        nonce: account.confirmed_nonce,
                    })
            }
        }
    }

    fn build(&self, sender: Address, nonce: u64) -> TxResult<TransactionRequest> {
        match self {
            Operation::Deploy { init_code, gas } => {
                TransactionBuilder::build_deployment(init_code.clone(), nonce, *gas)
            }
            Operation::Transfer { to, value, gas } => {
                Ok(TransactionBuilder::build_transfer(*to, *value, nonce, *gas))
            }
            Operation::Cancel { gas } => {
                Ok(TransactionBuilder::build_cancellation(sender, nonce, *gas))
            }
        }
    }
}

/// Result of a confirmed orchestration before shaping per operation
struct Execution {
    operation_id: Uuid,
    receipt: Receipt,
    nonce: u64,
    trail: PhaseTrail,
}

/// Composes nonce tracking, building, submission and receipt waiting for
/// one signer
pub struct DeploymentOrchestrator {
    tracker: NonceTracker,
    submitter: Submitter,
    waiter: ReceiptWaiter,
    signer: Arc<dyn TxSigner>,
    locks: Arc<AccountLocks>,
    config: OrchestratorConfig,
    shutdown: watch::Receiver<bool>,
}

impl DeploymentOrchestrator {
    /// Create an orchestrator; `locks` may be shared with orchestrators of
    /// other signers on the same client
    pub fn new(
        client: Arc<dyn ChainClient>,
        signer: Arc<dyn TxSigner>,
        locks: Arc<AccountLocks>,
        config: OrchestratorConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            tracker: NonceTracker::new(client.clone()),
            submitter: Submitter::new(client.clone()),
            waiter: ReceiptWaiter::new(client, config.poll_interval, config.dropped_after_misses),
            signer,
            locks,
            config,
            shutdown,
        }
    }

    /// Address of the injected signer
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Fresh nonce snapshot for any address
    pub async fn inspect_account(&self, address: Address) -> TxResult<Account> {
        self.tracker.inspect(address).await
    }

    /// Create a contract from init code with ABI-encoded constructor args
    pub async fn deploy_contract(
        &self,
        init_code_with_args: Bytes,
        gas: GasParams,
        timeout: Option<Duration>,
    ) -> TxResult<DeployOutcome> {
        let sender = self.address();
        let execution = self
            .execute(
                Operation::Deploy {
                    init_code: init_code_with_args,
                    gas,
                },
                timeout,
            )
            .await?;

        let contract_address = match execution.receipt.contract_address {
            Some(address) => address,
            None => {
                warn!(
                    "Receipt {:?} lacks a contract address; deriving it from sender and nonce",
                    execution.receipt.hash
                );
                get_contract_address(sender, execution.nonce)
            }
        };

        info!(
            "Contract deployed to {:?} in block {}",
            contract_address, execution.receipt.block_number
        );

        Ok(DeployOutcome {
            operation_id: execution.operation_id,
            contract_address,
            block_number: execution.receipt.block_number,
            transaction_hash: execution.receipt.hash,
            nonce: execution.nonce,
            trail: execution.trail,
        })
    }

    /// Replace the oldest stuck transaction with a zero-value self-transfer.
    ///
    /// `gas_price_floor` must exceed the stuck transaction's gas price; the
    /// service does not guess a multiplier.
    pub async fn cancel_pending(
        &self,
        gas_price_floor: U256,
        timeout: Option<Duration>,
    ) -> TxResult<TxOutcome> {
        let gas = GasParams::transfer(gas_price_floor)?;
        let execution = self.execute(Operation::Cancel { gas }, timeout).await?;
        Ok(Self::tx_outcome(execution))
    }

    /// Plain value transfer
    pub async fn send_transfer(
        &self,
        to: Address,
        value: U256,
        gas: GasParams,
        timeout: Option<Duration>,
    ) -> TxResult<TxOutcome> {
        let execution = self
            .execute(Operation::Transfer { to, value, gas }, timeout)
            .await?;
        Ok(Self::tx_outcome(execution))
    }

    fn tx_outcome(execution: Execution) -> TxOutcome {
        TxOutcome {
            operation_id: execution.operation_id,
            block_number: execution.receipt.block_number,
            transaction_hash: execution.receipt.hash,
            nonce: execution.nonce,
            trail: execution.trail,
        }
    }

    async fn execute(&self, operation: Operation, timeout: Option<Duration>) -> TxResult<Execution> {
        let operation_id = Uuid::new_v4();
        let label = operation.label();
        let address = self.address();
        let timeout = timeout.unwrap_or(self.config.default_timeout);

        let _guard = self.locks.acquire(address).await.map_err(|e| {
            crate::metrics::record_failed(label, e.kind());
            e
        })?;
        info!("Starting {} {} for {:?}", label, operation_id, address);

        let mut trail = PhaseTrail::new();
        match self.drive(&operation, address, timeout, &mut trail).await {
            Ok((receipt, nonce)) => {
                trail.advance(Phase::Confirmed {
                    block_number: receipt.block_number,
                });
                crate::metrics::record_confirmed(label);
                info!(
                    "{} {} confirmed: {:?} at nonce {} in block {}",
                    label, operation_id, receipt.hash, nonce, receipt.block_number
                );
                Ok(Execution {
                    operation_id,
                    receipt,
                    nonce,
                    trail,
                })
            }
            Err(e) => {
                trail.advance(Phase::Failed {
                    reason: e.to_string(),
                });
                crate::metrics::record_failed(label, e.kind());
                if e.is_recoverable() {
                    warn!("{} {} failed (recoverable): {}", label, operation_id, e);
                } else {
                    error!("{} {} failed: {}", label, operation_id, e);
                }
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        operation: &Operation,
        address: Address,
        timeout: Duration,
        trail: &mut PhaseTrail,
    ) -> TxResult<(Receipt, u64)> {
        let deadline = Instant::now() + timeout;
        let mut nonce_retries = 0;

        'resolve: loop {
            let account = self.tracker.inspect(address).await?;
            let nonce = operation.select_nonce(&account)?;
            trail.advance(Phase::NonceResolved { nonce });

            let request = operation.build(address, nonce)?;
            trail.advance(Phase::Built { nonce });

            let mut drop_resubmits = 0;
            let mut dropped: Option<SubmittedTransaction> = None;
            loop {
                let submitted = match self.submitter.submit(&request, self.signer.as_ref()).await {
                    Ok(submitted) => submitted,
                    Err(e) => match dropped.take() {
                        // Once broadcast, the nonce belongs to this operation
                        Some(previous) => self.reconcile_resubmission(e, previous).await?,
                        None if e.is_nonce_too_low()
                            && nonce_retries < self.config.max_nonce_retries =>
                        {
                            nonce_retries += 1;
                            warn!(
                                "Nonce {} already used, re-resolving ({}/{})",
                                nonce, nonce_retries, self.config.max_nonce_retries
                            );
                            crate::metrics::record_nonce_reresolved();
                            trail.advance(Phase::Idle);
                            continue 'resolve;
                        }
                        None => return Err(e),
                    },
                };
                trail.advance(Phase::Submitted {
                    nonce,
                    hash: submitted.hash,
                });

                let remaining = deadline.saturating_duration_since(Instant::now());
                let mut shutdown = self.shutdown.clone();
                match self
                    .waiter
                    .await_receipt_or_cancel(&submitted, remaining, &mut shutdown)
                    .await
                {
                    Ok(receipt) if receipt.is_success() => return Ok((receipt, nonce)),
                    Ok(receipt) => {
                        return Err(TxError::Reverted {
                            hash: receipt.hash,
                            block_number: receipt.block_number,
                        })
                    }
                    Err(TxError::Timeout { hash, nonce, .. }) => {
                        return Err(TxError::Timeout {
                            hash,
                            nonce,
                            waited: timeout,
                        })
                    }
                    Err(TxError::Dropped { hash, .. })
                        if drop_resubmits < self.config.max_drop_resubmits =>
                    {
                        drop_resubmits += 1;
                        warn!(
                            "Transaction {:?} dropped, resubmitting at nonce {} ({}/{})",
                            hash, nonce, drop_resubmits, self.config.max_drop_resubmits
                        );
                        crate::metrics::record_dropped_resubmit();
                        trail.advance(Phase::Built { nonce });
                        dropped = Some(submitted);
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }

    /// The node refused a same-nonce resubmission. Either the earlier
    /// broadcast is still live or mined, and waiting resumes on it, or the
    /// nonce went to some other transaction.
    async fn reconcile_resubmission(
        &self,
        err: TxError,
        previous: SubmittedTransaction,
    ) -> TxResult<SubmittedTransaction> {
        match err {
            TxError::Submission {
                reason: RejectionReason::AlreadyKnown,
                ..
            } => {
                info!("Node still holds {:?}; resuming wait", previous.hash);
                Ok(previous)
            }
            TxError::Submission {
                reason: RejectionReason::NonceTooLow,
                message,
                nonce,
                ..
            } => match self.waiter.receipt(previous.hash).await? {
                Some(receipt) => {
                    info!(
                        "Transaction {:?} was mined in block {} after all",
                        previous.hash, receipt.block_number
                    );
                    Ok(previous)
                }
                None => {
                    error!(
                        "Nonce {} is used on chain but {:?} has no receipt",
                        nonce, previous.hash
                    );
                    Err(TxError::Submission {
                        reason: RejectionReason::NonceTooLow,
                        message,
                        nonce,
                        hash: Some(previous.hash),
                    })
                }
            },
            other => Err(other),
        }
    }
}
