//! Deterministic in-memory chain and signer for tests

use super::{BlockTag, ChainClient, ClientError, ClientResult};
use crate::error::{TxError, TxResult};
use crate::tx::{Receipt, ReceiptStatus, TransactionRequest, TxSigner};

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256};
use ethers::utils::{get_contract_address, keccak256};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

/// What the chain does with the next broadcast
#[derive(Debug, Clone)]
pub enum SendOutcome {
    /// Accept and mine on the next receipt poll
    Mine,
    /// Accept and mine with a failed status
    Revert,
    /// Accept, then forget the transaction
    Drop,
    /// Accept and keep it pending forever
    Stall,
    /// Accept but stay invisible until the next broadcast reaches the
    /// node, then mine normally
    Vanish,
    /// Reject with a node error message
    Reject(String),
    /// Fail at the transport layer
    Unreachable,
}

/// Payload produced by `FakeSigner` in place of RLP
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedPayload {
    pub from: Address,
    pub request: TransactionRequest,
}

struct PendingTx {
    from: Address,
    request: TransactionRequest,
    revert: bool,
}

#[derive(Default)]
struct ChainState {
    confirmed: HashMap<Address, u64>,
    pending: HashMap<Address, u64>,
    /// Overrides the counters reported for an address
    reported: HashMap<Address, (u64, u64)>,
    script: VecDeque<SendOutcome>,
    mempool: HashMap<H256, PendingTx>,
    vanished: Vec<(H256, PendingTx)>,
    stalled: HashSet<H256>,
    receipts: HashMap<H256, Receipt>,
    sent: Vec<SignedPayload>,
    block: u64,
    count_calls: Vec<BlockTag>,
    count_failure: Option<String>,
}

/// Scripted chain: broadcasts follow the queued outcomes, defaulting to `Mine`
pub struct ScriptedChain {
    chain_id: u64,
    state: Mutex<ChainState>,
}

impl ScriptedChain {
    pub fn new() -> Self {
        Self {
            chain_id: 97,
            state: Mutex::new(ChainState {
                block: 100,
                ..Default::default()
            }),
        }
    }

    /// Set the on-chain confirmed count and the pending count for an address
    pub fn set_nonces(&self, address: Address, confirmed: u64, pending: u64) {
        let mut state = self.state.lock().unwrap();
        state.confirmed.insert(address, confirmed);
        state.pending.insert(address, pending);
    }

    /// Report these counters regardless of chain activity
    pub fn report_nonces(&self, address: Address, confirmed: u64, pending: u64) {
        self.state
            .lock()
            .unwrap()
            .reported
            .insert(address, (confirmed, pending));
    }

    pub fn fail_counts(&self, message: &str) {
        self.state.lock().unwrap().count_failure = Some(message.to_string());
    }

    pub fn push_outcomes(&self, outcomes: impl IntoIterator<Item = SendOutcome>) {
        self.state.lock().unwrap().script.extend(outcomes);
    }

    /// Every payload that reached the node, accepted or not
    pub fn sent(&self) -> Vec<SignedPayload> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn count_calls(&self) -> Vec<BlockTag> {
        self.state.lock().unwrap().count_calls.clone()
    }

    pub fn confirmed_nonce(&self, address: Address) -> u64 {
        self.state
            .lock()
            .unwrap()
            .confirmed
            .get(&address)
            .copied()
            .unwrap_or(0)
    }

    /// Mine everything in the mempool
    fn mine_pending(state: &mut ChainState) {
        let hashes: Vec<H256> = state
            .mempool
            .keys()
            .filter(|h| !state.stalled.contains(*h))
            .copied()
            .collect();

        for hash in hashes {
            let Some(tx) = state.mempool.remove(&hash) else {
                continue;
            };
            state.block += 1;

            let contract_address = (tx.request.is_contract_creation() && !tx.revert)
                .then(|| get_contract_address(tx.from, tx.request.nonce()));
            let status = if tx.revert {
                ReceiptStatus::Reverted
            } else {
                ReceiptStatus::Success
            };

            let confirmed = state.confirmed.entry(tx.from).or_insert(0);
            *confirmed = (*confirmed).max(tx.request.nonce() + 1);
            let confirmed = *confirmed;
            let pending = state.pending.entry(tx.from).or_insert(0);
            *pending = (*pending).max(confirmed);

            state.receipts.insert(
                hash,
                Receipt {
                    hash,
                    block_number: state.block,
                    contract_address,
                    status,
                },
            );
        }
    }
}

#[async_trait]
impl ChainClient for ScriptedChain {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn transaction_count(&self, address: Address, tag: BlockTag) -> ClientResult<u64> {
        let mut state = self.state.lock().unwrap();
        state.count_calls.push(tag);

        if let Some(message) = &state.count_failure {
            return Err(ClientError::Transport(message.clone()));
        }

        if let Some((confirmed, pending)) = state.reported.get(&address) {
            return Ok(match tag {
                BlockTag::Latest => *confirmed,
                BlockTag::Pending => *pending,
            });
        }

        let map = match tag {
            BlockTag::Latest => &state.confirmed,
            BlockTag::Pending => &state.pending,
        };
        Ok(map.get(&address).copied().unwrap_or(0))
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> ClientResult<H256> {
        let payload: SignedPayload = serde_json::from_slice(&raw)
            .map_err(|e| ClientError::Rejected(format!("rlp: {}", e)))?;

        let mut state = self.state.lock().unwrap();
        state.sent.push(payload.clone());

        for (hash, tx) in std::mem::take(&mut state.vanished) {
            let pending = state.pending.entry(tx.from).or_insert(0);
            *pending = (*pending).max(tx.request.nonce() + 1);
            state.mempool.insert(hash, tx);
        }

        let outcome = state.script.pop_front().unwrap_or(SendOutcome::Mine);
        let hash = H256::from(keccak256(&raw));
        let nonce = payload.request.nonce();
        let from = payload.from;

        let (stall, revert) = match outcome {
            SendOutcome::Reject(message) => return Err(ClientError::Rejected(message)),
            SendOutcome::Unreachable => {
                return Err(ClientError::Transport("connection refused".to_string()))
            }
            SendOutcome::Drop => return Ok(hash),
            SendOutcome::Vanish => {
                state.vanished.push((
                    hash,
                    PendingTx {
                        from,
                        request: payload.request,
                        revert: false,
                    },
                ));
                return Ok(hash);
            }
            SendOutcome::Stall => (true, false),
            SendOutcome::Revert => (false, true),
            SendOutcome::Mine => (false, false),
        };

        if stall {
            state.stalled.insert(hash);
        }
        state.mempool.insert(
            hash,
            PendingTx {
                from,
                request: payload.request,
                revert,
            },
        );

        let pending = state.pending.entry(from).or_insert(0);
        *pending = (*pending).max(nonce + 1);
        Ok(hash)
    }

    async fn transaction_receipt(&self, hash: H256) -> ClientResult<Option<Receipt>> {
        let mut state = self.state.lock().unwrap();
        Self::mine_pending(&mut state);
        Ok(state.receipts.get(&hash).cloned())
    }

    async fn transaction_known(&self, hash: H256) -> ClientResult<bool> {
        let state = self.state.lock().unwrap();
        Ok(state.mempool.contains_key(&hash) || state.receipts.contains_key(&hash))
    }
}

/// Signer that serializes the request instead of producing RLP
pub struct FakeSigner {
    address: Address,
}

impl FakeSigner {
    pub fn new(address: Address) -> Self {
        Self { address }
    }
}

#[async_trait]
impl TxSigner for FakeSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign(&self, request: &TransactionRequest, _chain_id: u64) -> TxResult<Bytes> {
        let payload = SignedPayload {
            from: self.address,
            request: request.clone(),
        };
        serde_json::to_vec(&payload)
            .map(Bytes::from)
            .map_err(|e| TxError::Wallet(e.to_string()))
    }
}
