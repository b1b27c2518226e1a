//! Per-address mutual exclusion
//!
//! At most one orchestration per account runs at a time; concurrent builders
//! racing for one nonce would produce mutually exclusive transactions.
//! Different addresses never wait on each other.

use crate::config::LockMode;
use crate::error::{TxError, TxResult};

use dashmap::DashMap;
use ethers::types::Address;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::timeout;
use tracing::debug;

type LockMap = DashMap<Address, Arc<Mutex<()>>>;

/// Held for the duration of one orchestration
pub struct AccountGuard {
    address: Address,
    guard: Option<OwnedMutexGuard<()>>,
    registry: Arc<LockMap>,
}

impl AccountGuard {
    pub fn address(&self) -> Address {
        self.address
    }
}

impl Drop for AccountGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Forget the entry once nobody holds or waits on it
        self.registry
            .remove_if(&self.address, |_, lock| Arc::strong_count(lock) == 1);
        debug!("Released account lock for {:?}", self.address);
    }
}

/// Registry of per-address locks
pub struct AccountLocks {
    locks: Arc<LockMap>,
    mode: LockMode,
    wait_limit: Duration,
}

impl AccountLocks {
    pub fn new(mode: LockMode, wait_limit: Duration) -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
            mode,
            wait_limit,
        }
    }

    /// Take the lock for `address`, waiting or failing fast per the mode
    pub async fn acquire(&self, address: Address) -> TxResult<AccountGuard> {
        // Clone out of the map so no shard lock is held across the await
        let lock = self
            .locks
            .entry(address)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let guard = match self.mode {
            LockMode::FailFast => lock
                .try_lock_owned()
                .map_err(|_| TxError::AccountBusy { address })?,
            LockMode::Wait => timeout(self.wait_limit, lock.lock_owned())
                .await
                .map_err(|_| TxError::AccountBusy { address })?,
        };

        debug!("Acquired account lock for {:?}", address);
        Ok(AccountGuard {
            address,
            guard: Some(guard),
            registry: self.locks.clone(),
        })
    }

    /// Whether an orchestration currently holds the lock for `address`
    pub fn is_locked(&self, address: Address) -> bool {
        match self.locks.get(&address) {
            Some(lock) => lock.try_lock().is_err(),
            None => false,
        }
    }
}
