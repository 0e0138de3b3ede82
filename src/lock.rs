use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{error::LedgerError, wallet::WalletId};

/// Per-wallet exclusive locks.
///
/// Multi-wallet acquisition always happens in ascending [`WalletId`] order,
/// so two operations over the same pair can never wait on each other in a cycle.
#[derive(Debug)]
pub struct WalletLocks {
    table: Mutex<HashMap<WalletId, Arc<Mutex<()>>>>,
    timeout: Duration,
}

impl WalletLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Runs `critical` while holding the locks of every wallet in `wallets`.
    ///
    /// Fails with [`LedgerError::LockTimeout`] if all locks cannot be taken
    /// within the configured timeout. Nothing runs in that case and any lock
    /// taken so far is released.
    pub fn with_locked<T>(
        &self,
        wallets: &[&WalletId],
        critical: impl FnOnce() -> T,
    ) -> Result<T, LedgerError> {
        let mut ordered = wallets.to_vec();
        ordered.sort();
        ordered.dedup();

        let handles: Vec<_> = ordered.iter().map(|id| (*id, self.handle(id))).collect();
        let deadline = Instant::now() + self.timeout;
        let mut guards = Vec::with_capacity(handles.len());
        for (wallet_id, handle) in &handles {
            match handle.try_lock_until(deadline) {
                Some(guard) => guards.push(guard),
                None => {
                    warn!(wallet_id = %wallet_id, timeout = ?self.timeout, "wallet lock timed out");
                    return Err(LedgerError::LockTimeout((*wallet_id).clone()));
                }
            }
        }
        debug!(wallets = ?ordered, "wallet locks acquired");

        let result = critical();
        drop(guards);
        Ok(result)
    }

    /// Number of wallets that have a lock entry.
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn handle(&self, wallet_id: &WalletId) -> Arc<Mutex<()>> {
        self.table
            .lock()
            .entry(wallet_id.clone())
            .or_default()
            .clone()
    }
}
