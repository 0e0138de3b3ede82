use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::wallet::{Transaction, TransactionId, Wallet, WalletId};

use super::{Commit, LedgerStore, StoreError};

/// Wallets, the global log and a per-wallet index into it.
#[derive(Debug, Default)]
pub(crate) struct LedgerState {
    wallets: HashMap<WalletId, Wallet>,
    log: Vec<Transaction>,
    by_wallet: HashMap<WalletId, Vec<usize>>,
}

impl LedgerState {
    /// Checks the commit against the current state and assigns ids and the
    /// creation time. Does not modify anything.
    pub(crate) fn prepare(&self, commit: Commit) -> Result<Vec<Transaction>, StoreError> {
        let mut created_at = commit.created_at;
        for entry in &commit.entries {
            let wallet_id = &entry.pending.wallet_id;
            let actual = self.wallets.get(wallet_id).map_or(0, |w| w.version);
            if actual != entry.expected_version {
                return Err(StoreError::VersionConflict {
                    wallet_id: wallet_id.clone(),
                    expected: entry.expected_version,
                    actual,
                });
            }
            // creation times never go backwards within a wallet
            if let Some(last) = self.last_transaction(wallet_id) {
                created_at = created_at.max(last.created_at);
            }
        }

        let first_id = self.next_id();
        Ok(commit
            .entries
            .into_iter()
            .zip(first_id..)
            .map(|(entry, id)| entry.pending.into_transaction(id, created_at))
            .collect())
    }

    pub(crate) fn apply(&mut self, transactions: &[Transaction]) {
        for tx in transactions {
            self.wallets
                .entry(tx.wallet_id.clone())
                .or_insert_with(|| Wallet::new(tx.wallet_id.clone(), tx.created_at))
                .apply(tx);
            self.by_wallet
                .entry(tx.wallet_id.clone())
                .or_default()
                .push(self.log.len());
            self.log.push(tx.clone());
        }
    }

    /// Inserts the wallet unless one with the same id exists. Returns whether it was new.
    pub(crate) fn insert_wallet(&mut self, wallet: Wallet) -> bool {
        if self.wallets.contains_key(&wallet.id) {
            return false;
        }
        self.wallets.insert(wallet.id.clone(), wallet);
        true
    }

    pub(crate) fn wallet(&self, wallet_id: &WalletId) -> Option<&Wallet> {
        self.wallets.get(wallet_id)
    }

    pub(crate) fn wallets(&self) -> Vec<Wallet> {
        let mut wallets: Vec<_> = self.wallets.values().cloned().collect();
        wallets.sort_by(|a, b| a.id.cmp(&b.id));
        wallets
    }

    pub(crate) fn transactions(&self) -> Vec<Transaction> {
        let mut log = self.log.clone();
        log.sort_by_key(|tx| (tx.created_at, tx.id));
        log
    }

    pub(crate) fn wallet_transactions(&self, wallet_id: &WalletId) -> Vec<Transaction> {
        self.by_wallet
            .get(wallet_id)
            .map(|indexes| indexes.iter().map(|&i| self.log[i].clone()).collect())
            .unwrap_or_default()
    }

    fn last_transaction(&self, wallet_id: &WalletId) -> Option<&Transaction> {
        let index = *self.by_wallet.get(wallet_id)?.last()?;
        Some(&self.log[index])
    }

    fn next_id(&self) -> TransactionId {
        self.log.last().map_or(1, |tx| tx.id + 1)
    }
}

/// Volatile store, mostly useful for tests and short-lived batch runs.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    state: RwLock<LedgerState>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn wallet(&self, wallet_id: &WalletId) -> Option<Wallet> {
        self.state.read().wallet(wallet_id).cloned()
    }

    fn wallets(&self) -> Vec<Wallet> {
        self.state.read().wallets()
    }

    fn ensure_wallet(
        &self,
        wallet_id: &WalletId,
        now: DateTime<Utc>,
    ) -> Result<Wallet, StoreError> {
        let mut state = self.state.write();
        state.insert_wallet(Wallet::new(wallet_id.clone(), now));
        state
            .wallet(wallet_id)
            .cloned()
            .ok_or_else(|| StoreError::Other(format!("wallet `{wallet_id}` vanished")))
    }

    fn transactions(&self) -> Vec<Transaction> {
        self.state.read().transactions()
    }

    fn wallet_transactions(&self, wallet_id: &WalletId) -> Vec<Transaction> {
        self.state.read().wallet_transactions(wallet_id)
    }

    fn commit(&self, commit: Commit) -> Result<Vec<Transaction>, StoreError> {
        let mut state = self.state.write();
        let transactions = state.prepare(commit)?;
        state.apply(&transactions);
        Ok(transactions)
    }
}
