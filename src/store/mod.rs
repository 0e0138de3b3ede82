use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::wallet::{PendingTransaction, Transaction, Wallet, WalletId};

pub mod in_memory;
pub mod journal;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Wallet `{wallet_id}` is at version {actual}, expected {expected}")]
    VersionConflict {
        wallet_id: WalletId,
        expected: u64,
        actual: u64,
    },
    #[error("Journal I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Journal record could not be encoded: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Journal is corrupted at line {line}: {reason}")]
    Corrupted { line: usize, reason: String },
    #[error("Journal is not writable after a failed rollback")]
    Unwritable,
    #[error("{0}")]
    Other(String),
}

/// Entry of a [`Commit`]: a decided transaction plus the wallet version it
/// was decided against.
#[derive(Debug, Clone)]
pub struct CommitEntry {
    pub pending: PendingTransaction,
    pub expected_version: u64,
}

/// Unit of atomic persistence. All entries are written, or none.
#[derive(Debug, Clone)]
pub struct Commit {
    pub created_at: DateTime<Utc>,
    pub entries: Vec<CommitEntry>,
}

/// Durable record of wallets and their append-only transaction log.
///
/// Readers never observe a partially applied [`Commit`].
pub trait LedgerStore: Send + Sync {
    fn wallet(&self, wallet_id: &WalletId) -> Option<Wallet>;

    /// All wallets, ordered by id.
    fn wallets(&self) -> Vec<Wallet>;

    /// Returns the wallet, creating it with a zero balance first if needed.
    fn ensure_wallet(&self, wallet_id: &WalletId, now: DateTime<Utc>)
    -> Result<Wallet, StoreError>;

    /// Whole log ordered by (`created_at`, `id`).
    fn transactions(&self) -> Vec<Transaction>;

    /// Log of one wallet ordered by (`created_at`, `id`).
    fn wallet_transactions(&self, wallet_id: &WalletId) -> Vec<Transaction>;

    /// Verifies every expected version, then persists all entries and the
    /// resulting wallet balances together. Wallets referenced for the first
    /// time are created with a zero balance.
    fn commit(&self, commit: Commit) -> Result<Vec<Transaction>, StoreError>;
}
