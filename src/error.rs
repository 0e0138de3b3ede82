use rust_decimal::Decimal;
use thiserror::Error;

use crate::wallet::{TransactionId, WalletId};

/// Outcome errors of a single ledger operation.
///
/// Errors are cloneable so that an outcome recorded under a request id can be
/// replayed to duplicates exactly as the first caller saw it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("Invalid amount `{amount}`: {reason}")]
    InvalidAmount { amount: String, reason: String },
    #[error("Invalid transfer: {reason}")]
    InvalidTransfer { reason: String },
    #[error("Wallet `{0}` not found")]
    WalletNotFound(WalletId),
    #[error("Insufficient funds in wallet `{wallet_id}`: balance {balance}, requested {requested}")]
    InsufficientFunds {
        wallet_id: WalletId,
        balance: Decimal,
        requested: Decimal,
        /// The REJECTED record written for this attempt.
        transaction_id: TransactionId,
    },
    #[error("Timed out waiting for the lock of wallet `{0}`")]
    LockTimeout(WalletId),
    #[error("Concurrent modification detected: {0}")]
    ConcurrencyConflict(String),
    #[error("Request `{0}` is still being processed, retry later")]
    RequestInFlight(String),
    #[error("Request `{0}` was already used for a different kind of operation")]
    RequestIdReused(String),
    #[error("Transfer could not be committed as a unit: {0}")]
    AtomicityFailure(String),
    #[error("Storage failure: {0}")]
    Storage(String),
}

impl LedgerError {
    /// Stable code that identifies the kind of failure, independent of the message.
    pub fn reason_code(&self) -> &'static str {
        match self {
            LedgerError::InvalidAmount { .. } => "INVALID_AMOUNT",
            LedgerError::InvalidTransfer { .. } => "INVALID_TRANSFER",
            LedgerError::WalletNotFound(_) => "WALLET_NOT_FOUND",
            LedgerError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            LedgerError::LockTimeout(_) => "LOCK_TIMEOUT",
            LedgerError::ConcurrencyConflict(_) => "CONCURRENCY_CONFLICT",
            LedgerError::RequestInFlight(_) => "REQUEST_IN_FLIGHT",
            LedgerError::RequestIdReused(_) => "REQUEST_ID_REUSED",
            LedgerError::AtomicityFailure(_) => "ATOMICITY_FAILURE",
            LedgerError::Storage(_) => "STORAGE",
        }
    }

    /// Transient failures leave no trace in the ledger and may be retried,
    /// with the same request id or a fresh one.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::LockTimeout(_)
                | LedgerError::ConcurrencyConflict(_)
                | LedgerError::RequestInFlight(_)
                | LedgerError::AtomicityFailure(_)
                | LedgerError::Storage(_)
        )
    }
}
