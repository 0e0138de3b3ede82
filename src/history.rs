use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::wallet::{Transaction, WalletId};

/// Balance of a wallet as of `at`: the `balance_after` of its latest
/// completed transaction created at or before `at`, zero if there is none.
///
/// `transactions` must be one wallet's log ordered by (`created_at`, `id`).
pub fn balance_at(transactions: &[Transaction], at: DateTime<Utc>) -> Decimal {
    let end = transactions.partition_point(|tx| tx.created_at <= at);
    transactions[..end]
        .iter()
        .rev()
        .find(|tx| tx.is_completed())
        .map_or(Decimal::ZERO, |tx| tx.balance_after)
}

/// Recomputes a balance from completed amounts alone, ignoring the cached
/// `balance_after` values.
pub fn replay_balance(transactions: &[Transaction]) -> Decimal {
    transactions
        .iter()
        .filter(|tx| tx.is_completed())
        .fold(Decimal::ZERO, |balance, tx| {
            if tx.kind.is_credit() {
                balance + tx.amount
            } else {
                balance - tx.amount
            }
        })
}

/// Cross-check of a wallet's cached balance against its log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub wallet_id: WalletId,
    pub balance: Decimal,
    pub last_balance_after: Decimal,
    pub replayed_balance: Decimal,
    pub completed: usize,
    pub rejected: usize,
}

impl AuditReport {
    pub fn new(wallet_id: WalletId, balance: Decimal, transactions: &[Transaction]) -> Self {
        let completed = transactions.iter().filter(|tx| tx.is_completed()).count();
        Self {
            wallet_id,
            balance,
            last_balance_after: balance_at(transactions, DateTime::<Utc>::MAX_UTC),
            replayed_balance: replay_balance(transactions),
            completed,
            rejected: transactions.len() - completed,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.balance >= Decimal::ZERO
            && self.balance == self.last_balance_after
            && self.balance == self.replayed_balance
    }
}
