use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::LedgerError;

pub type TransactionId = u64;

/// Opaque wallet identifier.
///
/// Ordering is used as the global lock order, so it must stay total and stable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletId(String);

impl WalletId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Client supplied key of one logical operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Deposit,
    Withdraw,
    TransferOut,
    TransferIn,
}

impl TransactionKind {
    /// Whether a completed transaction of this kind adds to the balance.
    pub fn is_credit(self) -> bool {
        matches!(self, TransactionKind::Deposit | TransactionKind::TransferIn)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Completed,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    InsufficientFunds,
}

/// Immutable ledger record. Written once, directly in a terminal status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub wallet_id: WalletId,
    pub counterparty_wallet_id: Option<WalletId>,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub status: TransactionStatus,
    pub reject_reason: Option<RejectReason>,
    pub request_id: RequestId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn is_completed(&self) -> bool {
        self.status == TransactionStatus::Completed
    }
}

/// Transaction decided by the balance engine but not yet committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTransaction {
    pub wallet_id: WalletId,
    pub counterparty_wallet_id: Option<WalletId>,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub status: TransactionStatus,
    pub reject_reason: Option<RejectReason>,
    pub request_id: RequestId,
}

impl PendingTransaction {
    pub fn into_transaction(self, id: TransactionId, created_at: DateTime<Utc>) -> Transaction {
        Transaction {
            id,
            wallet_id: self.wallet_id,
            counterparty_wallet_id: self.counterparty_wallet_id,
            kind: self.kind,
            amount: self.amount,
            balance_after: self.balance_after,
            status: self.status,
            reject_reason: self.reject_reason,
            request_id: self.request_id,
            created_at,
            updated_at: created_at,
        }
    }
}

/// Current state of a wallet. The balance is a cached projection of the
/// latest completed transaction of that wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub balance: Decimal,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(id: WalletId, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            balance: Decimal::ZERO,
            version: 0,
            created_at,
            updated_at: created_at,
        }
    }

    /// Applies a committed transaction. Rejected records leave the wallet untouched.
    pub fn apply(&mut self, tx: &Transaction) {
        if !tx.is_completed() {
            return;
        }
        self.balance = tx.balance_after;
        self.version += 1;
        self.updated_at = tx.created_at;
    }

    pub fn handle_deposit(
        &self,
        amount: Decimal,
        request_id: &RequestId,
    ) -> Result<PendingTransaction, LedgerError> {
        let balance_after = self.credited(amount)?;
        Ok(self.completed(TransactionKind::Deposit, None, balance_after, amount, request_id))
    }

    /// Returns either a completed withdrawal or a rejected record when the
    /// balance cannot cover `amount`.
    pub fn handle_withdraw(&self, amount: Decimal, request_id: &RequestId) -> PendingTransaction {
        if self.balance >= amount {
            self.completed(
                TransactionKind::Withdraw,
                None,
                self.balance - amount,
                amount,
                request_id,
            )
        } else {
            self.rejected(TransactionKind::Withdraw, None, amount, request_id)
        }
    }

    /// Decides both legs of a transfer from `self` to `to`. The legs are
    /// either both completed or both rejected.
    pub fn handle_transfer(
        &self,
        to: &Wallet,
        amount: Decimal,
        request_id: &RequestId,
    ) -> Result<[PendingTransaction; 2], LedgerError> {
        if self.balance >= amount {
            let credited = to.credited(amount)?;
            Ok([
                self.completed(
                    TransactionKind::TransferOut,
                    Some(&to.id),
                    self.balance - amount,
                    amount,
                    request_id,
                ),
                to.completed(
                    TransactionKind::TransferIn,
                    Some(&self.id),
                    credited,
                    amount,
                    request_id,
                ),
            ])
        } else {
            Ok([
                self.rejected(TransactionKind::TransferOut, Some(&to.id), amount, request_id),
                to.rejected(TransactionKind::TransferIn, Some(&self.id), amount, request_id),
            ])
        }
    }

    fn credited(&self, amount: Decimal) -> Result<Decimal, LedgerError> {
        self.balance
            .checked_add(amount)
            .ok_or_else(|| LedgerError::InvalidAmount {
                amount: amount.to_string(),
                reason: "balance would overflow".to_string(),
            })
    }

    fn completed(
        &self,
        kind: TransactionKind,
        counterparty: Option<&WalletId>,
        balance_after: Decimal,
        amount: Decimal,
        request_id: &RequestId,
    ) -> PendingTransaction {
        PendingTransaction {
            wallet_id: self.id.clone(),
            counterparty_wallet_id: counterparty.cloned(),
            kind,
            amount,
            balance_after,
            status: TransactionStatus::Completed,
            reject_reason: None,
            request_id: request_id.clone(),
        }
    }

    fn rejected(
        &self,
        kind: TransactionKind,
        counterparty: Option<&WalletId>,
        amount: Decimal,
        request_id: &RequestId,
    ) -> PendingTransaction {
        PendingTransaction {
            wallet_id: self.id.clone(),
            counterparty_wallet_id: counterparty.cloned(),
            kind,
            amount,
            balance_after: self.balance,
            status: TransactionStatus::Rejected,
            reject_reason: Some(RejectReason::InsufficientFunds),
            request_id: request_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallet(id: &str, balance: i64) -> Wallet {
        Wallet {
            balance: Decimal::from(balance),
            ..Wallet::new(WalletId::new(id), Utc::now())
        }
    }

    #[test]
    fn apply_transactions() {
        let mut w = wallet("a", 0);
        let request_id = RequestId::new("r1");
        let deposit = w
            .handle_deposit(Decimal::from(10), &request_id)
            .unwrap()
            .into_transaction(1, Utc::now());
        w.apply(&deposit);
        assert_eq!(w.balance, Decimal::from(10));
        assert_eq!(w.version, 1);

        let rejected = w
            .handle_withdraw(Decimal::from(11), &RequestId::new("r2"))
            .into_transaction(2, Utc::now());
        assert_eq!(rejected.status, TransactionStatus::Rejected);
        assert_eq!(rejected.reject_reason, Some(RejectReason::InsufficientFunds));
        assert_eq!(rejected.balance_after, Decimal::from(10));
        // rejected records never move the balance
        w.apply(&rejected);
        assert_eq!(w.balance, Decimal::from(10));
        assert_eq!(w.version, 1);

        let withdrawal = w
            .handle_withdraw(Decimal::from(10), &RequestId::new("r3"))
            .into_transaction(3, Utc::now());
        w.apply(&withdrawal);
        assert_eq!(w.balance, Decimal::ZERO);
        assert_eq!(w.version, 2);
    }

    #[test]
    fn transfer_legs_are_paired() {
        let from = wallet("a", 10);
        let to = wallet("b", 1);
        let request_id = RequestId::new("t1");

        let [out, inc] = from
            .handle_transfer(&to, Decimal::from(4), &request_id)
            .unwrap();
        assert_eq!(out.kind, TransactionKind::TransferOut);
        assert_eq!(out.balance_after, Decimal::from(6));
        assert_eq!(out.counterparty_wallet_id, Some(to.id.clone()));
        assert_eq!(inc.kind, TransactionKind::TransferIn);
        assert_eq!(inc.balance_after, Decimal::from(5));
        assert_eq!(inc.counterparty_wallet_id, Some(from.id.clone()));
        assert_eq!(out.request_id, inc.request_id);

        let [out, inc] = from
            .handle_transfer(&to, Decimal::from(11), &request_id)
            .unwrap();
        assert_eq!(out.status, TransactionStatus::Rejected);
        assert_eq!(inc.status, TransactionStatus::Rejected);
        assert_eq!(out.balance_after, Decimal::from(10));
        assert_eq!(inc.balance_after, Decimal::from(1));
    }

    #[test]
    fn credits_that_would_overflow_are_refused() {
        let full = Wallet {
            balance: Decimal::MAX,
            ..Wallet::new(WalletId::new("full"), Utc::now())
        };
        let request_id = RequestId::new("r");

        let err = full.handle_deposit(Decimal::ONE, &request_id).unwrap_err();
        assert_eq!(err.reason_code(), "INVALID_AMOUNT");

        let from = wallet("a", 10);
        let err = from
            .handle_transfer(&full, Decimal::ONE, &request_id)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid amount `1`: balance would overflow"
        );
    }

    #[test]
    fn withdraw_exact_balance() {
        let w = wallet("a", 5);
        let pending = w.handle_withdraw(Decimal::from(5), &RequestId::new("r"));
        assert_eq!(pending.status, TransactionStatus::Completed);
        assert_eq!(pending.balance_after, Decimal::ZERO);
    }

    #[test]
    fn wallet_ids_order_lexicographically() {
        assert!(WalletId::new("a") < WalletId::new("b"));
        assert_ne!(WalletId::generate(), WalletId::generate());
    }
}
