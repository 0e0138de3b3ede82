use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::{
    command::{Operation, Outcome, Receipt, validate_amount},
    config::LedgerConfig,
    error::LedgerError,
    guard::IdempotencyGuard,
    history::{AuditReport, balance_at},
    lock::WalletLocks,
    store::{Commit, CommitEntry, LedgerStore, StoreError, in_memory::InMemoryLedgerStore},
    wallet::{PendingTransaction, RequestId, Transaction, TransactionStatus, Wallet, WalletId},
};

/// Wallet ledger: idempotent, per-wallet serialized balance mutations over
/// an append-only transaction log.
///
/// Mutations go through the idempotency guard, then take the wallet locks,
/// decide against the locked balances and commit before the locks are
/// released. Reads go straight to the store and only see committed state.
pub struct Ledger<S = InMemoryLedgerStore> {
    store: S,
    locks: WalletLocks,
    guard: IdempotencyGuard,
    max_scale: u32,
}

impl Ledger<InMemoryLedgerStore> {
    pub fn in_memory(config: &LedgerConfig) -> Self {
        Self::new(InMemoryLedgerStore::new(), config)
    }
}

impl<S: LedgerStore> Ledger<S> {
    pub fn new(store: S, config: &LedgerConfig) -> Self {
        Self {
            store,
            locks: WalletLocks::new(config.lock_timeout),
            guard: IdempotencyGuard::new(config.in_flight_wait, config.idempotency_ttl),
            max_scale: config.max_scale,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn deposit(
        &self,
        wallet_id: &WalletId,
        amount: Decimal,
        request_id: &RequestId,
    ) -> Result<Transaction, LedgerError> {
        let operation = Operation::Deposit {
            wallet_id: wallet_id.clone(),
            amount,
        };
        single(request_id, self.execute(request_id, operation)?)
    }

    pub fn withdraw(
        &self,
        wallet_id: &WalletId,
        amount: Decimal,
        request_id: &RequestId,
    ) -> Result<Transaction, LedgerError> {
        let operation = Operation::Withdraw {
            wallet_id: wallet_id.clone(),
            amount,
        };
        single(request_id, self.execute(request_id, operation)?)
    }

    /// Returns the outgoing and incoming legs.
    pub fn transfer(
        &self,
        from: &WalletId,
        to: &WalletId,
        amount: Decimal,
        request_id: &RequestId,
    ) -> Result<(Transaction, Transaction), LedgerError> {
        let operation = Operation::Transfer {
            from: from.clone(),
            to: to.clone(),
            amount,
        };
        match self.execute(request_id, operation)? {
            Receipt::Transfer { outgoing, incoming } => Ok((outgoing, incoming)),
            Receipt::Single(_) => Err(LedgerError::RequestIdReused(request_id.to_string())),
        }
    }

    /// Runs `operation` at most once per `request_id`. Duplicates receive the
    /// recorded outcome.
    pub fn execute(&self, request_id: &RequestId, operation: Operation) -> Outcome {
        self.guard
            .execute(request_id, &operation, || match &operation {
                Operation::Deposit { wallet_id, amount } => {
                    self.run_deposit(wallet_id, *amount, request_id)
                }
                Operation::Withdraw { wallet_id, amount } => {
                    self.run_withdraw(wallet_id, *amount, request_id)
                }
                Operation::Transfer { from, to, amount } => {
                    self.run_transfer(from, to, *amount, request_id)
                }
            })
    }

    /// Current balance. Wallets never touched have a zero balance.
    pub fn get_balance(&self, wallet_id: &WalletId) -> Decimal {
        self.store
            .wallet(wallet_id)
            .map_or(Decimal::ZERO, |wallet| wallet.balance)
    }

    /// Balance as of `at`, reconstructed from the log.
    pub fn get_balance_at(&self, wallet_id: &WalletId, at: DateTime<Utc>) -> Decimal {
        balance_at(&self.store.wallet_transactions(wallet_id), at)
    }

    pub fn get_wallet(&self, wallet_id: &WalletId) -> Option<Wallet> {
        self.store.wallet(wallet_id)
    }

    /// Creates a wallet with a zero balance, generating an id when none is
    /// given. Creating an existing wallet returns it unchanged.
    pub fn create_wallet(&self, wallet_id: Option<WalletId>) -> Result<Wallet, LedgerError> {
        let wallet_id = wallet_id.unwrap_or_else(WalletId::generate);
        let wallet = self
            .store
            .ensure_wallet(&wallet_id, Utc::now())
            .map_err(|err| LedgerError::Storage(err.to_string()))?;
        info!(wallet_id = %wallet.id, "wallet ready");
        Ok(wallet)
    }

    pub fn list_wallets(&self) -> Vec<Wallet> {
        self.store.wallets()
    }

    /// Every transaction ordered by (`created_at`, `id`).
    pub fn list_transactions(&self) -> Vec<Transaction> {
        self.store.transactions()
    }

    pub fn wallet_history(&self, wallet_id: &WalletId) -> Vec<Transaction> {
        self.store.wallet_transactions(wallet_id)
    }

    /// Checks the cached balance against the latest `balance_after` and a
    /// full replay of the wallet's log.
    pub fn audit_wallet(&self, wallet_id: &WalletId) -> Result<AuditReport, LedgerError> {
        self.require_wallet(wallet_id)?;
        self.locks.with_locked(&[wallet_id], || {
            let wallet = self
                .store
                .wallet(wallet_id)
                .ok_or_else(|| LedgerError::WalletNotFound(wallet_id.clone()))?;
            let report = AuditReport::new(
                wallet.id,
                wallet.balance,
                &self.store.wallet_transactions(wallet_id),
            );
            if !report.is_consistent() {
                warn!(?report, "wallet audit found inconsistency");
            }
            Ok(report)
        })?
    }

    fn run_deposit(&self, wallet_id: &WalletId, amount: Decimal, request_id: &RequestId) -> Outcome {
        validate_amount(amount, self.max_scale)?;

        let [tx] = self.locks.with_locked(&[wallet_id], || {
            let wallet = self
                .store
                .wallet(wallet_id)
                .unwrap_or_else(|| Wallet::new(wallet_id.clone(), Utc::now()));
            let pending = wallet.handle_deposit(amount, request_id)?;
            self.commit([(pending, wallet.version)])
        })??;

        info!(
            request_id = %request_id,
            wallet_id = %wallet_id,
            amount = %amount,
            balance = %tx.balance_after,
            "deposit completed"
        );
        Ok(Receipt::Single(tx))
    }

    fn run_withdraw(
        &self,
        wallet_id: &WalletId,
        amount: Decimal,
        request_id: &RequestId,
    ) -> Outcome {
        self.require_wallet(wallet_id)?;
        validate_amount(amount, self.max_scale)?;

        let [tx] = self.locks.with_locked(&[wallet_id], || {
            let wallet = self.require_wallet(wallet_id)?;
            let pending = wallet.handle_withdraw(amount, request_id);
            self.commit([(pending, wallet.version)])
        })??;

        if tx.status == TransactionStatus::Rejected {
            warn!(
                request_id = %request_id,
                wallet_id = %wallet_id,
                amount = %amount,
                balance = %tx.balance_after,
                "withdrawal rejected"
            );
            return Err(insufficient_funds(&tx));
        }
        info!(
            request_id = %request_id,
            wallet_id = %wallet_id,
            amount = %amount,
            balance = %tx.balance_after,
            "withdrawal completed"
        );
        Ok(Receipt::Single(tx))
    }

    fn run_transfer(
        &self,
        from: &WalletId,
        to: &WalletId,
        amount: Decimal,
        request_id: &RequestId,
    ) -> Outcome {
        self.require_wallet(from)?;
        self.require_wallet(to)?;
        if from == to {
            return Err(LedgerError::InvalidTransfer {
                reason: format!("source and destination are both `{from}`"),
            });
        }
        validate_amount(amount, self.max_scale)?;

        let [outgoing, incoming] = self
            .locks
            .with_locked(&[from, to], || {
                let source = self.require_wallet(from)?;
                let destination = self.require_wallet(to)?;
                let [out_leg, in_leg] =
                    source.handle_transfer(&destination, amount, request_id)?;
                self.commit([(out_leg, source.version), (in_leg, destination.version)])
            })?
            .map_err(|err| match err {
                LedgerError::Storage(reason) => LedgerError::AtomicityFailure(reason),
                other => other,
            })?;

        if outgoing.status == TransactionStatus::Rejected {
            warn!(
                request_id = %request_id,
                from = %from,
                to = %to,
                amount = %amount,
                balance = %outgoing.balance_after,
                "transfer rejected"
            );
            return Err(insufficient_funds(&outgoing));
        }
        info!(
            request_id = %request_id,
            from = %from,
            to = %to,
            amount = %amount,
            "transfer completed"
        );
        Ok(Receipt::Transfer { outgoing, incoming })
    }

    fn require_wallet(&self, wallet_id: &WalletId) -> Result<Wallet, LedgerError> {
        self.store
            .wallet(wallet_id)
            .ok_or_else(|| LedgerError::WalletNotFound(wallet_id.clone()))
    }

    /// Persists entries decided against the given wallet versions, as one unit.
    fn commit<const N: usize>(
        &self,
        entries: [(PendingTransaction, u64); N],
    ) -> Result<[Transaction; N], LedgerError> {
        let commit = Commit {
            created_at: Utc::now(),
            entries: entries
                .into_iter()
                .map(|(pending, expected_version)| CommitEntry {
                    pending,
                    expected_version,
                })
                .collect(),
        };
        let committed = self.store.commit(commit).map_err(|err| match err {
            StoreError::VersionConflict { .. } => LedgerError::ConcurrencyConflict(err.to_string()),
            other => LedgerError::Storage(other.to_string()),
        })?;
        committed.try_into().map_err(|committed: Vec<Transaction>| {
            LedgerError::Storage(format!(
                "store returned {} transactions for a commit of {N}",
                committed.len()
            ))
        })
    }
}

fn single(request_id: &RequestId, receipt: Receipt) -> Result<Transaction, LedgerError> {
    match receipt {
        Receipt::Single(tx) => Ok(tx),
        Receipt::Transfer { .. } => Err(LedgerError::RequestIdReused(request_id.to_string())),
    }
}

fn insufficient_funds(rejected: &Transaction) -> LedgerError {
    LedgerError::InsufficientFunds {
        wallet_id: rejected.wallet_id.clone(),
        balance: rejected.balance_after,
        requested: rejected.amount,
        transaction_id: rejected.id,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::wallet::TransactionKind;

    use super::*;

    fn ledger() -> Ledger {
        Ledger::in_memory(&LedgerConfig::default())
    }

    fn id(s: &str) -> WalletId {
        WalletId::new(s)
    }

    fn req(s: &str) -> RequestId {
        RequestId::new(s)
    }

    #[test]
    fn deposit_creates_wallet_lazily() {
        let ledger = ledger();
        let tx = ledger.deposit(&id("a"), Decimal::from(100), &req("r1")).unwrap();
        assert_eq!(tx.kind, TransactionKind::Deposit);
        assert_eq!(tx.balance_after, Decimal::from(100));
        assert_eq!(ledger.get_balance(&id("a")), Decimal::from(100));
        assert_eq!(ledger.get_wallet(&id("a")).unwrap().version, 1);
    }

    #[test]
    fn duplicate_deposit_applies_once() {
        let ledger = ledger();
        let first = ledger.deposit(&id("a"), Decimal::from(100), &req("r1"));
        let second = ledger.deposit(&id("a"), Decimal::from(100), &req("r1"));
        assert_eq!(first, second);
        assert_eq!(ledger.get_balance(&id("a")), Decimal::from(100));
        assert_eq!(ledger.list_transactions().len(), 1);
    }

    #[test]
    fn withdraw_rejections_are_recorded() {
        let ledger = ledger();
        ledger.deposit(&id("a"), Decimal::from(10), &req("r1")).unwrap();

        let err = ledger
            .withdraw(&id("a"), Decimal::from(11), &req("r2"))
            .unwrap_err();
        let LedgerError::InsufficientFunds {
            balance,
            requested,
            transaction_id,
            ..
        } = err
        else {
            panic!("expected insufficient funds");
        };
        assert_eq!(balance, Decimal::from(10));
        assert_eq!(requested, Decimal::from(11));

        let log = ledger.list_transactions();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].id, transaction_id);
        assert_eq!(log[1].status, TransactionStatus::Rejected);
        assert_eq!(ledger.get_wallet(&id("a")).unwrap().version, 1);

        // replayed verbatim, no second rejected record
        let again = ledger.withdraw(&id("a"), Decimal::from(11), &req("r2"));
        assert_eq!(again.unwrap_err().reason_code(), "INSUFFICIENT_FUNDS");
        assert_eq!(ledger.list_transactions().len(), 2);
    }

    #[test]
    fn validation_order_is_stable() {
        let ledger = ledger();
        // unknown wallet wins over a bad amount
        let err = ledger
            .withdraw(&id("ghost"), Decimal::ZERO, &req("r1"))
            .unwrap_err();
        assert_eq!(err, LedgerError::WalletNotFound(id("ghost")));

        ledger.deposit(&id("a"), Decimal::from(1), &req("r2")).unwrap();
        let err = ledger
            .withdraw(&id("a"), Decimal::new(-5, 0), &req("r3"))
            .unwrap_err();
        assert_eq!(err.reason_code(), "INVALID_AMOUNT");

        // a bad amount wins over insufficient funds
        let err = ledger
            .withdraw(&id("a"), Decimal::new(1_000_001, 3), &req("r4"))
            .unwrap_err();
        assert_eq!(err.reason_code(), "INVALID_AMOUNT");

        // invalid deposits never create the wallet
        assert!(ledger.deposit(&id("b"), Decimal::ZERO, &req("r5")).is_err());
        assert!(ledger.get_wallet(&id("b")).is_none());
    }

    #[test]
    fn transfer_moves_funds_atomically() {
        let ledger = ledger();
        ledger.deposit(&id("a"), Decimal::from(10), &req("r1")).unwrap();
        ledger.create_wallet(Some(id("b"))).unwrap();

        let (out, inc) = ledger
            .transfer(&id("a"), &id("b"), Decimal::from(4), &req("t1"))
            .unwrap();
        assert_eq!(out.kind, TransactionKind::TransferOut);
        assert_eq!(inc.kind, TransactionKind::TransferIn);
        assert_eq!(out.request_id, inc.request_id);
        assert_eq!(out.created_at, inc.created_at);
        assert_eq!(ledger.get_balance(&id("a")), Decimal::from(6));
        assert_eq!(ledger.get_balance(&id("b")), Decimal::from(4));

        let err = ledger
            .transfer(&id("a"), &id("b"), Decimal::from(7), &req("t2"))
            .unwrap_err();
        assert_eq!(err.reason_code(), "INSUFFICIENT_FUNDS");
        let rejected: Vec<_> = ledger
            .list_transactions()
            .into_iter()
            .filter(|tx| tx.request_id == req("t2"))
            .collect();
        assert_eq!(rejected.len(), 2);
        assert!(rejected.iter().all(|tx| tx.status == TransactionStatus::Rejected));
        assert_eq!(ledger.get_balance(&id("a")), Decimal::from(6));
    }

    #[test]
    fn transfer_validation() {
        let ledger = ledger();
        ledger.deposit(&id("a"), Decimal::from(10), &req("r1")).unwrap();

        let err = ledger
            .transfer(&id("a"), &id("missing"), Decimal::from(1), &req("t1"))
            .unwrap_err();
        assert_eq!(err, LedgerError::WalletNotFound(id("missing")));

        let err = ledger
            .transfer(&id("a"), &id("a"), Decimal::from(1), &req("t2"))
            .unwrap_err();
        assert_eq!(err.reason_code(), "INVALID_TRANSFER");
    }

    #[test]
    fn request_id_reused_for_other_operation() {
        let ledger = ledger();
        ledger.deposit(&id("a"), Decimal::from(10), &req("r1")).unwrap();
        ledger.create_wallet(Some(id("b"))).unwrap();

        let err = ledger
            .transfer(&id("a"), &id("b"), Decimal::from(1), &req("r1"))
            .unwrap_err();
        assert_eq!(err.reason_code(), "REQUEST_ID_REUSED");
        assert_eq!(ledger.get_balance(&id("a")), Decimal::from(10));
    }

    #[test]
    fn historical_balances() {
        let ledger = ledger();
        let before = Utc::now() - chrono::Duration::seconds(1);
        ledger.deposit(&id("a"), Decimal::from(10), &req("r1")).unwrap();
        let tx = ledger.withdraw(&id("a"), Decimal::from(3), &req("r2")).unwrap();

        assert_eq!(ledger.get_balance_at(&id("a"), before), Decimal::ZERO);
        assert_eq!(ledger.get_balance_at(&id("a"), tx.created_at), Decimal::from(7));
        assert_eq!(
            ledger.get_balance_at(&id("a"), Utc::now()),
            ledger.get_balance(&id("a"))
        );
        assert_eq!(ledger.get_balance_at(&id("nobody"), Utc::now()), Decimal::ZERO);
    }

    #[test]
    fn audit_detects_nothing_on_healthy_wallet() {
        let ledger = ledger();
        ledger.deposit(&id("a"), Decimal::from(10), &req("r1")).unwrap();
        let _ = ledger.withdraw(&id("a"), Decimal::from(30), &req("r2"));
        ledger.withdraw(&id("a"), Decimal::from(4), &req("r3")).unwrap();

        let report = ledger.audit_wallet(&id("a")).unwrap();
        assert!(report.is_consistent());
        assert_eq!(report.completed, 2);
        assert_eq!(report.rejected, 1);
        assert_eq!(
            ledger.audit_wallet(&id("x")).unwrap_err(),
            LedgerError::WalletNotFound(id("x"))
        );
    }

    #[test]
    fn overflowing_credits_are_rejected_without_records() {
        let ledger = ledger();
        ledger.deposit(&id("a"), Decimal::MAX, &req("r1")).unwrap();
        ledger.deposit(&id("b"), Decimal::from(5), &req("r2")).unwrap();

        let err = ledger
            .deposit(&id("a"), Decimal::ONE, &req("r3"))
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::InvalidAmount {
                amount: "1".to_string(),
                reason: "balance would overflow".to_string(),
            }
        );

        let err = ledger
            .transfer(&id("b"), &id("a"), Decimal::ONE, &req("t1"))
            .unwrap_err();
        assert_eq!(err.reason_code(), "INVALID_AMOUNT");

        assert_eq!(ledger.get_balance(&id("a")), Decimal::MAX);
        assert_eq!(ledger.get_balance(&id("b")), Decimal::from(5));
        assert_eq!(ledger.list_transactions().len(), 2);
    }

    #[test]
    fn auditing_unknown_wallets_takes_no_lock() {
        let ledger = ledger();
        for i in 0..3 {
            let err = ledger.audit_wallet(&id(&format!("ghost-{i}"))).unwrap_err();
            assert_eq!(err.reason_code(), "WALLET_NOT_FOUND");
        }
        assert!(ledger.locks.is_empty());
    }

    #[test]
    fn create_wallet_generates_ids() {
        let ledger = Ledger::in_memory(&LedgerConfig {
            lock_timeout: Duration::from_millis(100),
            ..LedgerConfig::default()
        });
        let a = ledger.create_wallet(None).unwrap();
        let b = ledger.create_wallet(None).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(a.balance, Decimal::ZERO);
        assert_eq!(ledger.list_wallets().len(), 2);
    }
}
