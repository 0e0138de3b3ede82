/// Wallets, transactions and the balance decisions taken on them.
/// Decisions are pure; state only changes when a committed transaction is applied.
pub mod wallet;

/// Operations as requested by clients, plus amount validation.
pub mod command;

/// Error taxonomy with stable reason codes.
pub mod error;

/// At-most-once execution per request id.
pub mod guard;

/// Per-wallet locking with a global acquisition order.
pub mod lock;

/// Ledger store interface, with "in memory" and journal backed implementations.
pub mod store;

/// Balance reconstruction from the transaction log.
pub mod history;

/// Coordinates guard, locks, balance decisions and the store.
pub mod ledger;

pub mod config;

/// Ideally, this module should exist in its own crate, as a way to
/// bootstrap the ledger from CSV. It is used by the integration tests too,
/// so it lives here.
pub mod bin_utils;

pub use config::LedgerConfig;
pub use error::LedgerError;
pub use ledger::Ledger;
pub use wallet::{RequestId, Transaction, Wallet, WalletId};
