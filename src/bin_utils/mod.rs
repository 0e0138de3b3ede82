//! This module could be a separate crate on its own, to bootstrap [`crate::Ledger`] within
//! the binary, but for simplicity purposes it is included directly in the library.

use std::{
    io::{Read, Write},
    thread,
};

use anyhow::{Context, Result};
use crossbeam::channel;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    command::{Operation, parse_decimal},
    config::LedgerConfig,
    error::LedgerError,
    ledger::Ledger,
    store::{LedgerStore, in_memory::InMemoryLedgerStore, journal::JournalLedgerStore},
    wallet::{RequestId, WalletId},
};
use csv_parser::{CsvRequestParser, OperationKind, RequestRow};
use csv_printer::{TransactionRow, WalletRow, print_rows};

pub mod csv_parser;
pub mod csv_printer;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Malformed request: {0}")]
    Parse(#[from] csv::Error),
    #[error("Request `{request_id}` is missing the destination wallet")]
    MissingDestination { request_id: String },
    #[error("Request `{request_id}` failed [{code}]: {error}", code = .error.reason_code())]
    Ledger {
        request_id: String,
        error: LedgerError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Report {
    #[default]
    Wallets,
    Transactions,
}

pub type ErrorPrinter = Box<dyn Fn(u64, BatchError) + Send + Sync>;

/// Reads requests from CSV, runs them on a pool of worker threads and prints
/// the resulting wallets or transaction log as CSV.
pub struct Service<'w, R, W: 'w> {
    pub input: R,
    pub output: &'w mut W,
    pub config: LedgerConfig,
    pub report: Report,
    pub error_printer: ErrorPrinter,
}

impl<'w, R, W> Service<'w, R, W>
where
    R: Read,
    W: Write + 'w,
{
    pub fn run(self) -> Result<()> {
        match self.config.journal_path.clone() {
            Some(path) => {
                let store = JournalLedgerStore::open(&path)
                    .with_context(|| format!("Failed to open journal `{}`", path.display()))?;
                let ledger = Ledger::new(store, &self.config);
                self.run_with(&ledger)
            }
            None => {
                let ledger = Ledger::new(InMemoryLedgerStore::new(), &self.config);
                self.run_with(&ledger)
            }
        }
    }

    /// Runs the batch against an existing ledger.
    pub fn run_with<S: LedgerStore>(self, ledger: &Ledger<S>) -> Result<()> {
        let workers = self.config.workers.max(1);
        let error_printer = &self.error_printer;
        let (sender, receiver) = channel::bounded::<(u64, RequestRow)>(workers * 2);

        let processed = thread::scope(|s| {
            for worker in 0..workers {
                let receiver = receiver.clone();
                s.spawn(move || {
                    for (line, row) in receiver {
                        debug!(worker, line, request_id = %row.request_id, "processing request");
                        if let Err(err) = process_row(ledger, row) {
                            error_printer(line, err);
                        }
                    }
                });
            }
            drop(receiver);

            let mut processed = 0usize;
            for (line, row) in CsvRequestParser::new(self.input) {
                match row {
                    Ok(row) => {
                        sender
                            .send((line, row))
                            .context("All workers stopped unexpectedly")?;
                        processed += 1;
                    }
                    Err(err) => error_printer(line, err.into()),
                }
            }
            drop(sender);
            anyhow::Ok(processed)
        })?;
        info!(processed, workers, "batch finished");

        match self.report {
            Report::Wallets => print_rows(
                self.output,
                ledger.list_wallets().iter().map(WalletRow::from),
            ),
            Report::Transactions => print_rows(
                self.output,
                ledger.list_transactions().iter().map(TransactionRow::from),
            ),
        }
    }
}

fn process_row<S: LedgerStore>(
    ledger: &Ledger<S>,
    row: RequestRow,
) -> Result<(), BatchError> {
    let request_id = RequestId::new(row.request_id.clone());
    let ledger_error = |error| BatchError::Ledger {
        request_id: row.request_id.clone(),
        error,
    };
    let wallet_id = WalletId::new(row.wallet.clone());
    // value checks happen in the ledger, after the wallet checks
    let amount = parse_decimal(&row.amount).map_err(ledger_error)?;
    let operation = match row.kind {
        OperationKind::Deposit => Operation::Deposit { wallet_id, amount },
        OperationKind::Withdraw => Operation::Withdraw { wallet_id, amount },
        OperationKind::Transfer => {
            let to = row
                .to_wallet
                .clone()
                .filter(|to| !to.is_empty())
                .ok_or_else(|| BatchError::MissingDestination {
                    request_id: row.request_id.clone(),
                })?;
            Operation::Transfer {
                from: wallet_id,
                to: WalletId::new(to),
                amount,
            }
        }
    };
    ledger
        .execute(&request_id, operation)
        .map(|_| ())
        .map_err(ledger_error)
}
