//! Durable store backed by an append-only JSON-lines journal.
//!
//! Every wallet creation and every [`Commit`] is written as a single line and
//! synced to disk before it becomes visible in memory. Both legs of a transfer
//! live on the same line, so a torn write can never expose half of a transfer.

use std::{
    fs::{File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::wallet::{Transaction, Wallet, WalletId};

use super::{Commit, LedgerStore, StoreError, in_memory::LedgerState};

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
enum JournalRecord {
    WalletCreated { wallet: Wallet },
    Committed { transactions: Vec<Transaction> },
}

#[derive(Debug)]
pub struct JournalLedgerStore {
    path: PathBuf,
    state: RwLock<LedgerState>,
    journal: Mutex<Journal>,
}

impl JournalLedgerStore {
    /// Opens the journal at `path`, creating it if missing, and replays it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let mut state = LedgerState::default();
        let mut records = 0;
        // bytes covered by complete, accepted lines
        let mut valid_len = 0u64;
        let mut missing_newline = false;
        let mut reader = BufReader::new(&file);
        let mut buf = Vec::new();
        let mut line_no = 0;
        loop {
            buf.clear();
            let read = reader.read_until(b'\n', &mut buf)?;
            if read == 0 {
                break;
            }
            line_no += 1;
            let complete = buf.last() == Some(&b'\n');
            let line = if complete { &buf[..read - 1] } else { &buf[..] };
            if !line.trim_ascii().is_empty() {
                let at_end = reader.fill_buf()?.is_empty();
                match serde_json::from_slice::<JournalRecord>(line) {
                    Ok(JournalRecord::WalletCreated { wallet }) => {
                        state.insert_wallet(wallet);
                    }
                    Ok(JournalRecord::Committed { transactions }) => state.apply(&transactions),
                    // a crash mid-append can only tear the final line
                    Err(err) if at_end => {
                        warn!(line = line_no, error = %err, "dropping torn journal tail");
                        break;
                    }
                    Err(err) => {
                        return Err(StoreError::Corrupted {
                            line: line_no,
                            reason: err.to_string(),
                        });
                    }
                }
                records += 1;
            }
            valid_len += read as u64;
            missing_newline = !complete;
        }
        drop(reader);

        if valid_len < file.metadata()?.len() {
            file.set_len(valid_len)?;
        } else if missing_newline {
            // last record is complete but lost its newline
            (&file).write_all(b"\n")?;
        }
        let len = file.metadata()?.len();
        info!(path = %path.display(), records, "journal replayed");

        Ok(Self {
            path,
            state: RwLock::new(state),
            journal: Mutex::new(Journal {
                file,
                len,
                broken: false,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, record: &JournalRecord) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        self.journal.lock().append(&line)
    }
}

/// Journal file plus the length of its acknowledged prefix.
#[derive(Debug)]
struct Journal {
    file: File,
    len: u64,
    /// Set when a failed append could not be rolled back.
    broken: bool,
}

impl Journal {
    fn append(&mut self, line: &[u8]) -> Result<(), StoreError> {
        if self.broken {
            return Err(StoreError::Unwritable);
        }
        let actual = self.file.metadata()?.len();
        if actual != self.len {
            warn!(expected = self.len, actual, "cutting unacknowledged journal bytes");
            self.rollback()?;
        }
        match self.file.write_all(line).and_then(|()| self.file.sync_data()) {
            Ok(()) => {
                self.len += line.len() as u64;
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "journal append failed, rolling back");
                self.rollback()?;
                Err(err.into())
            }
        }
    }

    /// Truncates the file back to the acknowledged prefix.
    fn rollback(&mut self) -> Result<(), StoreError> {
        let cut = self
            .file
            .set_len(self.len)
            .and_then(|()| self.file.sync_data());
        if let Err(err) = cut {
            error!(error = %err, "journal rollback failed, refusing further appends");
            self.broken = true;
            return Err(err.into());
        }
        Ok(())
    }
}

impl LedgerStore for JournalLedgerStore {
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
        if let Some(wallet) = state.wallet(wallet_id) {
            return Ok(wallet.clone());
        }
        let wallet = Wallet::new(wallet_id.clone(), now);
        self.append(&JournalRecord::WalletCreated {
            wallet: wallet.clone(),
        })?;
        state.insert_wallet(wallet.clone());
        Ok(wallet)
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
        self.append(&JournalRecord::Committed {
            transactions: transactions.clone(),
        })?;
        state.apply(&transactions);
        Ok(transactions)
    }
}
