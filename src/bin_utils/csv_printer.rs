use std::io::Write;

use csv::Writer;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::wallet::{RejectReason, Transaction, TransactionKind, TransactionStatus, Wallet};

#[derive(Debug, Serialize)]
pub struct WalletRow {
    pub wallet: String,
    pub balance: Decimal,
    pub version: u64,
}

impl From<&Wallet> for WalletRow {
    fn from(wallet: &Wallet) -> Self {
        Self {
            wallet: wallet.id.to_string(),
            balance: wallet.balance,
            version: wallet.version,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TransactionRow {
    pub id: u64,
    pub wallet: String,
    pub counterparty: Option<String>,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub status: TransactionStatus,
    pub reject_reason: Option<RejectReason>,
    pub request_id: String,
    pub created_at: String,
}

impl From<&Transaction> for TransactionRow {
    fn from(tx: &Transaction) -> Self {
        Self {
            id: tx.id,
            wallet: tx.wallet_id.to_string(),
            counterparty: tx.counterparty_wallet_id.as_ref().map(ToString::to_string),
            kind: tx.kind,
            amount: tx.amount,
            balance_after: tx.balance_after,
            status: tx.status,
            reject_reason: tx.reject_reason,
            request_id: tx.request_id.to_string(),
            created_at: tx.created_at.to_rfc3339(),
        }
    }
}

pub fn print_rows<W, T>(output: &mut W, rows: impl Iterator<Item = T>) -> anyhow::Result<()>
where
    W: Write,
    T: Serialize,
{
    let mut writer = Writer::from_writer(output);
    for row in rows {
        if let Err(err) = writer.serialize(row) {
            anyhow::bail!("Failed to write to CSV: {err}")
        }
    }
    // Ensure all data is flushed to the output
    if let Err(err) = writer.flush() {
        anyhow::bail!("Failed to flush CSV writer: {err}")
    }
    Ok(())
}
