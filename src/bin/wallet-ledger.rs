use std::fs::File;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;
use wallet_ledger::{
    LedgerConfig, LedgerError,
    bin_utils::{BatchError, Report, Service},
};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let filename = args
        .next()
        .context("Expected a file name as the first argument")?;
    let report = match args.next().as_deref() {
        None => Report::Wallets,
        Some("--transactions") => Report::Transactions,
        Some(other) => anyhow::bail!("Unknown argument `{other}`"),
    };
    let file = File::open(&filename).with_context(|| format!("Failed to open `{filename}`"))?;
    let config = LedgerConfig::from_env()?;

    let service = Service {
        input: file,
        output: &mut std::io::stdout(),
        config,
        report,
        error_printer: Box::new(|line, err| {
            match err {
                BatchError::Ledger {
                    error: LedgerError::InsufficientFunds { .. },
                    ..
                } => {
                    // not a technical error, the rejection is recorded in the ledger
                }
                err => eprintln!("Error at line {line}: {err}"),
            }
        }),
    };
    service.run()
}
