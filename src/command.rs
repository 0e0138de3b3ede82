use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    error::LedgerError,
    wallet::{Transaction, WalletId},
};

/// A balance-affecting operation, as requested by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Deposit {
        wallet_id: WalletId,
        amount: Decimal,
    },
    Withdraw {
        wallet_id: WalletId,
        amount: Decimal,
    },
    Transfer {
        from: WalletId,
        to: WalletId,
        amount: Decimal,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Deposit { .. } => "deposit",
            Operation::Withdraw { .. } => "withdraw",
            Operation::Transfer { .. } => "transfer",
        }
    }

    pub fn amount(&self) -> Decimal {
        match self {
            Operation::Deposit { amount, .. }
            | Operation::Withdraw { amount, .. }
            | Operation::Transfer { amount, .. } => *amount,
        }
    }
}

/// Successful result of an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Receipt {
    Single(Transaction),
    Transfer {
        outgoing: Transaction,
        incoming: Transaction,
    },
}

impl Receipt {
    pub fn transactions(&self) -> Vec<&Transaction> {
        match self {
            Receipt::Single(tx) => vec![tx],
            Receipt::Transfer { outgoing, incoming } => vec![outgoing, incoming],
        }
    }
}

pub type Outcome = Result<Receipt, LedgerError>;

/// Parses a decimal string amount and validates it.
pub fn parse_amount(raw: &str, max_scale: u32) -> Result<Decimal, LedgerError> {
    let amount = parse_decimal(raw)?;
    validate_amount(amount, max_scale)?;
    Ok(amount)
}

/// Parses a decimal string without judging its value, leaving that to
/// [`validate_amount`].
pub fn parse_decimal(raw: &str) -> Result<Decimal, LedgerError> {
    let trimmed = raw.trim();
    Decimal::from_str(trimmed).map_err(|_| LedgerError::InvalidAmount {
        amount: trimmed.to_string(),
        reason: "not a decimal number".to_string(),
    })
}

/// Amounts must be strictly positive and carry at most `max_scale`
/// significant decimal places. Trailing zeros are not significant.
pub fn validate_amount(amount: Decimal, max_scale: u32) -> Result<(), LedgerError> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount {
            amount: amount.to_string(),
            reason: "must be positive".to_string(),
        });
    }
    if amount.normalize().scale() > max_scale {
        return Err(LedgerError::InvalidAmount {
            amount: amount.to_string(),
            reason: format!("at most {max_scale} decimal places are allowed"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_amounts() {
        assert_eq!(parse_amount("10", 2).unwrap(), Decimal::from(10));
        assert_eq!(parse_amount(" 0.01 ", 2).unwrap(), Decimal::new(1, 2));
        // trailing zeros do not count against precision
        assert_eq!(parse_amount("1.5000", 2).unwrap(), Decimal::new(15, 1));
    }

    #[test]
    fn reject_invalid_amounts() {
        let err = parse_amount("abc", 2).unwrap_err();
        assert_eq!(err.reason_code(), "INVALID_AMOUNT");
        assert_eq!(err.to_string(), "Invalid amount `abc`: not a decimal number");

        let err = parse_amount("0", 2).unwrap_err();
        assert_eq!(err.to_string(), "Invalid amount `0`: must be positive");

        assert!(parse_amount("-3", 2).is_err());

        let err = parse_amount("1.001", 2).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid amount `1.001`: at most 2 decimal places are allowed"
        );
        assert!(parse_amount("1.001", 3).is_ok());
    }

    #[test]
    fn parse_decimal_accepts_any_number() {
        assert_eq!(parse_decimal("-0.5").unwrap(), Decimal::new(-5, 1));
        assert_eq!(parse_decimal("").unwrap_err().reason_code(), "INVALID_AMOUNT");
    }

    #[test]
    fn operation_accessors() {
        let op = Operation::Transfer {
            from: WalletId::new("a"),
            to: WalletId::new("b"),
            amount: Decimal::from(3),
        };
        assert_eq!(op.name(), "transfer");
        assert_eq!(op.amount(), Decimal::from(3));
    }
}
