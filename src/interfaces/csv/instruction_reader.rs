use crate::domain::transaction::PaymentMethod;
use crate::error::{PaymentError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    Deposit,
    Withdraw,
}

/// One row of a gateway instruction file.
#[derive(Debug, Clone, Deserialize)]
pub struct Instruction {
    pub op: Op,
    pub user: String,
    pub method: PaymentMethod,
    pub amount: Decimal,
    pub currency: String,
    /// Payout destination; ignored for deposits.
    #[serde(default)]
    pub destination: Option<String>,
}

/// Reads gateway instructions from a CSV source.
///
/// Wraps `csv::Reader` and provides an iterator over `Result<Instruction>`.
/// Whitespace is trimmed and trailing empty fields are tolerated, so
/// deposit rows may leave the destination column blank or drop it entirely.
pub struct InstructionReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> InstructionReader<R> {
    /// Creates a new `InstructionReader` from any `Read` source (e.g., File, Stdin).
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Returns an iterator that lazily reads and deserializes instructions.
    pub fn instructions(self) -> impl Iterator<Item = Result<Instruction>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(PaymentError::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_reader_valid_stream() {
        let data = "op, user, method, amount, currency, destination\n\
                    deposit, alice, card, 100, USD, \n\
                    withdraw, alice, bank_transfer, 50, USD, DE89370400440532013000";
        let reader = InstructionReader::new(data.as_bytes());
        let rows: Vec<Result<Instruction>> = reader.instructions().collect();

        assert_eq!(rows.len(), 2);
        let first = rows[0].as_ref().unwrap();
        assert_eq!(first.op, Op::Deposit);
        assert_eq!(first.user, "alice");
        assert_eq!(first.method, PaymentMethod::Card);
        assert_eq!(first.amount, dec!(100));
        let second = rows[1].as_ref().unwrap();
        assert_eq!(second.op, Op::Withdraw);
        assert_eq!(
            second.destination.as_deref(),
            Some("DE89370400440532013000")
        );
    }

    #[test]
    fn test_reader_short_deposit_row() {
        let data = "op, user, method, amount, currency, destination\n\
                    deposit, bob, paypal, 25.50, USD";
        let reader = InstructionReader::new(data.as_bytes());
        let rows: Vec<Result<Instruction>> = reader.instructions().collect();

        let row = rows[0].as_ref().unwrap();
        assert_eq!(row.amount, dec!(25.50));
        assert_eq!(row.destination, None);
    }

    #[test]
    fn test_reader_malformed_line() {
        let data = "op, user, method, amount, currency, destination\n\
                    transfer, alice, card, 100, USD, ";
        let reader = InstructionReader::new(data.as_bytes());
        let rows: Vec<Result<Instruction>> = reader.instructions().collect();

        assert!(rows[0].is_err());
    }
}
