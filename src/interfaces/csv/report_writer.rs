use crate::application::reconciliation::SettlementReport;
use crate::error::Result;
use crate::infrastructure::in_memory::BalanceEntry;
use std::io::Write;

/// Writes gateway reports as CSV.
///
/// Two record shapes share one output stream: per-user balance rows and the
/// settlement section, whose total rows only carry two fields. The inner
/// writer is flexible so the record lengths may differ.
pub struct ReportWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> ReportWriter<W> {
    pub fn new(sink: W) -> Self {
        let writer = csv::WriterBuilder::new()
            .flexible(true)
            .from_writer(sink);
        Self { writer }
    }

    /// Writes one row per (user, currency) pair, held funds included.
    pub fn write_balances(&mut self, balances: &[BalanceEntry]) -> Result<()> {
        self.writer
            .write_record(["user", "currency", "available", "held"])?;
        for entry in balances {
            self.writer.write_record([
                entry.user_id.as_str(),
                entry.currency.as_str(),
                &entry.available.to_string(),
                &entry.held.to_string(),
            ])?;
        }
        Ok(())
    }

    /// Writes the per-provider settlement lines followed by the totals.
    pub fn write_settlement(&mut self, report: &SettlementReport) -> Result<()> {
        self.writer
            .write_record(["provider", "type", "count", "gross", "fees", "net"])?;
        for line in &report.lines {
            self.writer.write_record([
                line.provider.as_str(),
                &line.tx_type.to_string(),
                &line.count.to_string(),
                &line.gross.to_string(),
                &line.fees.to_string(),
                &line.net.to_string(),
            ])?;
        }
        self.writer
            .write_record(["total_deposits", &report.total_deposits.to_string()])?;
        self.writer
            .write_record(["total_withdrawals", &report.total_withdrawals.to_string()])?;
        self.writer
            .write_record(["total_fees", &report.total_fees.to_string()])?;
        self.writer
            .write_record(["net_settlement", &report.net_settlement.to_string()])?;
        Ok(())
    }

    /// Flushes the underlying writer.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::reconciliation::SettlementLine;
    use crate::domain::transaction::TransactionType;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[test]
    fn test_balances_section() {
        let balances = vec![
            BalanceEntry {
                user_id: "alice".to_string(),
                currency: "USD".to_string(),
                available: dec!(47.10),
                held: dec!(0),
            },
            BalanceEntry {
                user_id: "bob".to_string(),
                currency: "BTC".to_string(),
                available: dec!(0.05000000),
                held: dec!(0.01),
            },
        ];

        let mut writer = ReportWriter::new(Vec::new());
        writer.write_balances(&balances).unwrap();
        writer.flush().unwrap();
        let out = String::from_utf8(writer.writer.into_inner().unwrap()).unwrap();

        assert_eq!(
            out,
            "user,currency,available,held\n\
             alice,USD,47.10,0\n\
             bob,BTC,0.05000000,0.01\n"
        );
    }

    #[test]
    fn test_settlement_section() {
        let now = Utc::now();
        let report = SettlementReport {
            from: now,
            to: now,
            lines: vec![
                SettlementLine {
                    provider: "cardpay".to_string(),
                    tx_type: TransactionType::Deposit,
                    count: 1,
                    gross: dec!(100),
                    fees: dec!(2.90),
                    net: dec!(97.10),
                },
                SettlementLine {
                    provider: "cardpay".to_string(),
                    tx_type: TransactionType::Withdrawal,
                    count: 1,
                    gross: dec!(50),
                    fees: dec!(1.45),
                    net: dec!(48.55),
                },
            ],
            total_deposits: dec!(100),
            total_withdrawals: dec!(50),
            total_fees: dec!(4.35),
            net_settlement: dec!(45.65),
        };

        let mut writer = ReportWriter::new(Vec::new());
        writer.write_settlement(&report).unwrap();
        writer.flush().unwrap();
        let out = String::from_utf8(writer.writer.into_inner().unwrap()).unwrap();

        assert_eq!(
            out,
            "provider,type,count,gross,fees,net\n\
             cardpay,deposit,1,100,2.90,97.10\n\
             cardpay,withdrawal,1,50,1.45,48.55\n\
             total_deposits,100\n\
             total_withdrawals,50\n\
             total_fees,4.35\n\
             net_settlement,45.65\n"
        );
    }
}
