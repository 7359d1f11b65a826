use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Unique transaction identifier, prefixed by kind: `dep_`, `wdl_`, `ref_` or `cbk_`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn generate(tx_type: TransactionType) -> Self {
        let prefix = match tx_type {
            TransactionType::Deposit => "dep",
            TransactionType::Withdrawal => "wdl",
            TransactionType::Refund => "ref",
            TransactionType::Chargeback => "cbk",
        };
        Self(format!("{}_{}", prefix, Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransactionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TransactionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    Refund,
    Chargeback,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Deposit => "deposit",
            Self::Withdrawal => "withdrawal",
            Self::Refund => "refund",
            Self::Chargeback => "chargeback",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Refunded,
    Disputed,
}

impl TransactionStatus {
    /// A status still eligible for automatic transitions.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_in_flight()
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
            Self::Disputed => "disputed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    BankTransfer,
    Ach,
    Sepa,
    Wire,
    Paypal,
    Skrill,
    Bitcoin,
    Ethereum,
    Usdt,
}

impl PaymentMethod {
    pub fn is_crypto(&self) -> bool {
        matches!(self, Self::Bitcoin | Self::Ethereum | Self::Usdt)
    }

    /// On-chain confirmations a deposit must accumulate before funds are
    /// credited. Zero for everything that settles off-chain.
    pub fn required_confirmations(&self) -> u32 {
        match self {
            Self::Bitcoin => 3,
            Self::Ethereum | Self::Usdt => 12,
            _ => 0,
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Card => "card",
            Self::BankTransfer => "bank_transfer",
            Self::Ach => "ach",
            Self::Sepa => "sepa",
            Self::Wire => "wire",
            Self::Paypal => "paypal",
            Self::Skrill => "skrill",
            Self::Bitcoin => "bitcoin",
            Self::Ethereum => "ethereum",
            Self::Usdt => "usdt",
        };
        f.write_str(name)
    }
}

/// A money movement tracked by the gateway, from request to settlement.
///
/// Monetary fields are denominated in `currency`; `exchange_rate` carries the
/// snapshot used to express them in the gateway base currency when the two
/// differ. `net_amount` is computed once at construction and stays equal to
/// `amount - fee` for the life of the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: String,
    pub tx_type: TransactionType,
    pub method: PaymentMethod,
    pub provider: String,
    pub amount: Decimal,
    pub fee: Decimal,
    pub net_amount: Decimal,
    pub currency: String,
    pub exchange_rate: Option<Decimal>,
    pub status: TransactionStatus,
    pub provider_tx_id: Option<String>,
    /// Audit trail: approval actors, failure reasons, record linkage.
    pub metadata: BTreeMap<String, String>,
    pub retry_count: u32,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub confirmations_required: u32,
    pub confirmations_received: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    pub fn new(
        tx_type: TransactionType,
        user_id: impl Into<String>,
        method: PaymentMethod,
        provider: impl Into<String>,
        amount: Decimal,
        fee: Decimal,
        currency: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        let confirmations_required = if tx_type == TransactionType::Deposit {
            method.required_confirmations()
        } else {
            0
        };
        Self {
            id: TransactionId::generate(tx_type),
            user_id: user_id.into(),
            tx_type,
            method,
            provider: provider.into(),
            amount,
            fee,
            net_amount: amount - fee,
            currency: currency.into(),
            exchange_rate: None,
            status: TransactionStatus::Pending,
            provider_tx_id: None,
            metadata: BTreeMap::new(),
            retry_count: 0,
            last_retry_at: None,
            confirmations_required,
            confirmations_received: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Mirror record booked when a completed deposit is clawed back by the
    /// card network. Carries no fee and settles immediately.
    pub fn chargeback_of(original: &Transaction, reason: &str) -> Self {
        let mut tx = Self::new(
            TransactionType::Chargeback,
            original.user_id.clone(),
            original.method,
            original.provider.clone(),
            original.amount,
            Decimal::ZERO,
            original.currency.clone(),
        );
        tx.exchange_rate = original.exchange_rate;
        tx.note("chargeback_of", original.id.as_str());
        tx.note("reason", reason);
        tx.complete(Utc::now());
        tx
    }

    /// Mirror record booked when part of a completed deposit is returned to
    /// the customer. Carries no fee and settles immediately.
    pub fn refund_of(original: &Transaction, amount: Decimal, reason: &str) -> Self {
        let mut tx = Self::new(
            TransactionType::Refund,
            original.user_id.clone(),
            original.method,
            original.provider.clone(),
            amount,
            Decimal::ZERO,
            original.currency.clone(),
        );
        tx.exchange_rate = original.exchange_rate;
        tx.note("refund_of", original.id.as_str());
        tx.note("reason", reason);
        tx.complete(Utc::now());
        tx
    }

    /// Amount expressed in the gateway base currency.
    pub fn base_amount(&self) -> Decimal {
        self.amount * self.exchange_rate.unwrap_or(Decimal::ONE)
    }

    /// Fee expressed in the gateway base currency.
    pub fn base_fee(&self) -> Decimal {
        self.fee * self.exchange_rate.unwrap_or(Decimal::ONE)
    }

    pub fn set_status(&mut self, status: TransactionStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    pub fn complete(&mut self, at: DateTime<Utc>) {
        self.status = TransactionStatus::Completed;
        self.completed_at = Some(at);
        self.updated_at = at;
    }

    pub fn fail(&mut self, reason: &str) {
        self.note("failure_reason", reason);
        self.set_status(TransactionStatus::Failed);
    }

    /// Attaches an audit note. Does not touch `updated_at`, which tracks
    /// status progress only.
    pub fn note(&mut self, key: &str, value: impl Into<String>) {
        self.metadata.insert(key.to_string(), value.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn deposit(amount: Decimal, fee: Decimal) -> Transaction {
        Transaction::new(
            TransactionType::Deposit,
            "user-1",
            PaymentMethod::Card,
            "cardpay",
            amount,
            fee,
            "USD",
        )
    }

    #[test]
    fn test_id_prefix_follows_type() {
        assert!(
            TransactionId::generate(TransactionType::Deposit)
                .as_str()
                .starts_with("dep_")
        );
        assert!(
            TransactionId::generate(TransactionType::Withdrawal)
                .as_str()
                .starts_with("wdl_")
        );
        assert!(
            TransactionId::generate(TransactionType::Refund)
                .as_str()
                .starts_with("ref_")
        );
        assert!(
            TransactionId::generate(TransactionType::Chargeback)
                .as_str()
                .starts_with("cbk_")
        );
    }

    #[test]
    fn test_net_amount_derived_from_fee() {
        let tx = deposit(dec!(100.00), dec!(2.90));
        assert_eq!(tx.net_amount, dec!(97.10));
        assert_eq!(tx.status, TransactionStatus::Pending);
    }

    #[test]
    fn test_crypto_confirmation_requirements() {
        assert_eq!(PaymentMethod::Bitcoin.required_confirmations(), 3);
        assert_eq!(PaymentMethod::Ethereum.required_confirmations(), 12);
        assert_eq!(PaymentMethod::Usdt.required_confirmations(), 12);
        assert_eq!(PaymentMethod::Card.required_confirmations(), 0);
        assert!(PaymentMethod::Bitcoin.is_crypto());
        assert!(!PaymentMethod::Sepa.is_crypto());
    }

    #[test]
    fn test_withdrawals_require_no_confirmations() {
        let tx = Transaction::new(
            TransactionType::Withdrawal,
            "user-1",
            PaymentMethod::Bitcoin,
            "chainpay",
            dec!(1),
            dec!(0.005),
            "BTC",
        );
        assert_eq!(tx.confirmations_required, 0);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(TransactionStatus::Pending.is_in_flight());
        assert!(TransactionStatus::Processing.is_in_flight());
        assert!(TransactionStatus::Completed.is_terminal());
        assert!(TransactionStatus::Failed.is_terminal());
        assert!(TransactionStatus::Cancelled.is_terminal());
        assert!(TransactionStatus::Refunded.is_terminal());
        assert!(TransactionStatus::Disputed.is_terminal());
    }

    #[test]
    fn test_chargeback_mirror_links_original() {
        let original = deposit(dec!(100.00), dec!(2.90));
        let cbk = Transaction::chargeback_of(&original, "card network dispute");

        assert!(cbk.id.as_str().starts_with("cbk_"));
        assert_eq!(cbk.amount, dec!(100.00));
        assert_eq!(cbk.fee, Decimal::ZERO);
        assert_eq!(cbk.net_amount, dec!(100.00));
        assert_eq!(cbk.status, TransactionStatus::Completed);
        assert_eq!(
            cbk.metadata.get("chargeback_of"),
            Some(&original.id.as_str().to_string())
        );
    }

    #[test]
    fn test_refund_mirror_takes_partial_amount() {
        let original = deposit(dec!(100.00), dec!(2.90));
        let refund = Transaction::refund_of(&original, dec!(40.00), "customer request");

        assert!(refund.id.as_str().starts_with("ref_"));
        assert_eq!(refund.amount, dec!(40.00));
        assert_eq!(refund.net_amount, dec!(40.00));
        assert_eq!(refund.status, TransactionStatus::Completed);
        assert_eq!(
            refund.metadata.get("refund_of"),
            Some(&original.id.as_str().to_string())
        );
    }

    #[test]
    fn test_base_amount_uses_rate_snapshot() {
        let mut tx = Transaction::new(
            TransactionType::Deposit,
            "user-1",
            PaymentMethod::Bitcoin,
            "chainpay",
            dec!(0.05),
            dec!(0.00025),
            "BTC",
        );
        tx.exchange_rate = Some(dec!(40000));
        assert_eq!(tx.base_amount(), dec!(2000.00));
        assert_eq!(tx.base_fee(), dec!(10.00));

        let usd = deposit(dec!(100.00), dec!(2.90));
        assert_eq!(usd.base_amount(), dec!(100.00));
    }

    #[test]
    fn test_notes_do_not_touch_updated_at() {
        let mut tx = deposit(dec!(100.00), dec!(2.90));
        let before = tx.updated_at;
        tx.note("risk_score", "15");
        assert_eq!(tx.updated_at, before);
        assert_eq!(tx.metadata.get("risk_score"), Some(&"15".to_string()));
    }
}
