//! Policy knobs for the gateway: fraud thresholds, fee schedule, payment
//! limits. Everything is overridable from a JSON file; defaults match the
//! production values.

use crate::domain::ports::VerificationTier;
use crate::domain::transaction::PaymentMethod;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Base currency every limit and threshold is denominated in.
pub const BASE_CURRENCY: &str = "USD";

/// Withdrawals at or above this base-currency amount queue for manual
/// approval regardless of risk score.
pub const MANUAL_APPROVAL_AMOUNT: Decimal = dec!(10000);

/// Withdrawals at or above this risk score queue for manual approval
/// regardless of amount.
pub const MANUAL_APPROVAL_RISK_SCORE: u32 = 70;

/// How often a failed transaction may be retried before it is written off.
pub const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Expected settlement window for bank transfer deposits.
pub const BANK_TRANSFER_COMPLETION_DAYS: i64 = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudConfig {
    #[serde(default = "default_max_hourly_transactions")]
    pub max_hourly_transactions: u32,
    #[serde(default = "default_max_daily_transactions")]
    pub max_daily_transactions: u32,
    /// Reputation scores below this add risk.
    #[serde(default = "default_min_ip_reputation_score")]
    pub min_ip_reputation_score: u32,
    /// Requests from these countries are refused outright.
    #[serde(default = "default_blocked_countries")]
    pub blocked_countries: Vec<String>,
    #[serde(default = "default_high_risk_countries")]
    pub high_risk_countries: Vec<String>,
    /// Deposits scoring at or above this are refused.
    #[serde(default = "default_deposit_block_score")]
    pub deposit_block_score: u32,
}

fn default_max_hourly_transactions() -> u32 {
    10
}

fn default_max_daily_transactions() -> u32 {
    50
}

fn default_min_ip_reputation_score() -> u32 {
    50
}

fn default_blocked_countries() -> Vec<String> {
    ["KP", "IR", "SY", "CU"].map(String::from).to_vec()
}

fn default_high_risk_countries() -> Vec<String> {
    ["AF", "MM", "YE", "ZW"].map(String::from).to_vec()
}

fn default_deposit_block_score() -> u32 {
    80
}

impl Default for FraudConfig {
    fn default() -> Self {
        Self {
            max_hourly_transactions: default_max_hourly_transactions(),
            max_daily_transactions: default_max_daily_transactions(),
            min_ip_reputation_score: default_min_ip_reputation_score(),
            blocked_countries: default_blocked_countries(),
            high_risk_countries: default_high_risk_countries(),
            deposit_block_score: default_deposit_block_score(),
        }
    }
}

/// Per-method fee rates, applied to the gross amount at transaction
/// creation. Fiat fees round to cents, crypto fees to 8 places, both half
/// away from zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeSchedule {
    #[serde(default = "default_fee_rates")]
    pub rates: BTreeMap<PaymentMethod, Decimal>,
}

fn default_fee_rates() -> BTreeMap<PaymentMethod, Decimal> {
    BTreeMap::from([
        (PaymentMethod::Card, dec!(0.029)),
        (PaymentMethod::BankTransfer, dec!(0.010)),
        (PaymentMethod::Ach, dec!(0.005)),
        (PaymentMethod::Sepa, dec!(0.005)),
        (PaymentMethod::Wire, dec!(0.015)),
        (PaymentMethod::Paypal, dec!(0.019)),
        (PaymentMethod::Skrill, dec!(0.019)),
        (PaymentMethod::Bitcoin, dec!(0.005)),
        (PaymentMethod::Ethereum, dec!(0.005)),
        (PaymentMethod::Usdt, dec!(0.005)),
    ])
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            rates: default_fee_rates(),
        }
    }
}

impl FeeSchedule {
    pub fn rate(&self, method: PaymentMethod) -> Decimal {
        self.rates.get(&method).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn fee_for(&self, method: PaymentMethod, amount: Decimal) -> Decimal {
        let places = if method.is_crypto() { 8 } else { 2 };
        (amount * self.rate(method))
            .round_dp_with_strategy(places, RoundingStrategy::MidpointAwayFromZero)
    }
}

/// Per-method transaction bounds and rolling caps for the base tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodLimits {
    pub min_amount: Decimal,
    pub max_amount: Decimal,
    pub daily_cap: Decimal,
    pub weekly_cap: Decimal,
    pub monthly_cap: Decimal,
    #[serde(default)]
    pub requires_verification: bool,
}

/// Limits resolved for one customer and method: the base table scaled by
/// the customer's verification tier. Maximum and caps scale, the minimum
/// does not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentLimits {
    pub method: PaymentMethod,
    pub tier: VerificationTier,
    pub min_amount: Decimal,
    pub max_amount: Decimal,
    pub daily_cap: Decimal,
    pub weekly_cap: Decimal,
    pub monthly_cap: Decimal,
    pub requires_verification: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_method_limits")]
    pub methods: BTreeMap<PaymentMethod, MethodLimits>,
    #[serde(default = "default_verified_multiplier")]
    pub verified_multiplier: Decimal,
    #[serde(default = "default_premium_multiplier")]
    pub premium_multiplier: Decimal,
}

fn default_verified_multiplier() -> Decimal {
    dec!(10)
}

fn default_premium_multiplier() -> Decimal {
    dec!(50)
}

fn default_method_limits() -> BTreeMap<PaymentMethod, MethodLimits> {
    let limits = |min, max, daily, weekly, monthly, requires_verification| MethodLimits {
        min_amount: min,
        max_amount: max,
        daily_cap: daily,
        weekly_cap: weekly,
        monthly_cap: monthly,
        requires_verification,
    };
    BTreeMap::from([
        (
            PaymentMethod::Card,
            limits(
                dec!(10),
                dec!(1000),
                dec!(2000),
                dec!(5000),
                dec!(10000),
                false,
            ),
        ),
        (
            PaymentMethod::BankTransfer,
            limits(
                dec!(50),
                dec!(2000),
                dec!(4000),
                dec!(10000),
                dec!(20000),
                true,
            ),
        ),
        (
            PaymentMethod::Ach,
            limits(
                dec!(10),
                dec!(1000),
                dec!(2000),
                dec!(5000),
                dec!(10000),
                true,
            ),
        ),
        (
            PaymentMethod::Sepa,
            limits(
                dec!(10),
                dec!(1000),
                dec!(2000),
                dec!(5000),
                dec!(10000),
                true,
            ),
        ),
        (
            PaymentMethod::Wire,
            limits(
                dec!(100),
                dec!(5000),
                dec!(10000),
                dec!(25000),
                dec!(50000),
                true,
            ),
        ),
        (
            PaymentMethod::Paypal,
            limits(
                dec!(5),
                dec!(500),
                dec!(1000),
                dec!(2500),
                dec!(5000),
                false,
            ),
        ),
        (
            PaymentMethod::Skrill,
            limits(
                dec!(5),
                dec!(500),
                dec!(1000),
                dec!(2500),
                dec!(5000),
                false,
            ),
        ),
        (
            PaymentMethod::Bitcoin,
            limits(
                dec!(20),
                dec!(2000),
                dec!(4000),
                dec!(10000),
                dec!(20000),
                false,
            ),
        ),
        (
            PaymentMethod::Ethereum,
            limits(
                dec!(20),
                dec!(2000),
                dec!(4000),
                dec!(10000),
                dec!(20000),
                false,
            ),
        ),
        (
            PaymentMethod::Usdt,
            limits(
                dec!(20),
                dec!(2000),
                dec!(4000),
                dec!(10000),
                dec!(20000),
                false,
            ),
        ),
    ])
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            methods: default_method_limits(),
            verified_multiplier: default_verified_multiplier(),
            premium_multiplier: default_premium_multiplier(),
        }
    }
}

impl LimitsConfig {
    pub fn limits_for(&self, tier: VerificationTier, method: PaymentMethod) -> PaymentLimits {
        // Methods absent from the table fall back to a conservative entry
        // rather than going unlimited.
        let base = self.methods.get(&method).cloned().unwrap_or(MethodLimits {
            min_amount: dec!(1),
            max_amount: dec!(500),
            daily_cap: dec!(1000),
            weekly_cap: dec!(2500),
            monthly_cap: dec!(5000),
            requires_verification: true,
        });
        let factor = match tier {
            VerificationTier::Unverified => Decimal::ONE,
            VerificationTier::Verified => self.verified_multiplier,
            VerificationTier::Premium => self.premium_multiplier,
        };
        PaymentLimits {
            method,
            tier,
            min_amount: base.min_amount,
            max_amount: base.max_amount * factor,
            daily_cap: base.daily_cap * factor,
            weekly_cap: base.weekly_cap * factor,
            monthly_cap: base.monthly_cap * factor,
            requires_verification: base.requires_verification,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub fraud: FraudConfig,
    #[serde(default)]
    pub fees: FeeSchedule,
    #[serde(default)]
    pub limits: LimitsConfig,
}

impl GatewayConfig {
    /// Loads overrides from a JSON file; missing fields keep their
    /// defaults.
    pub fn from_file(path: &Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}
