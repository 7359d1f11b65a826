use crate::config::{LimitsConfig, PaymentLimits};
use crate::domain::ports::{CustomerProfile, TransactionStoreRef, VerificationTier};
use crate::domain::transaction::{PaymentMethod, TransactionStatus, TransactionType};
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

/// Enforces per-transaction bounds and rolling caps, scaled by
/// verification tier.
///
/// Caps are consumed by the customer's same-direction, same-method
/// transactions over the trailing day, week and month. Anything still in
/// flight or already completed counts; failed and cancelled attempts give
/// the room back. All figures are base-currency equivalents.
pub struct LimitsChecker {
    config: LimitsConfig,
    store: TransactionStoreRef,
}

impl LimitsChecker {
    pub fn new(config: LimitsConfig, store: TransactionStoreRef) -> Self {
        Self { config, store }
    }

    pub fn limits_for(&self, tier: VerificationTier, method: PaymentMethod) -> PaymentLimits {
        self.config.limits_for(tier, method)
    }

    pub async fn check_deposit(
        &self,
        profile: &CustomerProfile,
        method: PaymentMethod,
        base_amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.check(profile, method, base_amount, TransactionType::Deposit, now)
            .await
    }

    pub async fn check_withdrawal(
        &self,
        profile: &CustomerProfile,
        method: PaymentMethod,
        base_amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.check(profile, method, base_amount, TransactionType::Withdrawal, now)
            .await
    }

    async fn check(
        &self,
        profile: &CustomerProfile,
        method: PaymentMethod,
        base_amount: Decimal,
        direction: TransactionType,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let limits = self.config.limits_for(profile.tier, method);

        if limits.requires_verification && profile.tier == VerificationTier::Unverified {
            return Err(PaymentError::LimitExceeded(format!(
                "{method} requires a verified account"
            )));
        }
        if base_amount < limits.min_amount {
            return Err(PaymentError::LimitExceeded(format!(
                "amount {base_amount} below the {method} minimum of {}",
                limits.min_amount
            )));
        }
        if base_amount > limits.max_amount {
            return Err(PaymentError::LimitExceeded(format!(
                "amount {base_amount} above the {method} maximum of {}",
                limits.max_amount
            )));
        }

        let month = self
            .store
            .list_for_user_since(&profile.user_id, now - Duration::days(30))
            .await?;
        let counted: Vec<_> = month
            .iter()
            .filter(|t| t.tx_type == direction && t.method == method)
            .filter(|t| {
                !matches!(
                    t.status,
                    TransactionStatus::Failed | TransactionStatus::Cancelled
                )
            })
            .collect();
        let spent_within = |window: Duration| -> Decimal {
            counted
                .iter()
                .filter(|t| t.created_at >= now - window)
                .map(|t| t.base_amount())
                .sum()
        };

        if spent_within(Duration::days(1)) + base_amount > limits.daily_cap {
            return Err(PaymentError::LimitExceeded(format!(
                "daily {method} cap of {} reached",
                limits.daily_cap
            )));
        }
        if spent_within(Duration::weeks(1)) + base_amount > limits.weekly_cap {
            return Err(PaymentError::LimitExceeded(format!(
                "weekly {method} cap of {} reached",
                limits.weekly_cap
            )));
        }
        if spent_within(Duration::days(30)) + base_amount > limits.monthly_cap {
            return Err(PaymentError::LimitExceeded(format!(
                "monthly {method} cap of {} reached",
                limits.monthly_cap
            )));
        }
        Ok(())
    }
}
