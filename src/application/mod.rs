//! Application layer containing the core business logic orchestration.
//!
//! Each service owns the ports it needs and drives one flow end to end:
//! deposits, withdrawals, fraud screening, limit enforcement,
//! reconciliation. Side effects that must happen exactly once (crediting,
//! settling or releasing holds) ride on the store's compare-and-set
//! transitions so concurrent callers cannot double-apply them.

pub mod deposits;
pub mod fraud;
pub mod limits;
pub mod reconciliation;
pub mod withdrawals;

use crate::config::BASE_CURRENCY;
use crate::domain::ports::{
    BalanceLedgerRef, CustomerDirectoryRef, IpReputationRef, ProviderRegistry, RateSourceRef,
    TransactionStoreRef,
};
use crate::domain::transaction::Transaction;
use crate::error::{PaymentError, Result};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;

/// Shared infrastructure handles, cloned into every service.
#[derive(Clone)]
pub struct GatewayContext {
    pub store: TransactionStoreRef,
    pub ledger: BalanceLedgerRef,
    pub directory: CustomerDirectoryRef,
    pub reputation: IpReputationRef,
    pub rates: RateSourceRef,
    pub providers: Arc<ProviderRegistry>,
}

impl GatewayContext {
    /// Books the ledger and profile effects of a completed deposit. Callers
    /// must hold the `mark_completed` win for this transaction.
    pub(crate) async fn credit_deposit(&self, tx: &Transaction) -> Result<()> {
        self.ledger
            .credit(&tx.user_id, &tx.currency, tx.net_amount)
            .await?;
        self.directory
            .record_completed_deposit(&tx.user_id, tx.method, tx.base_amount())
            .await?;
        info!(id = %tx.id, user = %tx.user_id, amount = %tx.net_amount, "deposit credited");
        Ok(())
    }

    /// Books the ledger and profile effects of a completed withdrawal.
    /// Callers must hold the `mark_completed` win for this transaction.
    pub(crate) async fn settle_withdrawal(&self, tx: &Transaction) -> Result<()> {
        self.ledger.settle_reservation(&tx.id).await?;
        self.directory
            .record_completed_withdrawal(&tx.user_id, tx.base_amount())
            .await?;
        info!(id = %tx.id, user = %tx.user_id, "withdrawal settled");
        Ok(())
    }
}

/// Expresses an amount in the gateway base currency, returning the value
/// and the rate snapshot used (`None` when no conversion applied).
pub(crate) async fn base_value(
    rates: &RateSourceRef,
    currency: &str,
    amount: Decimal,
) -> Result<(Decimal, Option<Decimal>)> {
    if currency == BASE_CURRENCY {
        return Ok((amount, None));
    }
    match rates.rate(currency, BASE_CURRENCY).await? {
        Some(rate) => Ok((amount * rate, Some(rate))),
        None => Err(PaymentError::Validation(format!(
            "no exchange rate available for {currency}"
        ))),
    }
}
