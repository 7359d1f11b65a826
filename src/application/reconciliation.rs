use super::GatewayContext;
use crate::config::MAX_RETRY_ATTEMPTS;
use crate::domain::ports::{
    ProviderDepositRequest, ProviderTransactionState, ProviderWithdrawalRequest,
};
use crate::domain::transaction::{Transaction, TransactionId, TransactionStatus, TransactionType};
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Outcome of comparing one stored transaction against its provider.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationResult {
    pub transaction_id: TransactionId,
    pub matched: bool,
    pub discrepancy: Option<String>,
    pub provider_status_adopted: bool,
}

impl ReconciliationResult {
    fn matched(id: TransactionId) -> Self {
        Self {
            transaction_id: id,
            matched: true,
            discrepancy: None,
            provider_status_adopted: false,
        }
    }

    fn mismatch(id: TransactionId, discrepancy: String, adopted: bool) -> Self {
        Self {
            transaction_id: id,
            matched: false,
            discrepancy: Some(discrepancy),
            provider_status_adopted: adopted,
        }
    }
}

/// One aggregated settlement row: a provider's completed volume for one
/// transaction direction, in base currency.
#[derive(Debug, Clone, Serialize)]
pub struct SettlementLine {
    pub provider: String,
    pub tx_type: TransactionType,
    pub count: u64,
    pub gross: Decimal,
    pub fees: Decimal,
    pub net: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct SettlementReport {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub lines: Vec<SettlementLine>,
    pub total_deposits: Decimal,
    pub total_withdrawals: Decimal,
    pub total_fees: Decimal,
    /// Deposits minus withdrawals minus fees.
    pub net_settlement: Decimal,
}

/// Back-office operations: comparing stored transactions against provider
/// records, settlement aggregation, chargebacks, refunds, retries and
/// webhook ingestion.
///
/// Discrepancies are never corrected silently. A provider status is adopted
/// only when the provider's record is strictly newer, and any adoption that
/// completes or fails a transaction rides the store's status transitions so
/// the ledger effect lands exactly once.
pub struct ReconciliationService {
    ctx: GatewayContext,
}

impl ReconciliationService {
    pub fn new(ctx: GatewayContext) -> Self {
        Self { ctx }
    }

    /// Compares one transaction against the provider's view of it.
    ///
    /// A transaction that never reached a provider has nothing to compare
    /// and counts as matched. On a status mismatch the provider's view wins
    /// only when its `updated_at` is strictly newer; otherwise the stored
    /// record stays and the mismatch is reported for manual review.
    pub async fn reconcile_transaction(&self, id: &TransactionId) -> Result<ReconciliationResult> {
        let tx = self
            .ctx
            .store
            .get(id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(id.to_string()))?;

        let Some(provider_tx_id) = tx.provider_tx_id.clone() else {
            return Ok(ReconciliationResult::matched(tx.id));
        };
        let Some(provider) = self.ctx.providers.by_name(&tx.provider) else {
            return Ok(ReconciliationResult::mismatch(
                tx.id,
                format!("provider {} is not registered", tx.provider),
                false,
            ));
        };

        let verified = match tx.tx_type {
            TransactionType::Deposit => provider.verify_deposit(&provider_tx_id).await,
            TransactionType::Withdrawal => provider.verify_withdrawal(&provider_tx_id).await,
            // Mirror records have no provider leg of their own.
            _ => return Ok(ReconciliationResult::matched(tx.id)),
        };
        let state = match verified {
            Ok(state) => state,
            Err(e) => {
                warn!(id = %tx.id, provider = %tx.provider, error = %e, "provider verification failed");
                return Ok(ReconciliationResult::mismatch(
                    tx.id,
                    format!("provider verification failed: {e}"),
                    false,
                ));
            }
        };

        if state.status == tx.status {
            return Ok(ReconciliationResult::matched(tx.id));
        }

        let discrepancy = format!("stored {} but provider reports {}", tx.status, state.status);
        if state.updated_at <= tx.updated_at {
            warn!(id = %tx.id, %discrepancy, "discrepancy kept for manual review");
            return Ok(ReconciliationResult::mismatch(tx.id, discrepancy, false));
        }

        self.adopt_provider_status(&tx, &state).await?;
        info!(id = %tx.id, from = %tx.status, to = %state.status, "adopted provider status");
        Ok(ReconciliationResult::mismatch(tx.id, discrepancy, true))
    }

    /// Reconciles every transaction created in the window. One transaction
    /// failing does not abort the rest.
    pub async fn reconcile_batch(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ReconciliationResult>> {
        let txs = self.ctx.store.list_in_window(from, to).await?;
        self.reconcile_all(txs).await
    }

    /// Reconciles one provider's transactions created in the window.
    pub async fn reconcile_provider(
        &self,
        provider: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ReconciliationResult>> {
        let txs = self
            .ctx
            .store
            .list_for_provider_in_window(provider, from, to)
            .await?;
        self.reconcile_all(txs).await
    }

    async fn reconcile_all(&self, txs: Vec<Transaction>) -> Result<Vec<ReconciliationResult>> {
        let mut results = Vec::with_capacity(txs.len());
        for tx in txs {
            match self.reconcile_transaction(&tx.id).await {
                Ok(result) => results.push(result),
                Err(e) => warn!(id = %tx.id, error = %e, "skipping transaction in batch"),
            }
        }
        Ok(results)
    }

    /// Aggregates completed volume in the window by provider and direction.
    pub async fn settlement_report(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<SettlementReport> {
        let completed = self.ctx.store.list_completed_in_window(from, to).await?;

        let mut lines: BTreeMap<(String, TransactionType), SettlementLine> = BTreeMap::new();
        for tx in &completed {
            if !matches!(
                tx.tx_type,
                TransactionType::Deposit | TransactionType::Withdrawal
            ) {
                continue;
            }
            let line = lines
                .entry((tx.provider.clone(), tx.tx_type))
                .or_insert_with(|| SettlementLine {
                    provider: tx.provider.clone(),
                    tx_type: tx.tx_type,
                    count: 0,
                    gross: Decimal::ZERO,
                    fees: Decimal::ZERO,
                    net: Decimal::ZERO,
                });
            line.count += 1;
            line.gross += tx.base_amount();
            line.fees += tx.base_fee();
            line.net = line.gross - line.fees;
        }
        let lines: Vec<SettlementLine> = lines.into_values().collect();

        let sum_gross = |direction: TransactionType| -> Decimal {
            lines
                .iter()
                .filter(|l| l.tx_type == direction)
                .map(|l| l.gross)
                .sum()
        };
        let total_deposits = sum_gross(TransactionType::Deposit);
        let total_withdrawals = sum_gross(TransactionType::Withdrawal);
        let total_fees: Decimal = lines.iter().map(|l| l.fees).sum();

        Ok(SettlementReport {
            from,
            to,
            net_settlement: total_deposits - total_withdrawals - total_fees,
            lines,
            total_deposits,
            total_withdrawals,
            total_fees,
        })
    }

    /// Books a chargeback against a completed deposit: a completed mirror
    /// record, a full-amount clawback and the original marked disputed.
    pub async fn handle_chargeback(
        &self,
        id: &TransactionId,
        reason: &str,
    ) -> Result<Transaction> {
        let mut original = self
            .ctx
            .store
            .get(id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(id.to_string()))?;
        if original.tx_type != TransactionType::Deposit {
            return Err(PaymentError::invalid_state(
                id.as_str(),
                "chargebacks apply to deposits",
            ));
        }
        if original.status != TransactionStatus::Completed {
            return Err(PaymentError::invalid_state(
                id.as_str(),
                "only completed deposits can be charged back",
            ));
        }

        let mirror = Transaction::chargeback_of(&original, reason);
        self.ctx.store.insert(mirror.clone()).await?;
        self.ctx
            .ledger
            .debit(&original.user_id, &original.currency, original.amount)
            .await?;

        original.note("chargeback_id", mirror.id.as_str());
        original.note("disputed_at", Utc::now().to_rfc3339());
        original.set_status(TransactionStatus::Disputed);
        self.ctx.store.update(original).await?;

        warn!(id = %id, chargeback = %mirror.id, amount = %mirror.amount, reason, "chargeback booked");
        Ok(mirror)
    }

    /// Returns part or all of a completed deposit to the customer. The
    /// original keeps its status: unlike a chargeback, a refund only books
    /// the mirrored transaction and the debit.
    pub async fn process_refund(
        &self,
        id: &TransactionId,
        amount: Decimal,
        reason: &str,
    ) -> Result<Transaction> {
        if amount <= Decimal::ZERO {
            return Err(PaymentError::Validation(
                "refund amount must be positive".to_string(),
            ));
        }
        let mut original = self
            .ctx
            .store
            .get(id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(id.to_string()))?;
        if original.tx_type != TransactionType::Deposit {
            return Err(PaymentError::invalid_state(
                id.as_str(),
                "refunds apply to deposits",
            ));
        }
        if original.status != TransactionStatus::Completed {
            return Err(PaymentError::invalid_state(
                id.as_str(),
                "only completed deposits can be refunded",
            ));
        }

        if amount > original.amount {
            return Err(PaymentError::Validation(format!(
                "refund amount {amount} exceeds the original amount {}",
                original.amount
            )));
        }

        let mirror = Transaction::refund_of(&original, amount, reason);
        self.ctx.store.insert(mirror.clone()).await?;
        self.ctx
            .ledger
            .debit(&original.user_id, &original.currency, amount)
            .await?;

        original.note("refund_id", mirror.id.as_str());
        original.note("refunded_at", Utc::now().to_rfc3339());
        self.ctx.store.update(original).await?;

        info!(id = %id, refund = %mirror.id, amount = %amount, reason, "refund processed");
        Ok(mirror)
    }

    /// Re-submits a failed transaction to its provider. The counter tracks
    /// failed attempts; after three the transaction needs manual
    /// intervention. A retried withdrawal reserves its funds again before
    /// anything is sent out.
    pub async fn retry_failed(&self, id: &TransactionId) -> Result<Transaction> {
        let tx = self
            .ctx
            .store
            .get(id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(id.to_string()))?;
        if !matches!(
            tx.tx_type,
            TransactionType::Deposit | TransactionType::Withdrawal
        ) {
            return Err(PaymentError::invalid_state(
                id.as_str(),
                "only deposits and withdrawals can be retried",
            ));
        }
        if tx.status != TransactionStatus::Failed {
            return Err(PaymentError::invalid_state(
                id.as_str(),
                "only failed transactions can be retried",
            ));
        }
        if tx.retry_count >= MAX_RETRY_ATTEMPTS {
            return Err(PaymentError::MaxRetriesExceeded(id.to_string()));
        }
        let provider = self
            .ctx
            .providers
            .by_name(&tx.provider)
            .ok_or_else(|| PaymentError::provider(tx.provider.clone(), "not registered"))?;

        // The failed attempt released its hold, so a withdrawal has to pass
        // the funds check again.
        if tx.tx_type == TransactionType::Withdrawal {
            self.ctx
                .ledger
                .reserve(&tx.user_id, &tx.currency, tx.amount, &tx.id)
                .await?;
        }

        let submitted = match tx.tx_type {
            TransactionType::Deposit => {
                provider
                    .initiate_deposit(&ProviderDepositRequest {
                        transaction_id: tx.id.clone(),
                        user_id: tx.user_id.clone(),
                        method: tx.method,
                        amount: tx.amount,
                        currency: tx.currency.clone(),
                        return_url: None,
                    })
                    .await
            }
            _ => {
                provider
                    .initiate_withdrawal(&ProviderWithdrawalRequest {
                        transaction_id: tx.id.clone(),
                        user_id: tx.user_id.clone(),
                        method: tx.method,
                        amount: tx.amount,
                        currency: tx.currency.clone(),
                        destination: tx
                            .metadata
                            .get("destination")
                            .cloned()
                            .unwrap_or_default(),
                    })
                    .await
            }
        };
        let submitted = submitted.and_then(|response| {
            if response.status == TransactionStatus::Failed {
                Err(PaymentError::provider(
                    provider.name(),
                    response
                        .message
                        .clone()
                        .unwrap_or_else(|| "refused by provider".to_string()),
                ))
            } else {
                Ok(response)
            }
        });

        match submitted {
            Err(e) => {
                if tx.tx_type == TransactionType::Withdrawal {
                    self.ctx.ledger.release_reservation(&tx.id).await?;
                }
                let mut failed = tx;
                failed.retry_count += 1;
                failed.last_retry_at = Some(Utc::now());
                failed.fail(&e.to_string());
                warn!(id = %id, attempt = failed.retry_count, error = %e, "retry failed");
                self.ctx.store.update(failed).await?;
                Err(e)
            }
            Ok(response) => {
                let mut revived = tx;
                revived.provider_tx_id = Some(response.provider_tx_id.clone());
                revived.note("retry_succeeded_at", Utc::now().to_rfc3339());
                revived.set_status(TransactionStatus::Processing);
                self.ctx.store.update(revived.clone()).await?;

                if response.status == TransactionStatus::Completed
                    && self.ctx.store.mark_completed(&revived.id, Utc::now()).await?
                {
                    match revived.tx_type {
                        TransactionType::Deposit => self.ctx.credit_deposit(&revived).await?,
                        _ => self.ctx.settle_withdrawal(&revived).await?,
                    }
                }
                info!(id = %id, "retry dispatched");
                self.ctx
                    .store
                    .get(id)
                    .await?
                    .ok_or_else(|| PaymentError::NotFound(id.to_string()))
            }
        }
    }

    /// Applies a provider push notification. The signature is checked
    /// before anything is parsed, and the resulting status change rides the
    /// same guarded transitions as the polling paths.
    pub async fn ingest_webhook(
        &self,
        provider_name: &str,
        payload: &[u8],
        signature: &str,
    ) -> Result<Transaction> {
        let provider = self
            .ctx
            .providers
            .by_name(provider_name)
            .ok_or_else(|| PaymentError::provider(provider_name, "not registered"))?;
        provider.verify_webhook_signature(payload, signature)?;
        let event = provider.parse_webhook(payload)?;

        let tx = self
            .ctx
            .store
            .find_by_provider_tx_id(&event.provider_tx_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(event.provider_tx_id.clone()))?;

        match event.status {
            TransactionStatus::Completed => {
                if self.ctx.store.mark_completed(&tx.id, Utc::now()).await? {
                    match tx.tx_type {
                        TransactionType::Deposit => self.ctx.credit_deposit(&tx).await?,
                        TransactionType::Withdrawal => self.ctx.settle_withdrawal(&tx).await?,
                        _ => {}
                    }
                }
            }
            TransactionStatus::Failed => {
                if self
                    .ctx
                    .store
                    .mark_failed(&tx.id, "reported failed by provider webhook")
                    .await?
                    && tx.tx_type == TransactionType::Withdrawal
                {
                    self.ctx.ledger.release_reservation(&tx.id).await?;
                }
            }
            status => {
                info!(id = %tx.id, %status, "webhook carried no terminal status");
            }
        }
        info!(id = %tx.id, provider = provider_name, status = %event.status, "webhook applied");
        self.ctx
            .store
            .get(&tx.id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(tx.id.to_string()))
    }

    async fn adopt_provider_status(
        &self,
        tx: &Transaction,
        state: &ProviderTransactionState,
    ) -> Result<()> {
        if let Some(confirmations) = state.confirmations {
            self.ctx
                .store
                .record_confirmations(&tx.id, confirmations)
                .await?;
        }
        match state.status {
            TransactionStatus::Completed => {
                if self.ctx.store.mark_completed(&tx.id, state.updated_at).await? {
                    match tx.tx_type {
                        TransactionType::Deposit => self.ctx.credit_deposit(tx).await?,
                        TransactionType::Withdrawal => self.ctx.settle_withdrawal(tx).await?,
                        _ => {}
                    }
                }
            }
            TransactionStatus::Failed => {
                if self
                    .ctx
                    .store
                    .mark_failed(&tx.id, "adopted from provider during reconciliation")
                    .await?
                    && tx.tx_type == TransactionType::Withdrawal
                {
                    self.ctx.ledger.release_reservation(&tx.id).await?;
                }
            }
            status => {
                let mut updated = self
                    .ctx
                    .store
                    .get(&tx.id)
                    .await?
                    .ok_or_else(|| PaymentError::NotFound(tx.id.to_string()))?;
                updated.set_status(status);
                self.ctx.store.update(updated).await?;
            }
        }

        let mut noted = self
            .ctx
            .store
            .get(&tx.id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(tx.id.to_string()))?;
        noted.note("reconciled_at", Utc::now().to_rfc3339());
        self.ctx.store.update(noted).await
    }
}
