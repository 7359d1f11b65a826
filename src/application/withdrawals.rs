use super::fraud::{FraudEngine, ScreeningContext};
use super::limits::LimitsChecker;
use super::{GatewayContext, base_value};
use crate::config::{
    FeeSchedule, GatewayConfig, MANUAL_APPROVAL_AMOUNT, MANUAL_APPROVAL_RISK_SCORE,
};
use crate::domain::ports::{ProviderWithdrawalRequest, WithdrawalVerifierRef};
use crate::domain::transaction::{
    PaymentMethod, Transaction, TransactionId, TransactionStatus, TransactionType,
};
use crate::error::{PaymentError, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct WithdrawalRequest {
    pub user_id: String,
    pub method: PaymentMethod,
    pub amount: Decimal,
    pub currency: String,
    /// Card token, IBAN or wallet address receiving the payout.
    pub destination: String,
    /// Out-of-band confirmation code the customer received.
    pub confirmation_code: String,
    pub ip: Option<String>,
    pub device_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalReceipt {
    pub transaction_id: TransactionId,
    pub status: TransactionStatus,
    pub fee: Decimal,
    pub net_amount: Decimal,
    pub requires_manual_approval: bool,
}

/// Drives a withdrawal through its gate sequence and, once cleared, out to
/// a provider.
///
/// Gates run strictly in order and abort with no balance mutation:
/// confirmation code, single outstanding withdrawal, available balance,
/// limits, same-method rule, fraud scoring. Funds are reserved as soon as
/// the record is accepted; every reservation is later consumed exactly once
/// by either a settlement or a release, chosen by whichever caller wins the
/// store's status transition.
pub struct WithdrawalService {
    ctx: GatewayContext,
    verifier: WithdrawalVerifierRef,
    fraud: FraudEngine,
    limits: LimitsChecker,
    fees: FeeSchedule,
}

impl WithdrawalService {
    pub fn new(
        config: &GatewayConfig,
        ctx: GatewayContext,
        verifier: WithdrawalVerifierRef,
    ) -> Self {
        let fraud = FraudEngine::new(
            config.fraud.clone(),
            ctx.store.clone(),
            ctx.reputation.clone(),
            ctx.directory.clone(),
        );
        let limits = LimitsChecker::new(config.limits.clone(), ctx.store.clone());
        Self {
            fraud,
            limits,
            fees: config.fees.clone(),
            ctx,
            verifier,
        }
    }

    pub async fn process_withdrawal(&self, request: WithdrawalRequest) -> Result<WithdrawalReceipt> {
        if request.user_id.is_empty() {
            return Err(PaymentError::Validation("user id is required".to_string()));
        }
        if request.amount <= Decimal::ZERO {
            return Err(PaymentError::Validation(
                "withdrawal amount must be positive".to_string(),
            ));
        }
        if request.currency.is_empty() {
            return Err(PaymentError::Validation("currency is required".to_string()));
        }
        if request.destination.is_empty() {
            return Err(PaymentError::Validation(
                "destination is required".to_string(),
            ));
        }

        if !self
            .verifier
            .confirm(&request.user_id, &request.confirmation_code)
            .await?
        {
            return Err(PaymentError::VerificationFailed(
                "withdrawal confirmation rejected".to_string(),
            ));
        }

        if let Some(existing) = self
            .ctx
            .store
            .find_pending_withdrawal(&request.user_id)
            .await?
        {
            return Err(PaymentError::PendingWithdrawalExists(
                existing.id.to_string(),
            ));
        }

        let available = self
            .ctx
            .ledger
            .balance(&request.user_id, &request.currency)
            .await?;
        if available < request.amount {
            return Err(PaymentError::InsufficientFunds {
                available,
                requested: request.amount,
            });
        }

        let profile = self.ctx.directory.profile(&request.user_id).await?;
        let (base_amount, rate) =
            base_value(&self.ctx.rates, &request.currency, request.amount).await?;
        self.limits
            .check_withdrawal(&profile, request.method, base_amount, Utc::now())
            .await?;

        // A customer may only withdraw through a method they have already
        // deposited with.
        if !profile.deposit_methods.contains(&request.method) {
            return Err(PaymentError::SameMethodRequired(request.method.to_string()));
        }

        let assessment = self
            .fraud
            .assess_withdrawal(&ScreeningContext {
                profile: &profile,
                amount: base_amount,
                ip: request.ip.as_deref(),
                country: Some(&profile.country),
                device_id: request.device_id.as_deref(),
            })
            .await?;
        let requires_approval = base_amount >= MANUAL_APPROVAL_AMOUNT
            || assessment.score >= MANUAL_APPROVAL_RISK_SCORE;

        let provider = self
            .ctx
            .providers
            .for_method(request.method)
            .ok_or_else(|| PaymentError::NoProviderForMethod(request.method.to_string()))?;
        if !provider
            .supported_currencies()
            .iter()
            .any(|c| c == &request.currency)
        {
            return Err(PaymentError::Validation(format!(
                "provider {} does not support currency {}",
                provider.name(),
                request.currency
            )));
        }

        let fee = self.fees.fee_for(request.method, request.amount);
        let mut tx = Transaction::new(
            TransactionType::Withdrawal,
            &request.user_id,
            request.method,
            provider.name(),
            request.amount,
            fee,
            &request.currency,
        );
        tx.exchange_rate = rate;
        tx.note("destination", &request.destination);
        tx.note("risk_score", assessment.score.to_string());
        if requires_approval {
            tx.note("requires_approval", "true");
        }
        self.ctx.store.insert_pending_withdrawal(tx.clone()).await?;

        if let Err(e) = self
            .ctx
            .ledger
            .reserve(&request.user_id, &request.currency, request.amount, &tx.id)
            .await
        {
            self.ctx
                .store
                .mark_failed(&tx.id, "funds no longer available at reservation")
                .await?;
            return Err(e);
        }

        // A cancellation can land between the insert and the reservation;
        // its release finds no hold yet, so the hold taken here belongs to
        // a cancelled record and must be given back.
        let stored = self
            .ctx
            .store
            .get(&tx.id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(tx.id.to_string()))?;
        if stored.status != TransactionStatus::Pending {
            self.ctx.ledger.release_reservation(&tx.id).await?;
            return Err(PaymentError::invalid_state(
                tx.id.as_str(),
                "cancelled before funds were reserved",
            ));
        }
        info!(
            id = %tx.id,
            user = %tx.user_id,
            method = %tx.method,
            amount = %tx.amount,
            score = assessment.score,
            "withdrawal accepted"
        );

        if requires_approval {
            info!(id = %tx.id, "withdrawal queued for manual approval");
            return Ok(WithdrawalReceipt {
                transaction_id: tx.id.clone(),
                status: tx.status,
                fee: tx.fee,
                net_amount: tx.net_amount,
                requires_manual_approval: true,
            });
        }

        let tx = self.dispatch(tx).await?;
        Ok(WithdrawalReceipt {
            transaction_id: tx.id.clone(),
            status: tx.status,
            fee: tx.fee,
            net_amount: tx.net_amount,
            requires_manual_approval: false,
        })
    }

    /// Clears a withdrawal held for manual review and sends it to the
    /// provider.
    pub async fn approve_withdrawal(
        &self,
        id: &TransactionId,
        approver: &str,
    ) -> Result<Transaction> {
        let mut tx = self.get_withdrawal(id).await?;
        if tx.status != TransactionStatus::Pending {
            return Err(PaymentError::invalid_state(
                id.as_str(),
                "not awaiting approval",
            ));
        }
        tx.note("approved_by", approver);
        tx.note("approved_at", Utc::now().to_rfc3339());
        self.ctx.store.update(tx.clone()).await?;
        info!(id = %id, approver, "withdrawal approved");
        self.dispatch(tx).await
    }

    /// Declines a withdrawal held for manual review and returns its funds.
    pub async fn reject_withdrawal(
        &self,
        id: &TransactionId,
        approver: &str,
        reason: &str,
    ) -> Result<Transaction> {
        self.get_withdrawal(id).await?;
        if !self.ctx.store.mark_cancelled(id).await? {
            return Err(PaymentError::invalid_state(
                id.as_str(),
                "not awaiting approval",
            ));
        }
        self.ctx.ledger.release_reservation(id).await?;

        let mut tx = self.get_withdrawal(id).await?;
        tx.note("rejected_by", approver);
        tx.note("rejected_at", Utc::now().to_rfc3339());
        tx.note("rejection_reason", reason);
        self.ctx.store.update(tx.clone()).await?;
        info!(id = %id, approver, reason, "withdrawal rejected");
        Ok(tx)
    }

    /// Customer-initiated cancellation of a withdrawal that has not been
    /// dispatched yet.
    pub async fn cancel_withdrawal(&self, id: &TransactionId, user_id: &str) -> Result<Transaction> {
        let tx = self.get_withdrawal(id).await?;
        if tx.user_id != user_id {
            return Err(PaymentError::Validation(
                "withdrawal belongs to another user".to_string(),
            ));
        }
        if !self.ctx.store.mark_cancelled(id).await? {
            return Err(PaymentError::invalid_state(
                id.as_str(),
                "only pending withdrawals can be cancelled",
            ));
        }
        if let (Some(ptx), Some(provider)) =
            (&tx.provider_tx_id, self.ctx.providers.by_name(&tx.provider))
            && let Err(e) = provider.cancel_withdrawal(ptx).await
        {
            warn!(id = %id, error = %e, "provider-side cancellation failed");
        }
        self.ctx.ledger.release_reservation(id).await?;

        let mut tx = self.get_withdrawal(id).await?;
        tx.note("cancelled_at", Utc::now().to_rfc3339());
        self.ctx.store.update(tx.clone()).await?;
        info!(id = %id, user = user_id, "withdrawal cancelled");
        Ok(tx)
    }

    /// Re-checks a dispatched withdrawal against the provider, settling or
    /// releasing the hold according to what the provider reports.
    pub async fn verify_withdrawal(&self, id: &TransactionId) -> Result<Transaction> {
        let tx = self.get_withdrawal(id).await?;
        let Some(ptx) = tx.provider_tx_id.clone() else {
            return Ok(tx);
        };
        if tx.status != TransactionStatus::Processing {
            return Ok(tx);
        }
        let provider = self
            .ctx
            .providers
            .by_name(&tx.provider)
            .ok_or_else(|| PaymentError::provider(tx.provider.clone(), "not registered"))?;
        let state = provider.verify_withdrawal(&ptx).await?;
        match state.status {
            TransactionStatus::Completed => {
                if self.ctx.store.mark_completed(id, Utc::now()).await? {
                    self.ctx.settle_withdrawal(&tx).await?;
                }
            }
            TransactionStatus::Failed => {
                if self
                    .ctx
                    .store
                    .mark_failed(id, "reported failed by provider")
                    .await?
                {
                    self.ctx.ledger.release_reservation(id).await?;
                }
            }
            _ => {}
        }
        self.get_withdrawal(id).await
    }

    /// Provider hand-off. The `begin_processing` transition guarantees a
    /// withdrawal is dispatched at most once even when approvals race.
    async fn dispatch(&self, tx: Transaction) -> Result<Transaction> {
        let provider = self
            .ctx
            .providers
            .by_name(&tx.provider)
            .ok_or_else(|| PaymentError::provider(tx.provider.clone(), "not registered"))?;
        if !self.ctx.store.begin_processing(&tx.id).await? {
            return Err(PaymentError::invalid_state(
                tx.id.as_str(),
                "not awaiting dispatch",
            ));
        }

        let request = ProviderWithdrawalRequest {
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
        };
        let response = match provider.initiate_withdrawal(&request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(id = %tx.id, provider = %tx.provider, error = %e, "withdrawal initiation failed");
                if self.ctx.store.mark_failed(&tx.id, &e.to_string()).await? {
                    self.ctx.ledger.release_reservation(&tx.id).await?;
                }
                return Err(e);
            }
        };

        let mut updated = self.get_withdrawal(&tx.id).await?;
        updated.provider_tx_id = Some(response.provider_tx_id.clone());
        self.ctx.store.update(updated.clone()).await?;

        match response.status {
            TransactionStatus::Completed => {
                if self.ctx.store.mark_completed(&tx.id, Utc::now()).await? {
                    self.ctx.settle_withdrawal(&updated).await?;
                }
            }
            TransactionStatus::Failed => {
                let reason = response
                    .message
                    .as_deref()
                    .unwrap_or("refused by provider");
                if self.ctx.store.mark_failed(&tx.id, reason).await? {
                    self.ctx.ledger.release_reservation(&tx.id).await?;
                }
            }
            _ => {}
        }
        self.get_withdrawal(&tx.id).await
    }

    async fn get_withdrawal(&self, id: &TransactionId) -> Result<Transaction> {
        let tx = self
            .ctx
            .store
            .get(id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(id.to_string()))?;
        if tx.tx_type != TransactionType::Withdrawal {
            return Err(PaymentError::invalid_state(id.as_str(), "not a withdrawal"));
        }
        Ok(tx)
    }
}
