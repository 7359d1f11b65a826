use super::fraud::{FraudEngine, ScreeningContext};
use super::limits::LimitsChecker;
use super::{GatewayContext, base_value};
use crate::config::{BANK_TRANSFER_COMPLETION_DAYS, FeeSchedule, GatewayConfig};
use crate::domain::ports::{ProviderDepositRequest, ProviderPaymentResponse};
use crate::domain::transaction::{
    PaymentMethod, Transaction, TransactionId, TransactionStatus, TransactionType,
};
use crate::error::{PaymentError, Result};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct DepositRequest {
    pub user_id: String,
    pub method: PaymentMethod,
    pub amount: Decimal,
    pub currency: String,
    pub ip: Option<String>,
    /// Country the request originates from; falls back to the customer's
    /// residence country when absent.
    pub country: Option<String>,
    pub device_id: Option<String>,
    pub return_url: Option<String>,
}

/// Follow-up the customer must perform before funds can arrive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NextAction {
    /// Open the provider's hosted payment page.
    RedirectTo(String),
    /// Complete the card 3-D Secure challenge.
    ThreeDSecure(String),
    /// Transfer the funds on-chain to this address.
    SendFundsTo(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositReceipt {
    pub transaction_id: TransactionId,
    pub status: TransactionStatus,
    pub fee: Decimal,
    pub net_amount: Decimal,
    pub next_action: Option<NextAction>,
    pub confirmations_required: Option<u32>,
}

/// Drives a deposit from request to settled funds.
///
/// The flow is: validate, screen against limits and fraud, route to the
/// first provider supporting the method, persist, then hand off to the
/// provider. Funds are credited only when the transaction reaches
/// `Completed`, and the crediting always rides on the store's
/// `mark_completed` transition so it happens exactly once.
pub struct DepositService {
    ctx: GatewayContext,
    fraud: FraudEngine,
    limits: LimitsChecker,
    fees: FeeSchedule,
}

impl DepositService {
    pub fn new(config: &GatewayConfig, ctx: GatewayContext) -> Self {
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
        }
    }

    pub async fn process_deposit(&self, request: DepositRequest) -> Result<DepositReceipt> {
        if request.user_id.is_empty() {
            return Err(PaymentError::Validation("user id is required".to_string()));
        }
        if request.amount <= Decimal::ZERO {
            return Err(PaymentError::Validation(
                "deposit amount must be positive".to_string(),
            ));
        }
        if request.currency.is_empty() {
            return Err(PaymentError::Validation("currency is required".to_string()));
        }

        let profile = self.ctx.directory.profile(&request.user_id).await?;
        let (base_amount, rate) =
            base_value(&self.ctx.rates, &request.currency, request.amount).await?;

        self.limits
            .check_deposit(&profile, request.method, base_amount, Utc::now())
            .await?;

        let assessment = self
            .fraud
            .assess_deposit(&ScreeningContext {
                profile: &profile,
                amount: base_amount,
                ip: request.ip.as_deref(),
                country: Some(request.country.as_deref().unwrap_or(&profile.country)),
                device_id: request.device_id.as_deref(),
            })
            .await?;
        if assessment.blocked {
            let reason = assessment
                .block_reason
                .unwrap_or_else(|| "refused by fraud screening".to_string());
            return Err(PaymentError::FraudBlocked(reason));
        }

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
            TransactionType::Deposit,
            &request.user_id,
            request.method,
            provider.name(),
            request.amount,
            fee,
            &request.currency,
        );
        tx.exchange_rate = rate;
        tx.note("risk_score", assessment.score.to_string());
        if request.method == PaymentMethod::BankTransfer {
            let eta = Utc::now() + Duration::days(BANK_TRANSFER_COMPLETION_DAYS);
            tx.note("estimated_completion", eta.to_rfc3339());
        }
        self.ctx.store.insert(tx.clone()).await?;
        info!(
            id = %tx.id,
            user = %tx.user_id,
            method = %tx.method,
            amount = %tx.amount,
            currency = %tx.currency,
            "deposit accepted"
        );

        let response = match provider.initiate_deposit(&deposit_request(&tx, &request)).await {
            Ok(response) => response,
            Err(e) => {
                warn!(id = %tx.id, provider = %tx.provider, error = %e, "deposit initiation failed");
                tx.fail(&e.to_string());
                self.ctx.store.update(tx).await?;
                return Err(e);
            }
        };

        tx.provider_tx_id = Some(response.provider_tx_id.clone());
        tx.set_status(TransactionStatus::Processing);
        self.ctx.store.update(tx.clone()).await?;

        match response.status {
            TransactionStatus::Completed => {
                if self.ctx.store.mark_completed(&tx.id, Utc::now()).await? {
                    self.ctx.credit_deposit(&tx).await?;
                }
            }
            TransactionStatus::Failed => {
                let reason = response
                    .message
                    .as_deref()
                    .unwrap_or("refused by provider");
                self.ctx.store.mark_failed(&tx.id, reason).await?;
            }
            _ => {}
        }

        let tx = self
            .ctx
            .store
            .get(&tx.id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(tx.id.to_string()))?;
        Ok(DepositReceipt {
            next_action: next_action_for(tx.method, &response),
            confirmations_required: (tx.confirmations_required > 0)
                .then_some(tx.confirmations_required),
            transaction_id: tx.id,
            status: tx.status,
            fee: tx.fee,
            net_amount: tx.net_amount,
        })
    }

    /// Polls the chain through the provider and credits the deposit once
    /// enough confirmations have accumulated. Safe to call from any number
    /// of concurrent monitors: the `mark_completed` transition picks a
    /// single winner to credit the funds.
    pub async fn monitor_crypto_deposit(&self, id: &TransactionId) -> Result<Transaction> {
        let tx = self
            .ctx
            .store
            .get(id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(id.to_string()))?;
        if tx.tx_type != TransactionType::Deposit || !tx.method.is_crypto() {
            return Err(PaymentError::invalid_state(
                id.as_str(),
                "not a crypto deposit",
            ));
        }
        if tx.status == TransactionStatus::Completed {
            return Ok(tx);
        }
        if tx.status.is_terminal() {
            return Err(PaymentError::invalid_state(
                id.as_str(),
                format!("already {}", tx.status),
            ));
        }
        let provider_tx_id = tx
            .provider_tx_id
            .clone()
            .ok_or_else(|| PaymentError::invalid_state(id.as_str(), "no provider transaction id"))?;
        let provider = self
            .ctx
            .providers
            .by_name(&tx.provider)
            .ok_or_else(|| PaymentError::provider(tx.provider.clone(), "not registered"))?;

        let state = provider.verify_deposit(&provider_tx_id).await?;
        if state.status == TransactionStatus::Failed {
            self.ctx.store.mark_failed(id, "reported failed by provider").await?;
        } else {
            let received = state.confirmations.unwrap_or(0);
            self.ctx.store.record_confirmations(id, received).await?;
            if received >= tx.confirmations_required
                && self.ctx.store.mark_completed(id, Utc::now()).await?
            {
                self.ctx.credit_deposit(&tx).await?;
                info!(id = %id, confirmations = received, "crypto deposit confirmed");
            }
        }

        self.ctx
            .store
            .get(id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(id.to_string()))
    }

    /// Read-through status check. A crypto deposit still in flight gets one
    /// monitoring pass first so the caller sees fresh chain state.
    pub async fn verify_deposit(&self, id: &TransactionId) -> Result<Transaction> {
        let tx = self
            .ctx
            .store
            .get(id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(id.to_string()))?;
        if tx.tx_type == TransactionType::Deposit
            && tx.method.is_crypto()
            && tx.status == TransactionStatus::Processing
        {
            return self.monitor_crypto_deposit(id).await;
        }
        Ok(tx)
    }

}

fn deposit_request(tx: &Transaction, request: &DepositRequest) -> ProviderDepositRequest {
    ProviderDepositRequest {
        transaction_id: tx.id.clone(),
        user_id: tx.user_id.clone(),
        method: tx.method,
        amount: tx.amount,
        currency: tx.currency.clone(),
        return_url: request.return_url.clone(),
    }
}

fn next_action_for(
    method: PaymentMethod,
    response: &ProviderPaymentResponse,
) -> Option<NextAction> {
    if let Some(address) = &response.deposit_address {
        return Some(NextAction::SendFundsTo(address.clone()));
    }
    let url = response.redirect_url.clone()?;
    Some(match method {
        PaymentMethod::Card => NextAction::ThreeDSecure(url),
        _ => NextAction::RedirectTo(url),
    })
}
