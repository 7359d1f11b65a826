use crate::domain::ports::{
    IpReputation, IpReputationService, ProviderClient, ProviderDepositRequest,
    ProviderPaymentResponse, ProviderTransactionState, ProviderWithdrawalRequest, RateSource,
    WebhookEvent, WithdrawalVerifier,
};
use crate::domain::transaction::{PaymentMethod, TransactionStatus};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

#[derive(Default)]
struct SandboxState {
    deposit_calls: u32,
    withdrawal_calls: u32,
    fail_next: u32,
    sequence: u32,
    confirmations: HashMap<String, u32>,
    scripted: HashMap<String, ProviderTransactionState>,
}

/// Scriptable provider double.
///
/// Defaults imitate a well-behaved processor: initiations are accepted into
/// `Processing` (or straight to `Completed` with
/// `with_immediate_completion`), crypto deposits gain one confirmation per
/// verification poll, and dispatched withdrawals verify as `Completed`.
/// Tests override behavior per call (`fail_next`) or per provider
/// transaction id (`script_state`), and can read back how often each
/// initiation endpoint was hit.
pub struct SandboxProvider {
    name: String,
    methods: Vec<PaymentMethod>,
    currencies: Vec<String>,
    immediate_completion: bool,
    state: Mutex<SandboxState>,
}

impl SandboxProvider {
    pub fn new(name: &str, methods: Vec<PaymentMethod>) -> Self {
        Self {
            name: name.to_string(),
            methods,
            currencies: vec!["USD".to_string()],
            immediate_completion: false,
            state: Mutex::new(SandboxState::default()),
        }
    }

    /// Initiations report `Completed` straight away, like a card processor
    /// with synchronous capture.
    pub fn with_immediate_completion(mut self) -> Self {
        self.immediate_completion = true;
        self
    }

    pub fn with_currencies(mut self, currencies: &[&str]) -> Self {
        self.currencies = currencies.iter().map(|c| c.to_string()).collect();
        self
    }

    /// The next `count` initiations fail with a simulated outage.
    pub async fn fail_next(&self, count: u32) {
        self.state.lock().await.fail_next = count;
    }

    /// Pins the state both verification endpoints report for this provider
    /// transaction id.
    pub async fn script_state(&self, provider_tx_id: &str, state: ProviderTransactionState) {
        self.state
            .lock()
            .await
            .scripted
            .insert(provider_tx_id.to_string(), state);
    }

    pub async fn deposit_calls(&self) -> u32 {
        self.state.lock().await.deposit_calls
    }

    pub async fn withdrawal_calls(&self) -> u32 {
        self.state.lock().await.withdrawal_calls
    }

    /// Payload this sandbox would push for the given event.
    pub fn webhook_payload(&self, provider_tx_id: &str, status: TransactionStatus) -> Vec<u8> {
        format!(r#"{{"id":"{provider_tx_id}","status":"{status}"}}"#).into_bytes()
    }

    /// Signature the sandbox attaches to a payload.
    pub fn sign(&self, payload: &[u8]) -> String {
        let checksum = payload
            .iter()
            .fold(0u32, |acc, byte| acc.wrapping_mul(31).wrapping_add(*byte as u32));
        format!("{}-{checksum:08x}", self.name)
    }

    async fn accept(&self, state: &mut SandboxState) -> Result<ProviderPaymentResponse> {
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(PaymentError::provider(&self.name, "simulated outage"));
        }
        state.sequence += 1;
        Ok(ProviderPaymentResponse {
            provider_tx_id: format!("{}-{}", self.name, state.sequence),
            status: if self.immediate_completion {
                TransactionStatus::Completed
            } else {
                TransactionStatus::Processing
            },
            redirect_url: None,
            deposit_address: None,
            message: None,
        })
    }
}

#[async_trait]
impl ProviderClient for SandboxProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_methods(&self) -> &[PaymentMethod] {
        &self.methods
    }

    fn supported_currencies(&self) -> &[String] {
        &self.currencies
    }

    async fn initiate_deposit(
        &self,
        request: &ProviderDepositRequest,
    ) -> Result<ProviderPaymentResponse> {
        let mut state = self.state.lock().await;
        state.deposit_calls += 1;
        let mut response = self.accept(&mut state).await?;
        if request.method.is_crypto() {
            response.deposit_address =
                Some(format!("{}-address-{}", self.name, state.sequence));
        } else if !self.immediate_completion {
            response.redirect_url = Some(format!(
                "https://{}.sandbox.example/pay/{}",
                self.name, response.provider_tx_id
            ));
        }
        Ok(response)
    }

    async fn verify_deposit(&self, provider_tx_id: &str) -> Result<ProviderTransactionState> {
        let mut state = self.state.lock().await;
        if let Some(scripted) = state.scripted.get(provider_tx_id) {
            return Ok(scripted.clone());
        }
        // One more confirmation lands on-chain per poll.
        let confirmations = state
            .confirmations
            .entry(provider_tx_id.to_string())
            .or_insert(0);
        *confirmations += 1;
        Ok(ProviderTransactionState {
            status: TransactionStatus::Processing,
            confirmations: Some(*confirmations),
            updated_at: Utc::now(),
        })
    }

    async fn initiate_withdrawal(
        &self,
        _request: &ProviderWithdrawalRequest,
    ) -> Result<ProviderPaymentResponse> {
        let mut state = self.state.lock().await;
        state.withdrawal_calls += 1;
        self.accept(&mut state).await
    }

    async fn verify_withdrawal(&self, provider_tx_id: &str) -> Result<ProviderTransactionState> {
        let state = self.state.lock().await;
        if let Some(scripted) = state.scripted.get(provider_tx_id) {
            return Ok(scripted.clone());
        }
        Ok(ProviderTransactionState {
            status: TransactionStatus::Completed,
            confirmations: None,
            updated_at: Utc::now(),
        })
    }

    async fn cancel_withdrawal(&self, _provider_tx_id: &str) -> Result<()> {
        Ok(())
    }

    fn parse_webhook(&self, payload: &[u8]) -> Result<WebhookEvent> {
        let value: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| PaymentError::Validation(format!("malformed webhook payload: {e}")))?;
        let provider_tx_id = value
            .get("id")
            .and_then(|id| id.as_str())
            .ok_or_else(|| PaymentError::Validation("webhook payload missing id".to_string()))?
            .to_string();
        let status: TransactionStatus = value
            .get("status")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| PaymentError::Validation(format!("bad webhook status: {e}")))?
            .ok_or_else(|| {
                PaymentError::Validation("webhook payload missing status".to_string())
            })?;
        Ok(WebhookEvent {
            provider_tx_id,
            status,
            payload: value,
        })
    }

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> Result<()> {
        if self.sign(payload) != signature {
            return Err(PaymentError::VerificationFailed(
                "webhook signature mismatch".to_string(),
            ));
        }
        Ok(())
    }
}

/// IP reputation double: unknown addresses come back clean.
#[derive(Default)]
pub struct StaticIpReputation {
    entries: RwLock<HashMap<String, IpReputation>>,
}

impl StaticIpReputation {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, ip: &str, reputation: IpReputation) {
        self.entries
            .write()
            .await
            .insert(ip.to_string(), reputation);
    }
}

#[async_trait]
impl IpReputationService for StaticIpReputation {
    async fn lookup(&self, ip: &str) -> Result<IpReputation> {
        let entries = self.entries.read().await;
        Ok(entries.get(ip).cloned().unwrap_or_default())
    }
}

/// Withdrawal verifier that accepts a single known confirmation code.
pub struct StaticCodeVerifier {
    code: String,
}

impl StaticCodeVerifier {
    pub fn new(code: &str) -> Self {
        Self {
            code: code.to_string(),
        }
    }
}

#[async_trait]
impl WithdrawalVerifier for StaticCodeVerifier {
    async fn confirm(&self, _user_id: &str, code: &str) -> Result<bool> {
        Ok(code == self.code)
    }
}

/// Withdrawal verifier that waves everything through. Demo use only.
pub struct AutoApproveVerifier;

#[async_trait]
impl WithdrawalVerifier for AutoApproveVerifier {
    async fn confirm(&self, _user_id: &str, _code: &str) -> Result<bool> {
        Ok(true)
    }
}

/// Fixed exchange-rate table.
#[derive(Default)]
pub struct FixedRateSource {
    rates: RwLock<HashMap<(String, String), Decimal>>,
}

impl FixedRateSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rates for the currencies the sandbox providers deal in.
    pub fn with_defaults() -> Self {
        let mut rates = HashMap::new();
        rates.insert(("BTC".to_string(), "USD".to_string()), dec!(40000));
        rates.insert(("ETH".to_string(), "USD".to_string()), dec!(2500));
        rates.insert(("USDT".to_string(), "USD".to_string()), Decimal::ONE);
        rates.insert(("EUR".to_string(), "USD".to_string()), dec!(1.08));
        Self {
            rates: RwLock::new(rates),
        }
    }

    pub async fn set(&self, base: &str, quote: &str, rate: Decimal) {
        self.rates
            .write()
            .await
            .insert((base.to_string(), quote.to_string()), rate);
    }
}

#[async_trait]
impl RateSource for FixedRateSource {
    async fn rate(&self, base: &str, quote: &str) -> Result<Option<Decimal>> {
        if base == quote {
            return Ok(Some(Decimal::ONE));
        }
        let rates = self.rates.read().await;
        Ok(rates.get(&(base.to_string(), quote.to_string())).copied())
    }
}

pub type SandboxProviderRef = Arc<SandboxProvider>;
