use super::transaction::{PaymentMethod, Transaction, TransactionId, TransactionStatus};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub type TransactionStoreRef = Arc<dyn TransactionStore>;
pub type BalanceLedgerRef = Arc<dyn BalanceLedger>;
pub type CustomerDirectoryRef = Arc<dyn CustomerDirectory>;
pub type IpReputationRef = Arc<dyn IpReputationService>;
pub type RateSourceRef = Arc<dyn RateSource>;
pub type WithdrawalVerifierRef = Arc<dyn WithdrawalVerifier>;
pub type ProviderRef = Arc<dyn ProviderClient>;

/// Persistence for transaction records.
///
/// Transitions that trigger a one-shot side effect (crediting a deposit,
/// settling or releasing a hold) go through the compare-and-set methods
/// below. Each performs its check and write under one critical section and
/// reports whether this call won the transition, so exactly one caller
/// carries out the side effect no matter how many race.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn insert(&self, tx: Transaction) -> Result<()>;

    /// Inserts a withdrawal only if the user has no other withdrawal still
    /// in `Pending`. The check and the insert share one critical section so
    /// two concurrent requests cannot both pass.
    async fn insert_pending_withdrawal(&self, tx: Transaction) -> Result<()>;

    async fn update(&self, tx: Transaction) -> Result<()>;

    async fn get(&self, id: &TransactionId) -> Result<Option<Transaction>>;

    async fn find_by_provider_tx_id(&self, provider_tx_id: &str)
    -> Result<Option<Transaction>>;

    /// Moves `Pending` to `Processing`. Returns whether this call won.
    async fn begin_processing(&self, id: &TransactionId) -> Result<bool>;

    /// Moves `Pending` or `Processing` to `Completed`, stamping
    /// `completed_at`. Returns whether this call won.
    async fn mark_completed(&self, id: &TransactionId, at: DateTime<Utc>) -> Result<bool>;

    /// Moves `Pending` or `Processing` to `Failed`, recording the reason.
    /// Returns whether this call won.
    async fn mark_failed(&self, id: &TransactionId, reason: &str) -> Result<bool>;

    /// Moves `Pending` to `Cancelled`. Returns whether this call won.
    async fn mark_cancelled(&self, id: &TransactionId) -> Result<bool>;

    /// Updates confirmation progress while the transaction is still in
    /// flight; a record that already reached a terminal status is left
    /// untouched. Returns whether the write happened.
    async fn record_confirmations(&self, id: &TransactionId, received: u32) -> Result<bool>;

    async fn find_pending_withdrawal(&self, user_id: &str) -> Result<Option<Transaction>>;

    async fn list_for_user_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Transaction>>;

    /// All transactions created in `[from, to)`.
    async fn list_in_window(&self, from: DateTime<Utc>, to: DateTime<Utc>)
    -> Result<Vec<Transaction>>;

    /// Completed transactions whose `completed_at` falls in `[from, to)`.
    async fn list_completed_in_window(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Transaction>>;

    /// A provider's transactions created in `[from, to)`.
    async fn list_for_provider_in_window(
        &self,
        provider: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Transaction>>;
}

/// Customer funds, kept per `(user, currency)` pair.
///
/// `balance` reports available funds: reservations are carved out at
/// `reserve` time and either returned by `release_reservation` or consumed
/// by `settle_reservation`, exactly once each.
#[async_trait]
pub trait BalanceLedger: Send + Sync {
    async fn balance(&self, user_id: &str, currency: &str) -> Result<Decimal>;

    async fn credit(&self, user_id: &str, currency: &str, amount: Decimal) -> Result<()>;

    /// Unconditional debit. Clawbacks may push a balance negative.
    async fn debit(&self, user_id: &str, currency: &str, amount: Decimal) -> Result<()>;

    /// Checks and holds in one step, keyed by the owning transaction.
    /// Fails without mutating anything when funds are short.
    async fn reserve(
        &self,
        user_id: &str,
        currency: &str,
        amount: Decimal,
        tx_id: &TransactionId,
    ) -> Result<()>;

    /// Returns held funds to the available balance.
    async fn release_reservation(&self, tx_id: &TransactionId) -> Result<()>;

    /// Converts the hold into a permanent debit.
    async fn settle_reservation(&self, tx_id: &TransactionId) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VerificationTier {
    #[default]
    Unverified,
    Verified,
    Premium,
}

/// What the gateway knows about a customer, fed into fraud screening and
/// limit resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerProfile {
    pub user_id: String,
    pub tier: VerificationTier,
    /// ISO 3166 alpha-2 residence country.
    pub country: String,
    pub created_at: DateTime<Utc>,
    pub last_known_ip: Option<String>,
    /// Lifetime totals in the gateway base currency.
    pub total_deposited: Decimal,
    pub total_withdrawn: Decimal,
    pub average_transaction_amount: Decimal,
    pub completed_transactions: u64,
    /// Methods this customer has completed at least one deposit through.
    pub deposit_methods: Vec<PaymentMethod>,
}

#[async_trait]
pub trait CustomerDirectory: Send + Sync {
    async fn profile(&self, user_id: &str) -> Result<CustomerProfile>;

    async fn device_failure_count(&self, device_id: &str) -> Result<u32>;

    /// Folds a settled deposit into the profile aggregates, in base
    /// currency terms.
    async fn record_completed_deposit(
        &self,
        user_id: &str,
        method: PaymentMethod,
        base_amount: Decimal,
    ) -> Result<()>;

    /// Folds a settled withdrawal into the profile aggregates.
    async fn record_completed_withdrawal(&self, user_id: &str, base_amount: Decimal)
    -> Result<()>;
}

/// Known reputation of a source address. Absent knowledge means a clean
/// default, not a rejection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpReputation {
    pub is_tor: bool,
    pub is_proxy: bool,
    pub is_vpn: bool,
    pub is_datacenter: bool,
    /// 0 (worst) to 100 (clean).
    pub score: u32,
}

impl Default for IpReputation {
    fn default() -> Self {
        Self {
            is_tor: false,
            is_proxy: false,
            is_vpn: false,
            is_datacenter: false,
            score: 100,
        }
    }
}

#[async_trait]
pub trait IpReputationService: Send + Sync {
    async fn lookup(&self, ip: &str) -> Result<IpReputation>;
}

/// Out-of-band confirmation gate for withdrawals (2FA, email link).
#[async_trait]
pub trait WithdrawalVerifier: Send + Sync {
    async fn confirm(&self, user_id: &str, code: &str) -> Result<bool>;
}

/// Exchange rate lookup. Pure pass-through: the gateway snapshots rates,
/// it never prices them.
#[async_trait]
pub trait RateSource: Send + Sync {
    async fn rate(&self, base: &str, quote: &str) -> Result<Option<Decimal>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDepositRequest {
    pub transaction_id: TransactionId,
    pub user_id: String,
    pub method: PaymentMethod,
    pub amount: Decimal,
    pub currency: String,
    pub return_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderWithdrawalRequest {
    pub transaction_id: TransactionId,
    pub user_id: String,
    pub method: PaymentMethod,
    pub amount: Decimal,
    pub currency: String,
    /// Card token, IBAN or wallet address the payout goes to.
    pub destination: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderPaymentResponse {
    pub provider_tx_id: String,
    pub status: TransactionStatus,
    pub redirect_url: Option<String>,
    pub deposit_address: Option<String>,
    pub message: Option<String>,
}

/// Provider-side view of a transaction, as reported by its API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderTransactionState {
    pub status: TransactionStatus,
    pub confirmations: Option<u32>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub provider_tx_id: String,
    pub status: TransactionStatus,
    pub payload: serde_json::Value,
}

/// Adapter for one external payment provider.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn name(&self) -> &str;

    fn supported_methods(&self) -> &[PaymentMethod];

    fn supported_currencies(&self) -> &[String];

    async fn initiate_deposit(
        &self,
        request: &ProviderDepositRequest,
    ) -> Result<ProviderPaymentResponse>;

    async fn verify_deposit(&self, provider_tx_id: &str) -> Result<ProviderTransactionState>;

    async fn initiate_withdrawal(
        &self,
        request: &ProviderWithdrawalRequest,
    ) -> Result<ProviderPaymentResponse>;

    async fn verify_withdrawal(&self, provider_tx_id: &str) -> Result<ProviderTransactionState>;

    async fn cancel_withdrawal(&self, provider_tx_id: &str) -> Result<()>;

    fn parse_webhook(&self, payload: &[u8]) -> Result<WebhookEvent>;

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> Result<()>;
}

/// Ordered collection of registered providers.
///
/// Routing is positional: the first registered provider that supports a
/// method wins. There is no scoring and no failover.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: Vec<ProviderRef>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: ProviderRef) {
        self.providers.push(provider);
    }

    pub fn for_method(&self, method: PaymentMethod) -> Option<ProviderRef> {
        self.providers
            .iter()
            .find(|p| p.supported_methods().contains(&method))
            .cloned()
    }

    pub fn by_name(&self, name: &str) -> Option<ProviderRef> {
        self.providers.iter().find(|p| p.name() == name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }
}
