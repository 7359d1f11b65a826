#![allow(dead_code)]

use chrono::{Duration, Utc};
use paygate::application::GatewayContext;
use paygate::application::deposits::{DepositRequest, DepositService};
use paygate::application::reconciliation::ReconciliationService;
use paygate::application::withdrawals::{WithdrawalRequest, WithdrawalService};
use paygate::config::GatewayConfig;
use paygate::domain::ports::{
    BalanceLedger, CustomerProfile, ProviderRegistry, VerificationTier,
};
use paygate::domain::transaction::PaymentMethod;
use paygate::infrastructure::in_memory::{
    InMemoryCustomerDirectory, InMemoryLedger, InMemoryTransactionStore,
};
use paygate::infrastructure::sandbox::{
    FixedRateSource, SandboxProvider, StaticCodeVerifier, StaticIpReputation,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

pub const CONFIRMATION_CODE: &str = "123456";

/// A fully wired gateway over in-memory stores and three sandbox
/// providers: `cardpay` settles synchronously, `bankgate` leaves
/// transactions processing until verified, `chainpay` handles the crypto
/// rails.
pub struct Gateway {
    pub store: Arc<InMemoryTransactionStore>,
    pub ledger: Arc<InMemoryLedger>,
    pub directory: Arc<InMemoryCustomerDirectory>,
    pub reputation: Arc<StaticIpReputation>,
    pub cardpay: Arc<SandboxProvider>,
    pub bankgate: Arc<SandboxProvider>,
    pub chainpay: Arc<SandboxProvider>,
    pub deposits: DepositService,
    pub withdrawals: WithdrawalService,
    pub reconciliation: ReconciliationService,
}

pub async fn gateway() -> Gateway {
    let store = Arc::new(InMemoryTransactionStore::new());
    let ledger = Arc::new(InMemoryLedger::new());
    let directory = Arc::new(InMemoryCustomerDirectory::new());
    let reputation = Arc::new(StaticIpReputation::new());

    let cardpay = Arc::new(
        SandboxProvider::new(
            "cardpay",
            vec![
                PaymentMethod::Card,
                PaymentMethod::Paypal,
                PaymentMethod::Skrill,
            ],
        )
        .with_immediate_completion(),
    );
    let bankgate = Arc::new(SandboxProvider::new(
        "bankgate",
        vec![
            PaymentMethod::BankTransfer,
            PaymentMethod::Ach,
            PaymentMethod::Sepa,
            PaymentMethod::Wire,
        ],
    ));
    let chainpay = Arc::new(
        SandboxProvider::new(
            "chainpay",
            vec![
                PaymentMethod::Bitcoin,
                PaymentMethod::Ethereum,
                PaymentMethod::Usdt,
            ],
        )
        .with_currencies(&["BTC", "ETH", "USDT"]),
    );
    let mut providers = ProviderRegistry::new();
    providers.register(cardpay.clone());
    providers.register(bankgate.clone());
    providers.register(chainpay.clone());

    let ctx = GatewayContext {
        store: store.clone(),
        ledger: ledger.clone(),
        directory: directory.clone(),
        reputation: reputation.clone(),
        rates: Arc::new(FixedRateSource::with_defaults()),
        providers: Arc::new(providers),
    };
    let config = GatewayConfig::default();

    Gateway {
        deposits: DepositService::new(&config, ctx.clone()),
        withdrawals: WithdrawalService::new(
            &config,
            ctx.clone(),
            Arc::new(StaticCodeVerifier::new(CONFIRMATION_CODE)),
        ),
        reconciliation: ReconciliationService::new(ctx),
        store,
        ledger,
        directory,
        reputation,
        cardpay,
        bankgate,
        chainpay,
    }
}

impl Gateway {
    /// Registers a verified customer with enough history to clear the
    /// pattern and account-age checks.
    pub async fn onboard(&self, user: &str) {
        self.directory.upsert_profile(funded_profile(user)).await;
    }

    pub async fn fund(&self, user: &str, currency: &str, amount: Decimal) {
        self.ledger.credit(user, currency, amount).await.unwrap();
    }
}

pub fn funded_profile(user: &str) -> CustomerProfile {
    CustomerProfile {
        user_id: user.to_string(),
        tier: VerificationTier::Verified,
        country: "US".to_string(),
        created_at: Utc::now() - Duration::days(100),
        last_known_ip: None,
        total_deposited: dec!(20000),
        total_withdrawn: Decimal::ZERO,
        average_transaction_amount: dec!(500),
        completed_transactions: 40,
        deposit_methods: vec![
            PaymentMethod::Card,
            PaymentMethod::BankTransfer,
            PaymentMethod::Bitcoin,
        ],
    }
}

pub fn deposit_request(
    user: &str,
    method: PaymentMethod,
    amount: Decimal,
    currency: &str,
) -> DepositRequest {
    DepositRequest {
        user_id: user.to_string(),
        method,
        amount,
        currency: currency.to_string(),
        ip: None,
        country: None,
        device_id: None,
        return_url: None,
    }
}

pub fn withdrawal_request(
    user: &str,
    method: PaymentMethod,
    amount: Decimal,
    currency: &str,
    destination: &str,
) -> WithdrawalRequest {
    WithdrawalRequest {
        user_id: user.to_string(),
        method,
        amount,
        currency: currency.to_string(),
        destination: destination.to_string(),
        confirmation_code: CONFIRMATION_CODE.to_string(),
        ip: None,
        device_id: None,
    }
}
