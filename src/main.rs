use chrono::{Duration, Utc};
use clap::Parser;
use miette::{IntoDiagnostic, Result};
use paygate::application::GatewayContext;
use paygate::application::deposits::{DepositRequest, DepositService};
use paygate::application::reconciliation::ReconciliationService;
use paygate::application::withdrawals::{WithdrawalRequest, WithdrawalService};
use paygate::config::GatewayConfig;
use paygate::domain::ports::{CustomerProfile, ProviderRegistry, VerificationTier};
use paygate::domain::transaction::{PaymentMethod, TransactionId, TransactionStatus};
use paygate::infrastructure::in_memory::{
    InMemoryCustomerDirectory, InMemoryLedger, InMemoryTransactionStore,
};
use paygate::infrastructure::sandbox::{
    AutoApproveVerifier, FixedRateSource, SandboxProvider, StaticIpReputation,
};
use paygate::interfaces::csv::instruction_reader::{InstructionReader, Op};
use paygate::interfaces::csv::report_writer::ReportWriter;
use rust_decimal::Decimal;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input instructions CSV file
    input: PathBuf,

    /// Gateway configuration JSON (defaults apply when omitted)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log filter, e.g. "info" or "paygate=debug"
    #[arg(long, default_value = "warn")]
    log: String,

    /// Settlement report window, counted back from now
    #[arg(long, default_value_t = 24)]
    report_window_hours: i64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log).into_diagnostic()?)
        .with_writer(io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => GatewayConfig::from_file(path).into_diagnostic()?,
        None => GatewayConfig::default(),
    };

    let store = Arc::new(InMemoryTransactionStore::default());
    let ledger = Arc::new(InMemoryLedger::default());
    let directory = Arc::new(InMemoryCustomerDirectory::default());

    let mut providers = ProviderRegistry::new();
    providers.register(Arc::new(
        SandboxProvider::new(
            "cardpay",
            vec![
                PaymentMethod::Card,
                PaymentMethod::Paypal,
                PaymentMethod::Skrill,
            ],
        )
        .with_immediate_completion(),
    ));
    providers.register(Arc::new(
        SandboxProvider::new(
            "bankgate",
            vec![
                PaymentMethod::BankTransfer,
                PaymentMethod::Ach,
                PaymentMethod::Sepa,
                PaymentMethod::Wire,
            ],
        )
        .with_immediate_completion(),
    ));
    providers.register(Arc::new(
        SandboxProvider::new(
            "chainpay",
            vec![
                PaymentMethod::Bitcoin,
                PaymentMethod::Ethereum,
                PaymentMethod::Usdt,
            ],
        )
        .with_currencies(&["BTC", "ETH", "USDT"]),
    ));

    let ctx = GatewayContext {
        store: store.clone(),
        ledger: ledger.clone(),
        directory: directory.clone(),
        reputation: Arc::new(StaticIpReputation::new()),
        rates: Arc::new(FixedRateSource::with_defaults()),
        providers: Arc::new(providers),
    };

    let deposits = DepositService::new(&config, ctx.clone());
    let withdrawals = WithdrawalService::new(&config, ctx.clone(), Arc::new(AutoApproveVerifier));
    let reconciliation = ReconciliationService::new(ctx.clone());

    let file = File::open(&cli.input).into_diagnostic()?;
    let reader = InstructionReader::new(file);
    let mut in_flight: Vec<TransactionId> = Vec::new();

    for row in reader.instructions() {
        let instruction = match row {
            Ok(instruction) => instruction,
            Err(e) => {
                eprintln!("Error reading instruction: {e}");
                continue;
            }
        };
        ensure_demo_profile(&directory, &instruction.user).await;

        match instruction.op {
            Op::Deposit => {
                let request = DepositRequest {
                    user_id: instruction.user.clone(),
                    method: instruction.method,
                    amount: instruction.amount,
                    currency: instruction.currency.clone(),
                    ip: None,
                    country: None,
                    device_id: None,
                    return_url: None,
                };
                match deposits.process_deposit(request).await {
                    Ok(receipt) => {
                        if receipt.status == TransactionStatus::Processing {
                            in_flight.push(receipt.transaction_id);
                        }
                    }
                    Err(e) => eprintln!("Error processing deposit: {e}"),
                }
            }
            Op::Withdraw => {
                let request = WithdrawalRequest {
                    user_id: instruction.user.clone(),
                    method: instruction.method,
                    amount: instruction.amount,
                    currency: instruction.currency.clone(),
                    destination: instruction.destination.clone().unwrap_or_default(),
                    confirmation_code: String::new(),
                    ip: None,
                    device_id: None,
                };
                match withdrawals.process_withdrawal(request).await {
                    Ok(receipt) => {
                        if receipt.status == TransactionStatus::Processing {
                            in_flight.push(receipt.transaction_id);
                        }
                    }
                    Err(e) => eprintln!("Error processing withdrawal: {e}"),
                }
            }
        }
    }

    drain_in_flight(&deposits, &withdrawals, in_flight).await;

    let now = Utc::now();
    let report = reconciliation
        .settlement_report(now - Duration::hours(cli.report_window_hours), now)
        .await
        .into_diagnostic()?;

    let stdout = io::stdout();
    let mut writer = ReportWriter::new(stdout.lock());
    writer.write_balances(&ledger.snapshot().await).into_diagnostic()?;
    writer.write_settlement(&report).into_diagnostic()?;
    writer.flush().into_diagnostic()?;

    Ok(())
}

/// First sight of a user creates a verified demo profile so instruction
/// files do not need an onboarding step.
async fn ensure_demo_profile(directory: &InMemoryCustomerDirectory, user: &str) {
    if directory.known(user).await {
        return;
    }
    directory
        .upsert_profile(CustomerProfile {
            user_id: user.to_string(),
            tier: VerificationTier::Verified,
            country: "US".to_string(),
            created_at: Utc::now() - Duration::days(365),
            last_known_ip: None,
            total_deposited: Decimal::ZERO,
            total_withdrawn: Decimal::ZERO,
            average_transaction_amount: Decimal::ZERO,
            completed_transactions: 0,
            deposit_methods: Vec::new(),
        })
        .await;
}

/// Pushes still-processing transactions to a terminal state: withdrawals
/// get one provider verification, crypto deposits are polled until the
/// chain stops making progress.
async fn drain_in_flight(
    deposits: &DepositService,
    withdrawals: &WithdrawalService,
    in_flight: Vec<TransactionId>,
) {
    for id in in_flight {
        if id.as_str().starts_with("wdl_") {
            if let Err(e) = withdrawals.verify_withdrawal(&id).await {
                eprintln!("Error verifying withdrawal {id}: {e}");
            }
            continue;
        }
        // Confirmation counts only grow, so stop as soon as a poll stops
        // changing the stored state.
        let mut last_confirmations = None;
        loop {
            match deposits.verify_deposit(&id).await {
                Ok(tx) => {
                    if tx.status != TransactionStatus::Processing
                        || last_confirmations == Some(tx.confirmations_received)
                    {
                        break;
                    }
                    last_confirmations = Some(tx.confirmations_received);
                }
                Err(e) => {
                    eprintln!("Error monitoring deposit {id}: {e}");
                    break;
                }
            }
        }
    }
}
