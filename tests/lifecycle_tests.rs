mod common;

use common::{deposit_request, gateway, withdrawal_request};
use paygate::application::deposits::NextAction;
use paygate::domain::ports::{BalanceLedger, CustomerDirectory, TransactionStore};
use paygate::domain::transaction::{PaymentMethod, TransactionStatus};
use paygate::error::PaymentError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

#[tokio::test]
async fn test_card_deposit_credits_net_amount() {
    let g = gateway().await;
    g.onboard("alice").await;

    let receipt = g
        .deposits
        .process_deposit(deposit_request("alice", PaymentMethod::Card, dec!(100), "USD"))
        .await
        .unwrap();

    assert_eq!(receipt.status, TransactionStatus::Completed);
    assert_eq!(receipt.fee, dec!(2.90));
    assert_eq!(receipt.net_amount, dec!(97.10));
    assert!(receipt.confirmations_required.is_none());
    assert_eq!(g.ledger.balance("alice", "USD").await.unwrap(), dec!(97.10));

    let profile = g.directory.profile("alice").await.unwrap();
    assert_eq!(profile.total_deposited, dec!(20100));
    assert_eq!(profile.completed_transactions, 41);
}

#[tokio::test]
async fn test_withdrawal_without_funds_is_refused() {
    let g = gateway().await;
    g.onboard("bob").await;

    let err = g
        .withdrawals
        .process_withdrawal(withdrawal_request(
            "bob",
            PaymentMethod::Card,
            dec!(50),
            "USD",
            "tok_4242",
        ))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PaymentError::InsufficientFunds {
            available,
            requested,
        } if available == Decimal::ZERO && requested == dec!(50)
    ));
    assert_eq!(g.cardpay.withdrawal_calls().await, 0);
    assert_eq!(g.ledger.balance("bob", "USD").await.unwrap(), Decimal::ZERO);
}

#[tokio::test]
async fn test_btc_deposit_credits_once_after_three_confirmations() {
    let g = gateway().await;
    g.onboard("carol").await;

    let receipt = g
        .deposits
        .process_deposit(deposit_request(
            "carol",
            PaymentMethod::Bitcoin,
            dec!(0.05),
            "BTC",
        ))
        .await
        .unwrap();

    assert_eq!(receipt.status, TransactionStatus::Processing);
    assert_eq!(receipt.confirmations_required, Some(3));
    assert!(matches!(receipt.next_action, Some(NextAction::SendFundsTo(_))));
    assert_eq!(g.ledger.balance("carol", "BTC").await.unwrap(), Decimal::ZERO);

    // Each poll gains one confirmation; the third one credits the funds.
    let id = receipt.transaction_id;
    for expected in 1..=2u32 {
        let tx = g.deposits.monitor_crypto_deposit(&id).await.unwrap();
        assert_eq!(tx.status, TransactionStatus::Processing);
        assert_eq!(tx.confirmations_received, expected);
    }
    let tx = g.deposits.monitor_crypto_deposit(&id).await.unwrap();
    assert_eq!(tx.status, TransactionStatus::Completed);
    assert_eq!(tx.confirmations_received, 3);
    assert_eq!(
        g.ledger.balance("carol", "BTC").await.unwrap(),
        dec!(0.04975)
    );

    // Further monitoring is harmless and never credits twice.
    let tx = g.deposits.monitor_crypto_deposit(&id).await.unwrap();
    assert_eq!(tx.status, TransactionStatus::Completed);
    assert_eq!(
        g.ledger.balance("carol", "BTC").await.unwrap(),
        dec!(0.04975)
    );

    // The profile aggregates in base currency at the snapshotted rate.
    let profile = g
        .directory
        .profile("carol")
        .await
        .unwrap();
    assert_eq!(profile.total_deposited, dec!(22000));
}

#[tokio::test]
async fn test_provider_outage_fails_the_deposit() {
    let g = gateway().await;
    g.onboard("dave").await;
    g.cardpay.fail_next(1).await;

    let err = g
        .deposits
        .process_deposit(deposit_request("dave", PaymentMethod::Card, dec!(100), "USD"))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::Provider { .. }));
    assert_eq!(g.ledger.balance("dave", "USD").await.unwrap(), Decimal::ZERO);

    let stored = g
        .store
        .list_for_user_since("dave", chrono::Utc::now() - chrono::Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].status, TransactionStatus::Failed);
    assert!(stored[0].metadata.contains_key("failure_reason"));
}

#[tokio::test]
async fn test_deposit_in_unquoted_currency_is_refused() {
    let g = gateway().await;
    g.onboard("erin").await;

    let err = g
        .deposits
        .process_deposit(deposit_request("erin", PaymentMethod::Card, dec!(100), "JPY"))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::Validation(_)));
}

#[tokio::test]
async fn test_withdrawal_requires_prior_deposit_method() {
    let g = gateway().await;
    g.onboard("frank").await;
    g.fund("frank", "USD", dec!(1000)).await;

    // The funded profile never deposited by wire.
    let err = g
        .withdrawals
        .process_withdrawal(withdrawal_request(
            "frank",
            PaymentMethod::Wire,
            dec!(200),
            "USD",
            "DE89370400440532013000",
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::SameMethodRequired(_)));
    assert_eq!(g.bankgate.withdrawal_calls().await, 0);
    assert_eq!(g.ledger.balance("frank", "USD").await.unwrap(), dec!(1000));
}

#[tokio::test]
async fn test_single_outstanding_withdrawal_per_user() {
    let g = gateway().await;
    g.onboard("grace").await;
    g.fund("grace", "USD", dec!(30000)).await;

    // Large enough to queue for approval, so it stays pending.
    let first = g
        .withdrawals
        .process_withdrawal(withdrawal_request(
            "grace",
            PaymentMethod::BankTransfer,
            dec!(12000),
            "USD",
            "DE89370400440532013000",
        ))
        .await
        .unwrap();
    assert_eq!(first.status, TransactionStatus::Pending);

    let err = g
        .withdrawals
        .process_withdrawal(withdrawal_request(
            "grace",
            PaymentMethod::Card,
            dec!(50),
            "USD",
            "tok_4242",
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::PendingWithdrawalExists(_)));
    assert_eq!(g.ledger.held("grace", "USD").await, dec!(12000));
}
