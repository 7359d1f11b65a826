use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),
    #[error("Insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds {
        available: Decimal,
        requested: Decimal,
    },
    #[error("Blocked by fraud screening: {0}")]
    FraudBlocked(String),
    #[error("User {0} already has a pending withdrawal")]
    PendingWithdrawalExists(String),
    #[error("Withdrawal method not backed by a prior deposit: {0}")]
    SameMethodRequired(String),
    #[error("Verification failed: {0}")]
    VerificationFailed(String),
    #[error("No provider supports payment method {0}")]
    NoProviderForMethod(String),
    #[error("Provider {provider} error: {message}")]
    Provider { provider: String, message: String },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid state for {id}: {reason}")]
    InvalidState { id: String, reason: String },
    #[error("Retry limit reached for {0}")]
    MaxRetriesExceeded(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PaymentError {
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn invalid_state(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidState {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PaymentError>;
