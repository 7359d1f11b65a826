use crate::domain::ports::{BalanceLedger, CustomerDirectory, CustomerProfile, TransactionStore};
use crate::domain::transaction::{
    PaymentMethod, Transaction, TransactionId, TransactionStatus, TransactionType,
};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A thread-safe in-memory transaction store.
///
/// All guarded transitions (`insert_pending_withdrawal`, the `mark_*`
/// check-and-sets) perform their check and write under a single write
/// guard, so concurrent callers on the same record see exactly one winner.
#[derive(Default, Clone)]
pub struct InMemoryTransactionStore {
    transactions: Arc<RwLock<HashMap<TransactionId, Transaction>>>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn insert(&self, tx: Transaction) -> Result<()> {
        let mut transactions = self.transactions.write().await;
        if transactions.contains_key(&tx.id) {
            return Err(PaymentError::Storage(format!(
                "transaction {} already exists",
                tx.id
            )));
        }
        transactions.insert(tx.id.clone(), tx);
        Ok(())
    }

    async fn insert_pending_withdrawal(&self, tx: Transaction) -> Result<()> {
        let mut transactions = self.transactions.write().await;
        if let Some(existing) = transactions.values().find(|t| {
            t.user_id == tx.user_id
                && t.tx_type == TransactionType::Withdrawal
                && t.status == TransactionStatus::Pending
        }) {
            return Err(PaymentError::PendingWithdrawalExists(
                existing.id.to_string(),
            ));
        }
        if transactions.contains_key(&tx.id) {
            return Err(PaymentError::Storage(format!(
                "transaction {} already exists",
                tx.id
            )));
        }
        transactions.insert(tx.id.clone(), tx);
        Ok(())
    }

    async fn update(&self, tx: Transaction) -> Result<()> {
        let mut transactions = self.transactions.write().await;
        if !transactions.contains_key(&tx.id) {
            return Err(PaymentError::NotFound(tx.id.to_string()));
        }
        transactions.insert(tx.id.clone(), tx);
        Ok(())
    }

    async fn get(&self, id: &TransactionId) -> Result<Option<Transaction>> {
        let transactions = self.transactions.read().await;
        Ok(transactions.get(id).cloned())
    }

    async fn find_by_provider_tx_id(
        &self,
        provider_tx_id: &str,
    ) -> Result<Option<Transaction>> {
        let transactions = self.transactions.read().await;
        Ok(transactions
            .values()
            .find(|t| t.provider_tx_id.as_deref() == Some(provider_tx_id))
            .cloned())
    }

    async fn begin_processing(&self, id: &TransactionId) -> Result<bool> {
        let mut transactions = self.transactions.write().await;
        let tx = transactions
            .get_mut(id)
            .ok_or_else(|| PaymentError::NotFound(id.to_string()))?;
        if tx.status != TransactionStatus::Pending {
            return Ok(false);
        }
        tx.set_status(TransactionStatus::Processing);
        Ok(true)
    }

    async fn mark_completed(&self, id: &TransactionId, at: DateTime<Utc>) -> Result<bool> {
        let mut transactions = self.transactions.write().await;
        let tx = transactions
            .get_mut(id)
            .ok_or_else(|| PaymentError::NotFound(id.to_string()))?;
        if !tx.status.is_in_flight() {
            return Ok(false);
        }
        tx.complete(at);
        Ok(true)
    }

    async fn mark_failed(&self, id: &TransactionId, reason: &str) -> Result<bool> {
        let mut transactions = self.transactions.write().await;
        let tx = transactions
            .get_mut(id)
            .ok_or_else(|| PaymentError::NotFound(id.to_string()))?;
        if !tx.status.is_in_flight() {
            return Ok(false);
        }
        tx.fail(reason);
        Ok(true)
    }

    async fn mark_cancelled(&self, id: &TransactionId) -> Result<bool> {
        let mut transactions = self.transactions.write().await;
        let tx = transactions
            .get_mut(id)
            .ok_or_else(|| PaymentError::NotFound(id.to_string()))?;
        if tx.status != TransactionStatus::Pending {
            return Ok(false);
        }
        tx.set_status(TransactionStatus::Cancelled);
        Ok(true)
    }

    async fn record_confirmations(&self, id: &TransactionId, received: u32) -> Result<bool> {
        let mut transactions = self.transactions.write().await;
        let tx = transactions
            .get_mut(id)
            .ok_or_else(|| PaymentError::NotFound(id.to_string()))?;
        if tx.status.is_terminal() {
            return Ok(false);
        }
        tx.confirmations_received = received;
        Ok(true)
    }

    async fn find_pending_withdrawal(&self, user_id: &str) -> Result<Option<Transaction>> {
        let transactions = self.transactions.read().await;
        Ok(transactions
            .values()
            .find(|t| {
                t.user_id == user_id
                    && t.tx_type == TransactionType::Withdrawal
                    && t.status == TransactionStatus::Pending
            })
            .cloned())
    }

    async fn list_for_user_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Transaction>> {
        let transactions = self.transactions.read().await;
        let mut matched: Vec<Transaction> = transactions
            .values()
            .filter(|t| t.user_id == user_id && t.created_at >= since)
            .cloned()
            .collect();
        matched.sort_by_key(|t| t.created_at);
        Ok(matched)
    }

    async fn list_in_window(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Transaction>> {
        let transactions = self.transactions.read().await;
        let mut matched: Vec<Transaction> = transactions
            .values()
            .filter(|t| t.created_at >= from && t.created_at < to)
            .cloned()
            .collect();
        matched.sort_by_key(|t| t.created_at);
        Ok(matched)
    }

    async fn list_completed_in_window(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Transaction>> {
        let transactions = self.transactions.read().await;
        let mut matched: Vec<Transaction> = transactions
            .values()
            .filter(|t| t.status == TransactionStatus::Completed)
            .filter(|t| {
                t.completed_at
                    .map(|at| at >= from && at < to)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        matched.sort_by_key(|t| t.completed_at);
        Ok(matched)
    }

    async fn list_for_provider_in_window(
        &self,
        provider: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Transaction>> {
        let transactions = self.transactions.read().await;
        let mut matched: Vec<Transaction> = transactions
            .values()
            .filter(|t| t.provider == provider && t.created_at >= from && t.created_at < to)
            .cloned()
            .collect();
        matched.sort_by_key(|t| t.created_at);
        Ok(matched)
    }
}

struct Hold {
    user_id: String,
    currency: String,
    amount: Decimal,
}

#[derive(Default)]
struct LedgerBook {
    available: HashMap<(String, String), Decimal>,
    holds: HashMap<TransactionId, Hold>,
}

/// One row of a ledger snapshot, used by the report writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceEntry {
    pub user_id: String,
    pub currency: String,
    pub available: Decimal,
    pub held: Decimal,
}

/// Per-(user, currency) balances with reservations, all mutations under a
/// single lock so each operation is atomic with respect to the others.
///
/// Available funds and holds are disjoint: `reserve` moves money out of
/// `available`, and the hold is later consumed by exactly one of
/// `release_reservation` (money returns) or `settle_reservation` (money is
/// gone for good).
#[derive(Default, Clone)]
pub struct InMemoryLedger {
    book: Arc<RwLock<LedgerBook>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Funds currently held for this user and currency across all
    /// reservations.
    pub async fn held(&self, user_id: &str, currency: &str) -> Decimal {
        let book = self.book.read().await;
        book.holds
            .values()
            .filter(|h| h.user_id == user_id && h.currency == currency)
            .map(|h| h.amount)
            .sum()
    }

    /// Sorted snapshot of every (user, currency) pair the ledger has seen,
    /// with its available and held amounts.
    pub async fn snapshot(&self) -> Vec<BalanceEntry> {
        let book = self.book.read().await;
        let mut keys: Vec<(String, String)> = book.available.keys().cloned().collect();
        for hold in book.holds.values() {
            let key = (hold.user_id.clone(), hold.currency.clone());
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys.sort();
        keys.into_iter()
            .map(|key| {
                let available = book.available.get(&key).copied().unwrap_or(Decimal::ZERO);
                let held: Decimal = book
                    .holds
                    .values()
                    .filter(|h| h.user_id == key.0 && h.currency == key.1)
                    .map(|h| h.amount)
                    .sum();
                BalanceEntry {
                    user_id: key.0,
                    currency: key.1,
                    available,
                    held,
                }
            })
            .collect()
    }
}

#[async_trait]
impl BalanceLedger for InMemoryLedger {
    async fn balance(&self, user_id: &str, currency: &str) -> Result<Decimal> {
        let book = self.book.read().await;
        Ok(book
            .available
            .get(&(user_id.to_string(), currency.to_string()))
            .copied()
            .unwrap_or(Decimal::ZERO))
    }

    async fn credit(&self, user_id: &str, currency: &str, amount: Decimal) -> Result<()> {
        let mut book = self.book.write().await;
        *book
            .available
            .entry((user_id.to_string(), currency.to_string()))
            .or_insert(Decimal::ZERO) += amount;
        Ok(())
    }

    async fn debit(&self, user_id: &str, currency: &str, amount: Decimal) -> Result<()> {
        let mut book = self.book.write().await;
        *book
            .available
            .entry((user_id.to_string(), currency.to_string()))
            .or_insert(Decimal::ZERO) -= amount;
        Ok(())
    }

    async fn reserve(
        &self,
        user_id: &str,
        currency: &str,
        amount: Decimal,
        tx_id: &TransactionId,
    ) -> Result<()> {
        let mut book = self.book.write().await;
        if book.holds.contains_key(tx_id) {
            return Err(PaymentError::Storage(format!(
                "reservation for {tx_id} already exists"
            )));
        }
        let key = (user_id.to_string(), currency.to_string());
        let available = book.available.get(&key).copied().unwrap_or(Decimal::ZERO);
        if available < amount {
            return Err(PaymentError::InsufficientFunds {
                available,
                requested: amount,
            });
        }
        book.available.insert(key, available - amount);
        book.holds.insert(
            tx_id.clone(),
            Hold {
                user_id: user_id.to_string(),
                currency: currency.to_string(),
                amount,
            },
        );
        Ok(())
    }

    async fn release_reservation(&self, tx_id: &TransactionId) -> Result<()> {
        let mut book = self.book.write().await;
        let hold = book
            .holds
            .remove(tx_id)
            .ok_or_else(|| PaymentError::Storage(format!("no reservation for {tx_id}")))?;
        *book
            .available
            .entry((hold.user_id, hold.currency))
            .or_insert(Decimal::ZERO) += hold.amount;
        Ok(())
    }

    async fn settle_reservation(&self, tx_id: &TransactionId) -> Result<()> {
        let mut book = self.book.write().await;
        // The money already left `available` at reserve time.
        book.holds
            .remove(tx_id)
            .ok_or_else(|| PaymentError::Storage(format!("no reservation for {tx_id}")))?;
        Ok(())
    }
}

#[derive(Default)]
struct DirectoryBook {
    profiles: HashMap<String, CustomerProfile>,
    device_failures: HashMap<String, u32>,
}

/// Customer profiles and device history, kept in memory.
#[derive(Default, Clone)]
pub struct InMemoryCustomerDirectory {
    book: Arc<RwLock<DirectoryBook>>,
}

impl InMemoryCustomerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn known(&self, user_id: &str) -> bool {
        let book = self.book.read().await;
        book.profiles.contains_key(user_id)
    }

    pub async fn upsert_profile(&self, profile: CustomerProfile) {
        let mut book = self.book.write().await;
        book.profiles.insert(profile.user_id.clone(), profile);
    }

    pub async fn set_device_failures(&self, device_id: &str, failures: u32) {
        let mut book = self.book.write().await;
        book.device_failures.insert(device_id.to_string(), failures);
    }
}

#[async_trait]
impl CustomerDirectory for InMemoryCustomerDirectory {
    async fn profile(&self, user_id: &str) -> Result<CustomerProfile> {
        let book = self.book.read().await;
        book.profiles
            .get(user_id)
            .cloned()
            .ok_or_else(|| PaymentError::NotFound(format!("customer {user_id}")))
    }

    async fn device_failure_count(&self, device_id: &str) -> Result<u32> {
        let book = self.book.read().await;
        Ok(book.device_failures.get(device_id).copied().unwrap_or(0))
    }

    async fn record_completed_deposit(
        &self,
        user_id: &str,
        method: PaymentMethod,
        base_amount: Decimal,
    ) -> Result<()> {
        let mut book = self.book.write().await;
        let profile = book
            .profiles
            .get_mut(user_id)
            .ok_or_else(|| PaymentError::NotFound(format!("customer {user_id}")))?;
        let count = Decimal::from(profile.completed_transactions);
        profile.average_transaction_amount =
            (profile.average_transaction_amount * count + base_amount) / (count + Decimal::ONE);
        profile.completed_transactions += 1;
        profile.total_deposited += base_amount;
        if !profile.deposit_methods.contains(&method) {
            profile.deposit_methods.push(method);
        }
        Ok(())
    }

    async fn record_completed_withdrawal(
        &self,
        user_id: &str,
        base_amount: Decimal,
    ) -> Result<()> {
        let mut book = self.book.write().await;
        let profile = book
            .profiles
            .get_mut(user_id)
            .ok_or_else(|| PaymentError::NotFound(format!("customer {user_id}")))?;
        let count = Decimal::from(profile.completed_transactions);
        profile.average_transaction_amount =
            (profile.average_transaction_amount * count + base_amount) / (count + Decimal::ONE);
        profile.completed_transactions += 1;
        profile.total_withdrawn += base_amount;
        Ok(())
    }
}
