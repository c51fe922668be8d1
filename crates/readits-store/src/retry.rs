//! Bounded retry for transient connectivity failures.
//!
//! [`RetryingStore`] decorates any [`Store`]. Calls that fail with
//! [`StoreError::Transient`] are repeated with exponential backoff up to
//! [`RetryPolicy::max_retries`] times. A [`StoreError::ConnectionLost`] is repeated only
//! for calls that a second application cannot corrupt: reads, upserts and writes guarded
//! by a status or unique key. Increments (trust, reserve, release, deduct) and approval
//! surface it instead. Business-rule refusals and other database errors are returned
//! unchanged on the first attempt.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use readits_core::{
    Book, BookId, EscrowPolicy, LedgerEntry, Notification, Party, Phase, PurchaseId, Rating,
    RentalId, Transaction, TransactionKind, TransactionRef, TransactionStatus, User, UserId,
    Wallet, Withdrawal,
};

use crate::error::{Result, StoreError};
use crate::{Approval, Confirmation, Store, TransferDecision, Withdrawn};

/// How often and how patiently to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles each time.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Whether a call may be repeated after an indeterminate failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Repeat {
    /// Applying twice leaves the same state, or the second attempt is refused.
    Guarded,
    /// Applying twice would move funds or trust twice.
    Once,
}

impl Repeat {
    const fn allows(self, err: &StoreError) -> bool {
        match self {
            Self::Guarded => err.is_transient() || err.is_indeterminate(),
            Self::Once => err.is_transient(),
        }
    }
}

/// A [`Store`] that retries transient failures of the wrapped store.
pub struct RetryingStore<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: Store> RetryingStore<S> {
    /// Wrap `inner` with `policy`.
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn retry<T, F, Fut>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        self.repeat(operation, Repeat::Guarded, call).await
    }

    async fn retry_once<T, F, Fut>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        self.repeat(operation, Repeat::Once, call).await
    }

    async fn repeat<T, F, Fut>(
        &self,
        operation: &'static str,
        repeat: Repeat,
        mut call: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Err(err) if repeat.allows(&err) && attempt < self.policy.max_retries => {
                    attempt += 1;
                    let delay = self.policy.backoff(attempt);
                    tracing::warn!(
                        operation,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "transient store failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) if err.is_indeterminate() && repeat == Repeat::Once => {
                    tracing::error!(operation, error = %err, "outcome unknown, not repeating");
                    return Err(err);
                }
                Err(err) if err.is_transient() || err.is_indeterminate() => {
                    tracing::error!(operation, attempts = attempt + 1, error = %err, "giving up");
                    return Err(err);
                }
                other => return other,
            }
        }
    }
}

#[async_trait]
impl<S: Store> Store for RetryingStore<S> {
    async fn put_user(&self, user: &User) -> Result<()> {
        self.retry("put_user", || self.inner.put_user(user)).await
    }

    async fn get_user(&self, user_id: &UserId) -> Result<Option<User>> {
        self.retry("get_user", || self.inner.get_user(user_id)).await
    }

    async fn adjust_trust_score(&self, user_id: &UserId, impact: i32) -> Result<i32> {
        self.retry_once("adjust_trust_score", || {
            self.inner.adjust_trust_score(user_id, impact)
        })
        .await
    }

    async fn put_book(&self, book: &Book) -> Result<()> {
        self.retry("put_book", || self.inner.put_book(book)).await
    }

    async fn get_book(&self, book_id: &BookId) -> Result<Option<Book>> {
        self.retry("get_book", || self.inner.get_book(book_id)).await
    }

    async fn open_wallet(&self, user_id: &UserId) -> Result<Wallet> {
        self.retry("open_wallet", || self.inner.open_wallet(user_id)).await
    }

    async fn get_wallet(&self, user_id: &UserId) -> Result<Option<Wallet>> {
        self.retry("get_wallet", || self.inner.get_wallet(user_id)).await
    }

    async fn reserve_funds(&self, user_id: &UserId, amount: i64) -> Result<Wallet> {
        self.retry_once("reserve_funds", || self.inner.reserve_funds(user_id, amount))
            .await
    }

    async fn release_funds(&self, user_id: &UserId, amount: i64) -> Result<Option<Wallet>> {
        self.retry_once("release_funds", || self.inner.release_funds(user_id, amount))
            .await
    }

    async fn deduct_reserved(&self, user_id: &UserId, amount: i64) -> Result<Wallet> {
        self.retry_once("deduct_reserved", || {
            self.inner.deduct_reserved(user_id, amount)
        })
        .await
    }

    async fn credit_top_up(
        &self,
        user_id: &UserId,
        amount: i64,
        payment_ref: &str,
    ) -> Result<Wallet> {
        self.retry("credit_top_up", || {
            self.inner.credit_top_up(user_id, amount, payment_ref)
        })
        .await
    }

    async fn record_entry(&self, entry: &LedgerEntry) -> Result<()> {
        self.retry("record_entry", || self.inner.record_entry(entry)).await
    }

    async fn list_ledger(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>> {
        self.retry("list_ledger", || self.inner.list_ledger(user_id, limit, offset))
            .await
    }

    async fn create_reservation(&self, transaction: &Transaction) -> Result<Transaction> {
        self.retry("create_reservation", || {
            self.inner.create_reservation(transaction)
        })
        .await
    }

    async fn get_transaction(&self, tx_ref: &TransactionRef) -> Result<Option<Transaction>> {
        self.retry("get_transaction", || self.inner.get_transaction(tx_ref))
            .await
    }

    async fn list_by_status(
        &self,
        kind: TransactionKind,
        status: TransactionStatus,
    ) -> Result<Vec<Transaction>> {
        self.retry("list_by_status", || self.inner.list_by_status(kind, status))
            .await
    }

    async fn list_for_user(
        &self,
        user_id: &UserId,
        kind: TransactionKind,
    ) -> Result<Vec<Transaction>> {
        self.retry("list_for_user", || self.inner.list_for_user(user_id, kind))
            .await
    }

    async fn approve(
        &self,
        tx_ref: &TransactionRef,
        actor: &UserId,
        meetup_time: NaiveTime,
        policy: EscrowPolicy,
    ) -> Result<Approval> {
        self.retry_once("approve", || {
            self.inner.approve(tx_ref, actor, meetup_time, policy)
        })
        .await
    }

    async fn withdraw_pending(
        &self,
        tx_ref: &TransactionRef,
        withdrawal: &Withdrawal,
    ) -> Result<Withdrawn> {
        self.retry("withdraw_pending", || {
            self.inner.withdraw_pending(tx_ref, withdrawal)
        })
        .await
    }

    async fn confirm_pickup(
        &self,
        tx_ref: &TransactionRef,
        actor: &UserId,
        today: NaiveDate,
    ) -> Result<Confirmation> {
        self.retry("confirm_pickup", || {
            self.inner.confirm_pickup(tx_ref, actor, today)
        })
        .await
    }

    async fn confirm_return(&self, rental_id: &RentalId, actor: &UserId) -> Result<Confirmation> {
        self.retry("confirm_return", || self.inner.confirm_return(rental_id, actor))
            .await
    }

    async fn begin_confirmation_window(
        &self,
        tx_ref: &TransactionRef,
        phase: Phase,
        now: DateTime<Utc>,
    ) -> Result<Option<Transaction>> {
        self.retry("begin_confirmation_window", || {
            self.inner.begin_confirmation_window(tx_ref, phase, now)
        })
        .await
    }

    async fn decide_transfer(
        &self,
        purchase_id: &PurchaseId,
        actor: &UserId,
        transfer_ownership: bool,
    ) -> Result<TransferDecision> {
        self.retry("decide_transfer", || {
            self.inner
                .decide_transfer(purchase_id, actor, transfer_ownership)
        })
        .await
    }

    async fn submit_rating(&self, rating: &Rating, party: Party) -> Result<Transaction> {
        self.retry("submit_rating", || self.inner.submit_rating(rating, party))
            .await
    }

    async fn insert_notification(&self, notification: &Notification) -> Result<()> {
        self.retry("insert_notification", || {
            self.inner.insert_notification(notification)
        })
        .await
    }

    async fn list_notifications(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Notification>> {
        self.retry("list_notifications", || {
            self.inner.list_notifications(user_id, limit, offset)
        })
        .await
    }
}
