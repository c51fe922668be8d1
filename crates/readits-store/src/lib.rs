//! Storage layer for the readits marketplace.
//!
//! The [`Store`] trait is the only way the engine touches durable state. Every operation
//! that reads a record, checks a rule and writes is a single trait call, and each backend
//! runs it atomically:
//!
//! - [`PgStore`]: one PostgreSQL transaction per call, rows locked with `SELECT ... FOR UPDATE`
//! - [`MemoryStore`]: one mutex over all tables, for tests and local development
//!
//! [`RetryingStore`] wraps either backend and retries transient connectivity failures.
//!
//! # Example
//!
//! ```no_run
//! use readits_store::{MemoryStore, Store};
//! use readits_core::{User, UserId};
//!
//! # async fn demo() -> readits_store::Result<()> {
//! let store = MemoryStore::new();
//! let user = User::new(UserId::generate(), "ada");
//! store.put_user(&user).await?;
//! let wallet = store.open_wallet(&user.user_id).await?;
//! assert_eq!(wallet.balance, 0);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod memory;
pub mod postgres;
pub mod retry;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use retry::{RetryPolicy, RetryingStore};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Serialize;

use readits_core::{
    Book, BookId, Capture, ConfirmOutcome, EscrowPolicy, LedgerEntry, Notification, Party,
    Phase, Purchase, PurchaseId, Rating, RentalId, Transaction, TransactionKind, TransactionRef,
    TransactionStatus, User, UserId, Wallet, Withdrawal,
};

/// Outcome of an approval.
#[derive(Debug, Clone, Serialize)]
pub struct Approval {
    /// The approved record.
    pub transaction: Transaction,
    /// Amounts moved.
    pub capture: Capture,
    /// Requester's wallet after the capture.
    pub payer_wallet: Wallet,
    /// Owner's wallet after the payout.
    pub payee_wallet: Wallet,
}

/// Outcome of a reject, cancel or expiry.
#[derive(Debug, Clone, Serialize)]
pub struct Withdrawn {
    /// The record as it was before deletion.
    pub transaction: Transaction,
    /// Whether the escrow release guard held. `false` means the wallet was already short.
    pub released: bool,
}

/// Outcome of a pickup or return confirmation.
#[derive(Debug, Clone, Serialize)]
pub struct Confirmation {
    /// The record after the call.
    pub transaction: Transaction,
    /// What the call changed.
    pub outcome: ConfirmOutcome,
}

/// Outcome of a transfer decision.
#[derive(Debug, Clone, Serialize)]
pub struct TransferDecision {
    /// The purchase after the decision.
    pub purchase: Purchase,
    /// The book after reassignment or retirement.
    pub book: Book,
}

/// The storage trait defining all database operations.
///
/// Business-rule refusals surface as [`StoreError::Domain`]; everything else is an
/// infrastructure failure.
#[async_trait]
pub trait Store: Send + Sync {
    // =========================================================================
    // Users and Books
    // =========================================================================

    /// Insert or update a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn put_user(&self, user: &User) -> Result<()>;

    /// Get a user by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_user(&self, user_id: &UserId) -> Result<Option<User>>;

    /// Add `impact` to a user's trust score, clamped to `0..=1000`. Returns the new score.
    ///
    /// # Errors
    ///
    /// Returns `EntityNotFound` if the user doesn't exist.
    async fn adjust_trust_score(&self, user_id: &UserId, impact: i32) -> Result<i32>;

    /// Insert or update a book.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn put_book(&self, book: &Book) -> Result<()>;

    /// Get a book by id, soft-deleted or not.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_book(&self, book_id: &BookId) -> Result<Option<Book>>;

    // =========================================================================
    // Wallet Operations
    // =========================================================================

    /// Get the user's wallet, creating an empty one if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn open_wallet(&self, user_id: &UserId) -> Result<Wallet>;

    /// Get the user's wallet.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_wallet(&self, user_id: &UserId) -> Result<Option<Wallet>>;

    /// Increase `reserved_amount` by `amount`.
    ///
    /// # Errors
    ///
    /// Returns `EntityNotFound` if the wallet doesn't exist.
    async fn reserve_funds(&self, user_id: &UserId, amount: i64) -> Result<Wallet>;

    /// Decrease `reserved_amount` by `amount` if at least that much is reserved.
    ///
    /// Returns `None` without changes when the guard fails.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn release_funds(&self, user_id: &UserId, amount: i64) -> Result<Option<Wallet>>;

    /// Decrease both `reserved_amount` and `balance` by `amount`.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientFunds` if either counter is below `amount`.
    async fn deduct_reserved(&self, user_id: &UserId, amount: i64) -> Result<Wallet>;

    /// Credit a top-up and record it, once per external payment reference.
    ///
    /// # Errors
    ///
    /// Returns `DuplicatePayment` if `payment_ref` was already credited.
    async fn credit_top_up(&self, user_id: &UserId, amount: i64, payment_ref: &str)
        -> Result<Wallet>;

    /// Append a ledger entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn record_entry(&self, entry: &LedgerEntry) -> Result<()>;

    /// List a user's ledger entries, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_ledger(&self, user_id: &UserId, limit: usize, offset: usize)
        -> Result<Vec<LedgerEntry>>;

    // =========================================================================
    // Transaction Operations
    // =========================================================================

    /// Insert a `pending` reservation and reserve its cost in the requester's wallet.
    ///
    /// # Errors
    ///
    /// - `DuplicateReservation` if the requester already has a pending one for the book.
    /// - `InsufficientFunds` if `balance - reserved_amount` is below the cost.
    async fn create_reservation(&self, transaction: &Transaction) -> Result<Transaction>;

    /// Get a rental or purchase.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_transaction(&self, tx_ref: &TransactionRef) -> Result<Option<Transaction>>;

    /// All records of `kind` currently in `status`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_by_status(
        &self,
        kind: TransactionKind,
        status: TransactionStatus,
    ) -> Result<Vec<Transaction>>;

    /// Transactions where the user is the requester or the original owner, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_for_user(&self, user_id: &UserId, kind: TransactionKind)
        -> Result<Vec<Transaction>>;

    /// Approve a pending reservation, capture its escrow and pay the owner.
    ///
    /// # Errors
    ///
    /// - `Authorization`, `InvalidState` or `Validation` from the state machine.
    /// - `Conflict` if the book is committed to another transaction of the same kind.
    /// - `InsufficientFunds` if the requester's wallet cannot cover the capture.
    async fn approve(
        &self,
        tx_ref: &TransactionRef,
        actor: &UserId,
        meetup_time: NaiveTime,
        policy: EscrowPolicy,
    ) -> Result<Approval>;

    /// Release a pending reservation's escrow and delete it.
    ///
    /// # Errors
    ///
    /// `Authorization`, `InvalidState` or `Conflict` from the withdrawal rules.
    async fn withdraw_pending(&self, tx_ref: &TransactionRef, withdrawal: &Withdrawal)
        -> Result<Withdrawn>;

    /// Set the actor's pickup flag and advance the status once both are set.
    ///
    /// # Errors
    ///
    /// `Authorization` or `InvalidState` from the state machine.
    async fn confirm_pickup(
        &self,
        tx_ref: &TransactionRef,
        actor: &UserId,
        today: NaiveDate,
    ) -> Result<Confirmation>;

    /// Set the actor's return flag and complete the rental once both are set.
    ///
    /// # Errors
    ///
    /// `Authorization` or `InvalidState` from the state machine.
    async fn confirm_return(&self, rental_id: &RentalId, actor: &UserId) -> Result<Confirmation>;

    /// Open a confirmation window if the record is still where the window opens from.
    ///
    /// Returns the updated record, or `None` if it moved on or no longer exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn begin_confirmation_window(
        &self,
        tx_ref: &TransactionRef,
        phase: Phase,
        now: DateTime<Utc>,
    ) -> Result<Option<Transaction>>;

    /// Record the buyer's ownership decision and reassign or retire the book.
    ///
    /// # Errors
    ///
    /// `Authorization` or `InvalidState` from the state machine.
    async fn decide_transfer(
        &self,
        purchase_id: &PurchaseId,
        actor: &UserId,
        transfer_ownership: bool,
    ) -> Result<TransferDecision>;

    // =========================================================================
    // Ratings and Notifications
    // =========================================================================

    /// Insert a rating and set the rater's flag on the transaction.
    ///
    /// # Errors
    ///
    /// - `InvalidState` unless the transaction is completed.
    /// - `AlreadyRated` if `party` already rated it.
    async fn submit_rating(&self, rating: &Rating, party: Party) -> Result<Transaction>;

    /// Persist a notification.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn insert_notification(&self, notification: &Notification) -> Result<()>;

    /// A user's notifications, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_notifications(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Notification>>;
}
