//! In-memory storage implementation.
//!
//! All tables sit behind one `tokio::sync::Mutex`, so every trait call is serializable.
//! Used by tests and by the service when no database URL is configured.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use tokio::sync::Mutex;

use readits_core::lifecycle;
use readits_core::{
    Book, BookId, Capture, EscrowPolicy, LedgerEntry, LedgerEntryType, MarketError,
    Notification, Party, Phase, Purchase, PurchaseId, Rating, Rental, RentalId, Transaction,
    TransactionKind, TransactionRef, TransactionStatus, User, UserId, Wallet, Withdrawal,
};

use crate::error::{Result, StoreError};
use crate::{Approval, Confirmation, Store, TransferDecision, Withdrawn};

#[derive(Default)]
struct Tables {
    users: HashMap<UserId, User>,
    books: HashMap<BookId, Book>,
    wallets: HashMap<UserId, Wallet>,
    ledger: Vec<LedgerEntry>,
    payment_refs: HashSet<String>,
    rentals: HashMap<RentalId, Rental>,
    purchases: HashMap<PurchaseId, Purchase>,
    ratings: Vec<Rating>,
    notifications: Vec<Notification>,
    faults: Faults,
}

#[derive(Default)]
struct Faults {
    poisoned: HashSet<TransactionRef>,
    transient: u32,
    lost_acks: u32,
}

impl Tables {
    fn check_faults(&mut self, tx_ref: Option<&TransactionRef>) -> Result<()> {
        if self.faults.transient > 0 {
            self.faults.transient -= 1;
            return Err(StoreError::Transient("injected connectivity failure".into()));
        }
        if let Some(tx_ref) = tx_ref {
            if self.faults.poisoned.contains(tx_ref) {
                return Err(StoreError::Database(format!("injected failure for {tx_ref}")));
            }
        }
        Ok(())
    }

    /// Hand back a committed result, or drop it if a lost acknowledgement is armed.
    fn acknowledge<T>(&mut self, value: T) -> Result<T> {
        if self.faults.lost_acks > 0 {
            self.faults.lost_acks -= 1;
            return Err(StoreError::ConnectionLost("injected lost acknowledgement".into()));
        }
        Ok(value)
    }

    fn transaction(&self, tx_ref: &TransactionRef) -> Option<Transaction> {
        match tx_ref {
            TransactionRef::Rental(id) => self.rentals.get(id).cloned().map(Transaction::Rental),
            TransactionRef::Purchase(id) => {
                self.purchases.get(id).cloned().map(Transaction::Purchase)
            }
        }
    }

    fn require(&self, tx_ref: &TransactionRef) -> Result<Transaction> {
        self.transaction(tx_ref).ok_or_else(|| {
            MarketError::not_found(tx_ref.kind().as_str(), tx_ref.as_uuid()).into()
        })
    }

    fn save(&mut self, tx: Transaction) {
        match tx {
            Transaction::Rental(r) => {
                self.rentals.insert(r.id, r);
            }
            Transaction::Purchase(p) => {
                self.purchases.insert(p.id, p);
            }
        }
    }

    fn remove(&mut self, tx_ref: &TransactionRef) {
        match tx_ref {
            TransactionRef::Rental(id) => {
                self.rentals.remove(id);
            }
            TransactionRef::Purchase(id) => {
                self.purchases.remove(id);
            }
        }
    }

    fn all(&self, kind: TransactionKind) -> Vec<Transaction> {
        match kind {
            TransactionKind::Rental => {
                self.rentals.values().cloned().map(Transaction::Rental).collect()
            }
            TransactionKind::Purchase => {
                self.purchases.values().cloned().map(Transaction::Purchase).collect()
            }
        }
    }

    fn wallet_mut(&mut self, user_id: &UserId) -> Result<&mut Wallet> {
        self.wallets
            .get_mut(user_id)
            .ok_or_else(|| MarketError::not_found("wallet", user_id).into())
    }

    fn open_wallet(&mut self, user_id: &UserId) -> &mut Wallet {
        self.wallets
            .entry(*user_id)
            .or_insert_with(|| Wallet::new(*user_id))
    }

    fn release(&mut self, user_id: &UserId, amount: i64) -> Option<Wallet> {
        let wallet = self.wallets.get_mut(user_id)?;
        if wallet.reserved_amount < amount {
            return None;
        }
        wallet.reserved_amount -= amount;
        wallet.last_updated = Utc::now();
        Some(wallet.clone())
    }

    fn deduct(&mut self, user_id: &UserId, amount: i64) -> Result<Wallet> {
        let wallet = self.wallet_mut(user_id)?;
        if !wallet.can_settle(amount) {
            return Err(MarketError::InsufficientFunds {
                available: wallet.reserved_amount.min(wallet.balance),
                required: amount,
            }
            .into());
        }
        wallet.reserved_amount -= amount;
        wallet.balance -= amount;
        wallet.last_updated = Utc::now();
        Ok(wallet.clone())
    }

    fn credit(&mut self, user_id: &UserId, amount: i64) -> Wallet {
        let wallet = self.open_wallet(user_id);
        wallet.balance += amount;
        wallet.last_updated = Utc::now();
        wallet.clone()
    }

    fn book_committed_elsewhere(&self, tx: &Transaction) -> bool {
        let book_id = tx.reservation().book_id;
        let own = tx.reference();
        self.all(tx.kind()).iter().any(|other| {
            other.reference() != own
                && other.reservation().book_id == book_id
                && other.status().commits_book()
        })
    }
}

/// In-memory [`Store`] backend.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every mutation of `tx_ref` fail with a database error.
    pub async fn inject_failure(&self, tx_ref: TransactionRef) {
        self.tables.lock().await.faults.poisoned.insert(tx_ref);
    }

    /// Fail the next `count` calls with a transient error.
    pub async fn inject_transient_failures(&self, count: u32) {
        self.tables.lock().await.faults.transient = count;
    }

    /// Commit the next `count` acknowledged mutations but report a lost connection.
    ///
    /// Covers trust adjustments, wallet reserve/release/deduct, approval and pickup
    /// confirmation.
    pub async fn inject_lost_acknowledgements(&self, count: u32) {
        self.tables.lock().await.faults.lost_acks = count;
    }

    /// Overwrite a stored transaction as-is, bypassing the state machine.
    pub async fn overwrite_transaction(&self, transaction: Transaction) {
        self.tables.lock().await.save(transaction);
    }

    /// All ratings, oldest first.
    pub async fn ratings(&self) -> Vec<Rating> {
        self.tables.lock().await.ratings.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    // =========================================================================
    // Users and Books
    // =========================================================================

    async fn put_user(&self, user: &User) -> Result<()> {
        let mut t = self.tables.lock().await;
        t.check_faults(None)?;
        t.users.insert(user.user_id, user.clone());
        Ok(())
    }

    async fn get_user(&self, user_id: &UserId) -> Result<Option<User>> {
        let mut t = self.tables.lock().await;
        t.check_faults(None)?;
        Ok(t.users.get(user_id).cloned())
    }

    async fn adjust_trust_score(&self, user_id: &UserId, impact: i32) -> Result<i32> {
        let mut t = self.tables.lock().await;
        t.check_faults(None)?;
        let user = t
            .users
            .get_mut(user_id)
            .ok_or_else(|| MarketError::not_found("user", user_id))?;
        user.trust_score = readits_core::rating::adjusted_trust(user.trust_score, impact);
        let score = user.trust_score;
        t.acknowledge(score)
    }

    async fn put_book(&self, book: &Book) -> Result<()> {
        let mut t = self.tables.lock().await;
        t.check_faults(None)?;
        t.books.insert(book.book_id, book.clone());
        Ok(())
    }

    async fn get_book(&self, book_id: &BookId) -> Result<Option<Book>> {
        let mut t = self.tables.lock().await;
        t.check_faults(None)?;
        Ok(t.books.get(book_id).cloned())
    }

    // =========================================================================
    // Wallet Operations
    // =========================================================================

    async fn open_wallet(&self, user_id: &UserId) -> Result<Wallet> {
        let mut t = self.tables.lock().await;
        t.check_faults(None)?;
        Ok(t.open_wallet(user_id).clone())
    }

    async fn get_wallet(&self, user_id: &UserId) -> Result<Option<Wallet>> {
        let mut t = self.tables.lock().await;
        t.check_faults(None)?;
        Ok(t.wallets.get(user_id).cloned())
    }

    async fn reserve_funds(&self, user_id: &UserId, amount: i64) -> Result<Wallet> {
        let mut t = self.tables.lock().await;
        t.check_faults(None)?;
        let wallet = t.wallet_mut(user_id)?;
        wallet.reserved_amount += amount;
        wallet.last_updated = Utc::now();
        let wallet = wallet.clone();
        t.acknowledge(wallet)
    }

    async fn release_funds(&self, user_id: &UserId, amount: i64) -> Result<Option<Wallet>> {
        let mut t = self.tables.lock().await;
        t.check_faults(None)?;
        let released = t.release(user_id, amount);
        t.acknowledge(released)
    }

    async fn deduct_reserved(&self, user_id: &UserId, amount: i64) -> Result<Wallet> {
        let mut t = self.tables.lock().await;
        t.check_faults(None)?;
        let wallet = t.deduct(user_id, amount)?;
        t.acknowledge(wallet)
    }

    async fn credit_top_up(
        &self,
        user_id: &UserId,
        amount: i64,
        payment_ref: &str,
    ) -> Result<Wallet> {
        let mut t = self.tables.lock().await;
        t.check_faults(None)?;
        if t.payment_refs.contains(payment_ref) {
            return Err(MarketError::DuplicatePayment {
                reference: payment_ref.to_string(),
            }
            .into());
        }
        t.payment_refs.insert(payment_ref.to_string());
        let wallet = t.credit(user_id, amount);
        let entry = LedgerEntry::new(
            &wallet,
            amount,
            LedgerEntryType::TopUp,
            Some(payment_ref.to_string()),
            wallet.last_updated,
        );
        t.ledger.push(entry);
        Ok(wallet)
    }

    async fn record_entry(&self, entry: &LedgerEntry) -> Result<()> {
        let mut t = self.tables.lock().await;
        t.check_faults(None)?;
        t.ledger.push(entry.clone());
        Ok(())
    }

    async fn list_ledger(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let mut t = self.tables.lock().await;
        t.check_faults(None)?;
        // Newest insert first; the stable sort keeps that order within one timestamp.
        let mut entries: Vec<_> = t
            .ledger
            .iter()
            .rev()
            .filter(|e| e.user_id == *user_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries.into_iter().skip(offset).take(limit).collect())
    }

    // =========================================================================
    // Transaction Operations
    // =========================================================================

    async fn create_reservation(&self, transaction: &Transaction) -> Result<Transaction> {
        let mut t = self.tables.lock().await;
        t.check_faults(None)?;
        let reservation = transaction.reservation();

        let duplicate = t.all(transaction.kind()).iter().any(|other| {
            other.status() == TransactionStatus::Pending
                && other.reservation().requester_id == reservation.requester_id
                && other.reservation().book_id == reservation.book_id
        });
        if duplicate {
            return Err(MarketError::DuplicateReservation {
                book_id: reservation.book_id.to_string(),
            }
            .into());
        }

        let wallet = t.open_wallet(&reservation.requester_id);
        if !wallet.can_reserve(reservation.total_cost) {
            return Err(MarketError::InsufficientFunds {
                available: wallet.available(),
                required: reservation.total_cost,
            }
            .into());
        }
        wallet.reserved_amount += reservation.total_cost;
        wallet.last_updated = Utc::now();

        t.save(transaction.clone());
        Ok(transaction.clone())
    }

    async fn get_transaction(&self, tx_ref: &TransactionRef) -> Result<Option<Transaction>> {
        let mut t = self.tables.lock().await;
        t.check_faults(None)?;
        Ok(t.transaction(tx_ref))
    }

    async fn list_by_status(
        &self,
        kind: TransactionKind,
        status: TransactionStatus,
    ) -> Result<Vec<Transaction>> {
        let mut t = self.tables.lock().await;
        t.check_faults(None)?;
        let mut matching: Vec<_> = t
            .all(kind)
            .into_iter()
            .filter(|tx| tx.status() == status)
            .collect();
        matching.sort_by_key(|tx| tx.reservation().reserved_at);
        Ok(matching)
    }

    async fn list_for_user(
        &self,
        user_id: &UserId,
        kind: TransactionKind,
    ) -> Result<Vec<Transaction>> {
        let mut t = self.tables.lock().await;
        t.check_faults(None)?;
        let mut matching: Vec<_> = t
            .all(kind)
            .into_iter()
            .filter(|tx| {
                let r = tx.reservation();
                r.requester_id == *user_id || r.original_owner_id == *user_id
            })
            .collect();
        matching.sort_by(|a, b| b.reservation().reserved_at.cmp(&a.reservation().reserved_at));
        Ok(matching)
    }

    async fn approve(
        &self,
        tx_ref: &TransactionRef,
        actor: &UserId,
        meetup_time: NaiveTime,
        policy: EscrowPolicy,
    ) -> Result<Approval> {
        let mut t = self.tables.lock().await;
        t.check_faults(Some(tx_ref))?;
        let mut tx = t.require(tx_ref)?;

        lifecycle::approve(&mut tx, *actor, meetup_time)?;
        if t.book_committed_elsewhere(&tx) {
            return Err(MarketError::Conflict(
                "book is already committed to another transaction".into(),
            )
            .into());
        }

        let capture = Capture::plan(&tx, policy);
        let payer_wallet = t.deduct(&capture.payer, capture.amount)?;
        let payee_wallet = t.credit(&capture.payee, capture.payout);
        let now = Utc::now();
        let debit = LedgerEntry::new(
            &payer_wallet,
            capture.amount,
            capture.debit_type,
            Some(capture.reference.clone()),
            now,
        );
        let credit = LedgerEntry::new(
            &payee_wallet,
            capture.payout,
            capture.credit_type,
            Some(capture.reference.clone()),
            now,
        );
        t.ledger.push(debit);
        t.ledger.push(credit);
        t.save(tx.clone());

        t.acknowledge(Approval {
            transaction: tx,
            capture,
            payer_wallet,
            payee_wallet,
        })
    }

    async fn withdraw_pending(
        &self,
        tx_ref: &TransactionRef,
        withdrawal: &Withdrawal,
    ) -> Result<Withdrawn> {
        let mut t = self.tables.lock().await;
        t.check_faults(Some(tx_ref))?;
        let tx = t.require(tx_ref)?;
        lifecycle::check_withdrawal(&tx, withdrawal)?;

        let reservation = tx.reservation();
        let released = t
            .release(&reservation.requester_id, reservation.total_cost)
            .is_some();
        if !released {
            tracing::warn!(
                transaction = %tx_ref,
                user_id = %reservation.requester_id,
                amount = reservation.total_cost,
                "escrow release guard failed; deleting reservation anyway"
            );
        }
        t.remove(tx_ref);
        Ok(Withdrawn {
            transaction: tx,
            released,
        })
    }

    async fn confirm_pickup(
        &self,
        tx_ref: &TransactionRef,
        actor: &UserId,
        today: NaiveDate,
    ) -> Result<Confirmation> {
        let mut t = self.tables.lock().await;
        t.check_faults(Some(tx_ref))?;
        let mut tx = t.require(tx_ref)?;
        let outcome = lifecycle::confirm_pickup(&mut tx, *actor, today)?;
        t.save(tx.clone());
        t.acknowledge(Confirmation {
            transaction: tx,
            outcome,
        })
    }

    async fn confirm_return(&self, rental_id: &RentalId, actor: &UserId) -> Result<Confirmation> {
        let tx_ref = TransactionRef::Rental(*rental_id);
        let mut t = self.tables.lock().await;
        t.check_faults(Some(&tx_ref))?;
        let mut rental = t
            .rentals
            .get(rental_id)
            .cloned()
            .ok_or_else(|| MarketError::not_found("rental", rental_id))?;
        let outcome = lifecycle::confirm_return(&mut rental, *actor)?;
        let tx = Transaction::Rental(rental);
        t.save(tx.clone());
        Ok(Confirmation {
            transaction: tx,
            outcome,
        })
    }

    async fn begin_confirmation_window(
        &self,
        tx_ref: &TransactionRef,
        phase: Phase,
        now: DateTime<Utc>,
    ) -> Result<Option<Transaction>> {
        let mut t = self.tables.lock().await;
        t.check_faults(Some(tx_ref))?;
        let Some(mut tx) = t.transaction(tx_ref) else {
            return Ok(None);
        };
        if !lifecycle::begin_confirmation_window(&mut tx, phase, now) {
            return Ok(None);
        }
        t.save(tx.clone());
        Ok(Some(tx))
    }

    async fn decide_transfer(
        &self,
        purchase_id: &PurchaseId,
        actor: &UserId,
        transfer_ownership: bool,
    ) -> Result<TransferDecision> {
        let tx_ref = TransactionRef::Purchase(*purchase_id);
        let mut t = self.tables.lock().await;
        t.check_faults(Some(&tx_ref))?;
        let mut purchase = t
            .purchases
            .get(purchase_id)
            .cloned()
            .ok_or_else(|| MarketError::not_found("purchase", purchase_id))?;
        let book_id = purchase.reservation.book_id;
        let mut book = t
            .books
            .get(&book_id)
            .cloned()
            .ok_or_else(|| MarketError::not_found("book", book_id))?;

        lifecycle::decide_transfer(&mut purchase, *actor, transfer_ownership)?;
        if transfer_ownership {
            book.owner_id = purchase.reservation.requester_id;
        } else {
            book.is_soft_deleted = true;
        }

        t.books.insert(book_id, book.clone());
        t.purchases.insert(purchase.id, purchase.clone());
        Ok(TransferDecision { purchase, book })
    }

    // =========================================================================
    // Ratings and Notifications
    // =========================================================================

    async fn submit_rating(&self, rating: &Rating, party: Party) -> Result<Transaction> {
        let mut t = self.tables.lock().await;
        t.check_faults(Some(&rating.transaction))?;
        let mut tx = t.require(&rating.transaction)?;
        lifecycle::mark_rated(&mut tx, party)?;
        let duplicate = t
            .ratings
            .iter()
            .any(|r| r.transaction == rating.transaction && r.rater_id == rating.rater_id);
        if duplicate {
            return Err(MarketError::AlreadyRated.into());
        }
        t.ratings.push(rating.clone());
        t.save(tx.clone());
        Ok(tx)
    }

    async fn insert_notification(&self, notification: &Notification) -> Result<()> {
        let mut t = self.tables.lock().await;
        t.check_faults(None)?;
        t.notifications.push(notification.clone());
        Ok(())
    }

    async fn list_notifications(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Notification>> {
        let mut t = self.tables.lock().await;
        t.check_faults(None)?;
        let mut mine: Vec<_> = t
            .notifications
            .iter()
            .filter(|n| n.receiver_id == *user_id)
            .cloned()
            .collect();
        mine.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(mine.into_iter().skip(offset).take(limit).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use readits_core::{BookAvailability, Meetup, Reservation};

    struct Fixture {
        store: MemoryStore,
        owner: UserId,
        renter: UserId,
        book: Book,
    }

    async fn fixture(renter_balance: i64) -> Fixture {
        let store = MemoryStore::new();
        let owner = UserId::generate();
        let renter = UserId::generate();
        store.put_user(&User::new(owner, "owner")).await.unwrap();
        store.put_user(&User::new(renter, "renter")).await.unwrap();
        let book = Book {
            book_id: BookId::generate(),
            owner_id: owner,
            title: "Middlemarch".into(),
            availability: BookAvailability::Both,
            daily_rent_price: 10,
            security_deposit: 30,
            purchase_price: 100,
            is_soft_deleted: false,
        };
        store.put_book(&book).await.unwrap();
        if renter_balance > 0 {
            store
                .credit_top_up(&renter, renter_balance, "seed")
                .await
                .unwrap();
        }
        Fixture {
            store,
            owner,
            renter,
            book,
        }
    }

    fn purchase(f: &Fixture) -> Transaction {
        let meetup = Meetup {
            date: Utc::now().date_naive(),
            time_window: "10:00 AM - 1:00 PM".into(),
            time: None,
            location: "Cafe".into(),
            latitude: None,
            longitude: None,
        };
        Transaction::Purchase(Purchase::new(Reservation::pending(
            f.renter,
            f.owner,
            f.book.book_id,
            f.book.purchase_price,
            meetup,
            Utc::now(),
            Duration::hours(24),
        )))
    }

    fn eleven() -> NaiveTime {
        NaiveTime::from_hms_opt(11, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn reservation_reserves_and_blocks_duplicates() {
        let f = fixture(500).await;
        f.store.create_reservation(&purchase(&f)).await.unwrap();

        let wallet = f.store.get_wallet(&f.renter).await.unwrap().unwrap();
        assert_eq!(wallet.reserved_amount, 100);
        assert_eq!(wallet.balance, 500);

        let err = f.store.create_reservation(&purchase(&f)).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Domain(MarketError::DuplicateReservation { .. })
        ));
    }

    #[tokio::test]
    async fn reservation_requires_unreserved_funds() {
        let f = fixture(50).await;
        let err = f.store.create_reservation(&purchase(&f)).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Domain(MarketError::InsufficientFunds { available: 50, required: 100 })
        ));
    }

    #[tokio::test]
    async fn approve_captures_and_pays_owner() {
        let f = fixture(500).await;
        let tx = f.store.create_reservation(&purchase(&f)).await.unwrap();

        let approval = f
            .store
            .approve(&tx.reference(), &f.owner, eleven(), EscrowPolicy::default())
            .await
            .unwrap();
        assert_eq!(approval.payer_wallet.balance, 400);
        assert_eq!(approval.payer_wallet.reserved_amount, 0);
        assert_eq!(approval.payee_wallet.balance, 100);

        let ledger = f.store.list_ledger(&f.renter, 10, 0).await.unwrap();
        assert_eq!(ledger[0].entry_type, LedgerEntryType::PurchasePayment);
        assert_eq!(ledger[0].amount, -100);
    }

    #[tokio::test]
    async fn failed_approval_leaves_record_pending() {
        let f = fixture(500).await;
        let tx = f.store.create_reservation(&purchase(&f)).await.unwrap();
        // Drop the earmark out from under the reservation.
        f.store.release_funds(&f.renter, 100).await.unwrap();

        let err = f
            .store
            .approve(&tx.reference(), &f.owner, eleven(), EscrowPolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Domain(MarketError::InsufficientFunds { .. })
        ));
        let stored = f.store.get_transaction(&tx.reference()).await.unwrap().unwrap();
        assert_eq!(stored.status(), TransactionStatus::Pending);
    }

    #[tokio::test]
    async fn release_guard_failure_still_deletes() {
        let f = fixture(500).await;
        let tx = f.store.create_reservation(&purchase(&f)).await.unwrap();
        assert!(f.store.release_funds(&f.renter, 100).await.unwrap().is_some());

        let withdrawn = f
            .store
            .withdraw_pending(&tx.reference(), &Withdrawal::Cancel { actor: f.renter })
            .await
            .unwrap();
        assert!(!withdrawn.released);
        assert!(f.store.get_transaction(&tx.reference()).await.unwrap().is_none());
        let wallet = f.store.get_wallet(&f.renter).await.unwrap().unwrap();
        assert_eq!(wallet.reserved_amount, 0);
    }

    #[tokio::test]
    async fn top_up_is_idempotent_per_reference() {
        let f = fixture(0).await;
        f.store.credit_top_up(&f.renter, 200, "inv_1").await.unwrap();
        let err = f
            .store
            .credit_top_up(&f.renter, 200, "inv_1")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Domain(MarketError::DuplicatePayment { .. })
        ));
        let wallet = f.store.get_wallet(&f.renter).await.unwrap().unwrap();
        assert_eq!(wallet.balance, 200);
    }

    #[tokio::test]
    async fn transfer_decision_moves_or_retires_book() {
        let f = fixture(500).await;
        let tx = f.store.create_reservation(&purchase(&f)).await.unwrap();
        let r = tx.reference();
        f.store
            .approve(&r, &f.owner, eleven(), EscrowPolicy::default())
            .await
            .unwrap();
        let today = Utc::now().date_naive();
        f.store.confirm_pickup(&r, &f.owner, today).await.unwrap();
        f.store.confirm_pickup(&r, &f.renter, today).await.unwrap();

        let TransactionRef::Purchase(id) = r else {
            panic!("expected purchase");
        };
        let decision = f.store.decide_transfer(&id, &f.renter, true).await.unwrap();
        assert_eq!(decision.book.owner_id, f.renter);
        assert!(!decision.purchase.transfer_decision_pending);
    }

    #[tokio::test]
    async fn trust_adjustment_clamps() {
        let f = fixture(0).await;
        assert_eq!(f.store.adjust_trust_score(&f.owner, 600).await.unwrap(), 1000);
        assert_eq!(f.store.adjust_trust_score(&f.owner, -2000).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn ledger_lists_newest_first_within_one_millisecond() {
        let f = fixture(0).await;
        let wallet = f.store.open_wallet(&f.owner).await.unwrap();
        let at = Utc::now();
        let entry = |id: &str, amount: i64, created_at| {
            let mut entry =
                LedgerEntry::new(&wallet, amount, LedgerEntryType::SaleEarning, None, created_at);
            entry.id = id.parse().unwrap();
            entry
        };

        // Same millisecond, ids out of insertion order.
        f.store.record_entry(&entry("01ARZ3NDEKTSV4RRFFQ69G5FAZ", 1, at)).await.unwrap();
        f.store.record_entry(&entry("01ARZ3NDEKTSV4RRFFQ69G5FAA", 2, at)).await.unwrap();
        let later = at + Duration::milliseconds(1);
        f.store.record_entry(&entry("01ARZ3NDEKTSV4RRFFQ69G5F00", 3, later)).await.unwrap();

        let amounts: Vec<_> = f
            .store
            .list_ledger(&f.owner, 10, 0)
            .await
            .unwrap()
            .iter()
            .map(|e| e.amount)
            .collect();
        assert_eq!(amounts, vec![3, 2, 1]);
    }
}
