//! Common test utilities for readits integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::{Arc, Mutex};

use axum::http::HeaderValue;
use axum::Router;
use axum_test::TestServer;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedReceiver;

use readits_core::{
    Book, BookAvailability, BookId, Clock, Notification, Transaction, TransactionKind,
    TransactionRef, User, UserId,
};
use readits_service::auth::issue_token;
use readits_service::engine::{Notifier, ReservationTerms};
use readits_service::{create_router, AppState, ServiceConfig};
use readits_store::{MemoryStore, Store};

pub const JWT_SECRET: &str = "test-jwt-secret";
pub const CALLBACK_TOKEN: &str = "test-callback-token";

/// Meetup window used by every test reservation.
pub const WINDOW: &str = "10:00 AM - 1:00 PM";

/// A clock the test moves by hand.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// 2026-03-02 10:00 local time at the default +8 offset.
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 2, 0, 0).unwrap()
}

/// The local day after [`start_time`].
pub fn meetup_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 3).unwrap()
}

/// 11:00 local on [`meetup_date`].
pub fn meetup_instant() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 3, 3, 0, 0).unwrap()
}

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// The in-memory store, kept concrete for seeding and fault injection.
    pub store: Arc<MemoryStore>,
    /// The clock every engine component reads.
    pub clock: Arc<ManualClock>,
    /// The same state the router serves, for engine-level calls.
    pub state: AppState,
    notifications: Mutex<UnboundedReceiver<Notification>>,
}

impl TestHarness {
    /// Create a new test harness with a fresh store and default settings.
    pub fn new() -> Self {
        Self::with_config(Self::config())
    }

    /// Settings used by [`TestHarness::new`].
    pub fn config() -> ServiceConfig {
        ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            jwt_secret: Some(JWT_SECRET.into()),
            xendit_callback_token: Some(CALLBACK_TOKEN.into()),
            ..ServiceConfig::default()
        }
    }

    /// Create a harness over a custom configuration.
    pub fn with_config(config: ServiceConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(start_time()));
        let (notifier, notifications) = Notifier::channel();

        let state = AppState::new(store.clone(), config, clock.clone(), notifier);
        let router: Router = create_router(state.clone());
        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            store,
            clock,
            state,
            notifications: Mutex::new(notifications),
        }
    }

    /// Register a user with `balance` readits.
    pub async fn user(&self, name: &str, balance: i64) -> UserId {
        let user_id = UserId::generate();
        self.store
            .put_user(&User::new(user_id, name))
            .await
            .expect("put user");
        self.store.open_wallet(&user_id).await.expect("open wallet");
        if balance > 0 {
            self.store
                .credit_top_up(&user_id, balance, &format!("seed_{user_id}"))
                .await
                .expect("seed balance");
        }
        user_id
    }

    /// Set a user's trust score.
    pub async fn set_trust(&self, user_id: &UserId, trust_score: i32) {
        let mut user = self
            .store
            .get_user(user_id)
            .await
            .expect("get user")
            .expect("user exists");
        user.trust_score = trust_score;
        self.store.put_user(&user).await.expect("put user");
    }

    /// List a book for sale at `price`.
    pub async fn book_for_sale(&self, owner: &UserId, price: i64) -> BookId {
        self.book(owner, BookAvailability::Purchase, 0, 0, price).await
    }

    /// List a book for rent at `daily` per day plus `deposit`.
    pub async fn book_for_rent(&self, owner: &UserId, daily: i64, deposit: i64) -> BookId {
        self.book(owner, BookAvailability::Rent, daily, deposit, 0)
            .await
    }

    /// List a book.
    pub async fn book(
        &self,
        owner: &UserId,
        availability: BookAvailability,
        daily_rent_price: i64,
        security_deposit: i64,
        purchase_price: i64,
    ) -> BookId {
        let book = Book {
            book_id: BookId::generate(),
            owner_id: *owner,
            title: "The Left Hand of Darkness".into(),
            availability,
            daily_rent_price,
            security_deposit,
            purchase_price,
            is_soft_deleted: false,
        };
        self.store.put_book(&book).await.expect("put book");
        book.book_id
    }

    /// Terms for a purchase meeting tomorrow.
    pub fn purchase_terms(book_id: BookId) -> ReservationTerms {
        ReservationTerms {
            book_id: Some(book_id),
            meetup_date: Some(meetup_date()),
            meetup_time_window: Some(WINDOW.into()),
            meetup_location: Some("Main library steps".into()),
            ..ReservationTerms::default()
        }
    }

    /// Terms for a rental of `days` meeting tomorrow.
    pub fn rental_terms(book_id: BookId, days: u32) -> ReservationTerms {
        ReservationTerms {
            rental_duration_days: Some(days),
            latitude: Some(14.65),
            longitude: Some(121.07),
            ..Self::purchase_terms(book_id)
        }
    }

    /// JSON body for a reservation request.
    pub fn terms_json(book_id: BookId, days: Option<u32>) -> Value {
        let mut body = json!({
            "book_id": book_id.to_string(),
            "meetup_date": meetup_date().to_string(),
            "meetup_time_window": WINDOW,
            "meetup_location": "Main library steps",
        });
        if let Some(days) = days {
            body["rental_duration_days"] = json!(days);
        }
        body
    }

    /// Create a pending purchase through the engine.
    pub async fn pending_purchase(&self, buyer: UserId, book_id: BookId) -> TransactionRef {
        self.state
            .reservations
            .create(buyer, TransactionKind::Purchase, Self::purchase_terms(book_id))
            .await
            .expect("create purchase")
            .reference()
    }

    /// Create a pending rental through the engine.
    pub async fn pending_rental(&self, renter: UserId, book_id: BookId, days: u32) -> TransactionRef {
        self.state
            .reservations
            .create(renter, TransactionKind::Rental, Self::rental_terms(book_id, days))
            .await
            .expect("create rental")
            .reference()
    }

    /// Approve `tx_ref` as `owner` at 11:00.
    pub async fn approve(&self, tx_ref: &TransactionRef, owner: &UserId) -> Transaction {
        self.state
            .transactions
            .approve(tx_ref, owner, "11:00")
            .await
            .expect("approve")
            .transaction
    }

    /// Confirm the pickup from both sides.
    pub async fn hand_over(&self, tx_ref: &TransactionRef, requester: &UserId, owner: &UserId) {
        for actor in [requester, owner] {
            self.state
                .transactions
                .confirm_pickup(tx_ref, actor)
                .await
                .expect("confirm pickup");
        }
    }

    /// Fetch a transaction straight from the store.
    pub async fn transaction(&self, tx_ref: &TransactionRef) -> Option<Transaction> {
        self.store.get_transaction(tx_ref).await.expect("get transaction")
    }

    /// `(balance, reserved_amount)` of a user's wallet.
    pub async fn funds(&self, user_id: &UserId) -> (i64, i64) {
        let wallet = self
            .store
            .get_wallet(user_id)
            .await
            .expect("get wallet")
            .expect("wallet exists");
        (wallet.balance, wallet.reserved_amount)
    }

    /// Everything published since the last call.
    pub fn drain_notifications(&self) -> Vec<Notification> {
        let mut receiver = self.notifications.lock().unwrap();
        let mut drained = Vec::new();
        while let Ok(notification) = receiver.try_recv() {
            drained.push(notification);
        }
        drained
    }

    /// Authorization header value for `user_id`.
    pub fn auth(&self, user_id: &UserId) -> HeaderValue {
        let token = issue_token(user_id, JWT_SECRET, 4_102_444_800).expect("issue token");
        HeaderValue::from_str(&format!("Bearer {token}")).expect("header value")
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
