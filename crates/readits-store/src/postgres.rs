//! PostgreSQL storage implementation.
//!
//! Each compound operation opens a transaction, locks the rows it reads with
//! `SELECT ... FOR UPDATE`, applies the state machine from `readits_core::lifecycle` to
//! the typed record and writes it back before committing. Wallet counters change only
//! through conditional `UPDATE ... WHERE <guard> RETURNING`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use uuid::Uuid;

use readits_core::lifecycle;
use readits_core::{
    Book, BookId, Capture, ConfirmOutcome, ConfirmationPair, EscrowPolicy, LedgerEntry,
    LedgerEntryType, MarketError, Meetup, Notification, Party, Phase, Purchase, PurchaseId,
    Rating, Rental, RentalId, Reservation, Transaction, TransactionKind, TransactionRef,
    TransactionStatus, User, UserId, Wallet, Withdrawal,
};

use crate::error::{Result, StoreError};
use crate::{Approval, Confirmation, Store, TransferDecision, Withdrawn};

const WALLET_COLUMNS: &str = "wallet_id, user_id, balance, reserved_amount, last_updated";

const RESERVATION_COLUMNS: &str = "user_id, original_owner_id, book_id, status, reserved_at, \
     reservation_expires_at, total_cost, meetup_date, meetup_time_window, meetup_time, \
     meetup_location, all_fees_captured, user_confirmed_pickup, owner_confirmed_pickup, \
     pickup_confirmation_started_at, user_rated, owner_rated";

const RENTAL_COLUMNS: &str = "latitude, longitude, rental_duration_days, rent_start_date, \
     rent_end_date, actual_rate, actual_deposit, user_confirmed_return, owner_confirmed_return, \
     return_confirmation_started_at";

const PURCHASE_COLUMNS: &str = "transfer_decision_pending, ownership_transferred";

/// Statuses in which a book is committed to a transaction.
const COMMITTED_STATUSES: [TransactionStatus; 4] = [
    TransactionStatus::Approved,
    TransactionStatus::AwaitingPickupConfirmation,
    TransactionStatus::Ongoing,
    TransactionStatus::AwaitingReturnConfirmation,
];

/// PostgreSQL-backed [`Store`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to `database_url` with up to `max_connections` pooled connections.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be created.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply pending schema migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

// =============================================================================
// Row Mapping
// =============================================================================

fn table(kind: TransactionKind) -> (&'static str, &'static str) {
    match kind {
        TransactionKind::Rental => ("rentals", "rental_id"),
        TransactionKind::Purchase => ("purchases", "purchase_id"),
    }
}

fn parse_column<T: std::str::FromStr<Err = String>>(value: &str) -> Result<T> {
    value.parse().map_err(StoreError::Serialization)
}

#[derive(sqlx::FromRow)]
struct UserRow {
    user_id: Uuid,
    username: String,
    trust_score: i32,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            user_id: row.user_id.into(),
            username: row.username,
            trust_score: row.trust_score,
        }
    }
}

#[derive(sqlx::FromRow)]
struct BookRow {
    book_id: Uuid,
    owner_id: Uuid,
    title: String,
    availability: String,
    daily_rent_price: i64,
    security_deposit: i64,
    purchase_price: i64,
    is_soft_deleted: bool,
}

impl TryFrom<BookRow> for Book {
    type Error = StoreError;

    fn try_from(row: BookRow) -> Result<Self> {
        Ok(Self {
            book_id: row.book_id.into(),
            owner_id: row.owner_id.into(),
            title: row.title,
            availability: parse_column(&row.availability)?,
            daily_rent_price: row.daily_rent_price,
            security_deposit: row.security_deposit,
            purchase_price: row.purchase_price,
            is_soft_deleted: row.is_soft_deleted,
        })
    }
}

#[derive(sqlx::FromRow)]
struct WalletRow {
    wallet_id: Uuid,
    user_id: Uuid,
    balance: i64,
    reserved_amount: i64,
    last_updated: DateTime<Utc>,
}

impl From<WalletRow> for Wallet {
    fn from(row: WalletRow) -> Self {
        Self {
            wallet_id: row.wallet_id.into(),
            user_id: row.user_id.into(),
            balance: row.balance,
            reserved_amount: row.reserved_amount,
            last_updated: row.last_updated,
        }
    }
}

#[derive(sqlx::FromRow)]
struct LedgerRow {
    entry_id: String,
    wallet_id: Uuid,
    user_id: Uuid,
    amount: i64,
    entry_type: String,
    reference: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<LedgerRow> for LedgerEntry {
    type Error = StoreError;

    fn try_from(row: LedgerRow) -> Result<Self> {
        Ok(Self {
            id: row
                .entry_id
                .parse()
                .map_err(|e: readits_core::IdError| StoreError::Serialization(e.to_string()))?,
            wallet_id: row.wallet_id.into(),
            user_id: row.user_id.into(),
            amount: row.amount,
            entry_type: parse_column::<LedgerEntryType>(&row.entry_type)?,
            reference: row.reference,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ReservationRow {
    user_id: Uuid,
    original_owner_id: Uuid,
    book_id: Uuid,
    status: String,
    reserved_at: DateTime<Utc>,
    reservation_expires_at: DateTime<Utc>,
    total_cost: i64,
    meetup_date: NaiveDate,
    meetup_time_window: String,
    meetup_time: Option<NaiveTime>,
    meetup_location: String,
    all_fees_captured: bool,
    user_confirmed_pickup: bool,
    owner_confirmed_pickup: bool,
    pickup_confirmation_started_at: Option<DateTime<Utc>>,
    user_rated: bool,
    owner_rated: bool,
}

impl ReservationRow {
    fn into_reservation(self, latitude: Option<f64>, longitude: Option<f64>) -> Result<Reservation> {
        Ok(Reservation {
            requester_id: self.user_id.into(),
            original_owner_id: self.original_owner_id.into(),
            book_id: self.book_id.into(),
            status: parse_column(&self.status)?,
            reserved_at: self.reserved_at,
            reservation_expires_at: self.reservation_expires_at,
            total_cost: self.total_cost,
            meetup: Meetup {
                date: self.meetup_date,
                time_window: self.meetup_time_window,
                time: self.meetup_time,
                location: self.meetup_location,
                latitude,
                longitude,
            },
            all_fees_captured: self.all_fees_captured,
            pickup: ConfirmationPair {
                user_confirmed: self.user_confirmed_pickup,
                owner_confirmed: self.owner_confirmed_pickup,
            },
            pickup_confirmation_started_at: self.pickup_confirmation_started_at,
            user_rated: self.user_rated,
            owner_rated: self.owner_rated,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RentalRow {
    rental_id: Uuid,
    #[sqlx(flatten)]
    reservation: ReservationRow,
    latitude: Option<f64>,
    longitude: Option<f64>,
    rental_duration_days: i32,
    rent_start_date: Option<NaiveDate>,
    rent_end_date: Option<NaiveDate>,
    actual_rate: i64,
    actual_deposit: i64,
    user_confirmed_return: bool,
    owner_confirmed_return: bool,
    return_confirmation_started_at: Option<DateTime<Utc>>,
}

impl TryFrom<RentalRow> for Rental {
    type Error = StoreError;

    fn try_from(row: RentalRow) -> Result<Self> {
        Ok(Self {
            id: row.rental_id.into(),
            reservation: row.reservation.into_reservation(row.latitude, row.longitude)?,
            rental_duration_days: u32::try_from(row.rental_duration_days).map_err(|_| {
                StoreError::Serialization(format!(
                    "negative rental duration: {}",
                    row.rental_duration_days
                ))
            })?,
            rent_start_date: row.rent_start_date,
            rent_end_date: row.rent_end_date,
            actual_rate: row.actual_rate,
            actual_deposit: row.actual_deposit,
            return_confirmation: ConfirmationPair {
                user_confirmed: row.user_confirmed_return,
                owner_confirmed: row.owner_confirmed_return,
            },
            return_confirmation_started_at: row.return_confirmation_started_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PurchaseRow {
    purchase_id: Uuid,
    #[sqlx(flatten)]
    reservation: ReservationRow,
    transfer_decision_pending: bool,
    ownership_transferred: Option<bool>,
}

impl TryFrom<PurchaseRow> for Purchase {
    type Error = StoreError;

    fn try_from(row: PurchaseRow) -> Result<Self> {
        Ok(Self {
            id: row.purchase_id.into(),
            reservation: row.reservation.into_reservation(None, None)?,
            transfer_decision_pending: row.transfer_decision_pending,
            ownership_transferred: row.ownership_transferred,
        })
    }
}

#[derive(sqlx::FromRow)]
struct NotificationRow {
    notification_id: Uuid,
    sender_id: Option<Uuid>,
    receiver_id: Uuid,
    notification_type: String,
    header: String,
    message: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<NotificationRow> for Notification {
    type Error = StoreError;

    fn try_from(row: NotificationRow) -> Result<Self> {
        Ok(Self {
            id: row.notification_id.into(),
            sender_id: row.sender_id.map(UserId::from),
            receiver_id: row.receiver_id.into(),
            kind: parse_column(&row.notification_type)?,
            header: row.header,
            message: row.message,
            created_at: row.created_at,
        })
    }
}

fn is_unique_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            db.code().as_deref() == Some("23505") && db.constraint() == Some(constraint)
        }
        _ => false,
    }
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

// =============================================================================
// Row Helpers (run inside a caller's transaction)
// =============================================================================

async fn fetch_transaction(
    conn: &mut PgConnection,
    tx_ref: &TransactionRef,
    for_update: bool,
) -> Result<Option<Transaction>> {
    let lock = if for_update { " FOR UPDATE" } else { "" };
    match tx_ref {
        TransactionRef::Rental(id) => {
            let sql = format!(
                "SELECT rental_id, {RESERVATION_COLUMNS}, {RENTAL_COLUMNS} FROM rentals \
                 WHERE rental_id = $1{lock}"
            );
            sqlx::query_as::<_, RentalRow>(&sql)
                .bind(id.as_uuid())
                .fetch_optional(&mut *conn)
                .await?
                .map(|row| Rental::try_from(row).map(Transaction::Rental))
                .transpose()
        }
        TransactionRef::Purchase(id) => {
            let sql = format!(
                "SELECT purchase_id, {RESERVATION_COLUMNS}, {PURCHASE_COLUMNS} FROM purchases \
                 WHERE purchase_id = $1{lock}"
            );
            sqlx::query_as::<_, PurchaseRow>(&sql)
                .bind(id.as_uuid())
                .fetch_optional(&mut *conn)
                .await?
                .map(|row| Purchase::try_from(row).map(Transaction::Purchase))
                .transpose()
        }
    }
}

async fn lock_transaction(conn: &mut PgConnection, tx_ref: &TransactionRef) -> Result<Transaction> {
    fetch_transaction(conn, tx_ref, true).await?.ok_or_else(|| {
        MarketError::not_found(tx_ref.kind().as_str(), tx_ref.as_uuid()).into()
    })
}

/// Row selection for listing queries.
enum Filter {
    Status(TransactionStatus),
    Party(Uuid),
}

impl Filter {
    const fn clause(&self) -> &'static str {
        match self {
            Self::Status(_) => "WHERE status = $1 ORDER BY reserved_at",
            Self::Party(_) => {
                "WHERE user_id = $1 OR original_owner_id = $1 ORDER BY reserved_at DESC"
            }
        }
    }
}

async fn fetch_where(
    conn: &mut PgConnection,
    kind: TransactionKind,
    filter: Filter,
) -> Result<Vec<Transaction>> {
    let clause = filter.clause();
    match kind {
        TransactionKind::Rental => {
            let sql = format!(
                "SELECT rental_id, {RESERVATION_COLUMNS}, {RENTAL_COLUMNS} FROM rentals {clause}"
            );
            let query = sqlx::query_as::<_, RentalRow>(&sql);
            let query = match filter {
                Filter::Status(status) => query.bind(status.as_str()),
                Filter::Party(user) => query.bind(user),
            };
            query
                .fetch_all(&mut *conn)
                .await?
                .into_iter()
                .map(|row| Rental::try_from(row).map(Transaction::Rental))
                .collect()
        }
        TransactionKind::Purchase => {
            let sql = format!(
                "SELECT purchase_id, {RESERVATION_COLUMNS}, {PURCHASE_COLUMNS} FROM purchases {clause}"
            );
            let query = sqlx::query_as::<_, PurchaseRow>(&sql);
            let query = match filter {
                Filter::Status(status) => query.bind(status.as_str()),
                Filter::Party(user) => query.bind(user),
            };
            query
                .fetch_all(&mut *conn)
                .await?
                .into_iter()
                .map(|row| Purchase::try_from(row).map(Transaction::Purchase))
                .collect()
        }
    }
}

async fn insert_transaction(conn: &mut PgConnection, tx: &Transaction) -> Result<()> {
    let r = tx.reservation();
    let result = match tx {
        Transaction::Rental(rental) => {
            let days = i32::try_from(rental.rental_duration_days)
                .map_err(|_| MarketError::validation("rental duration is too long"))?;
            sqlx::query(
                "INSERT INTO rentals (rental_id, user_id, original_owner_id, book_id, status, \
                 reserved_at, reservation_expires_at, total_cost, meetup_date, meetup_time_window, \
                 meetup_time, meetup_location, latitude, longitude, all_fees_captured, \
                 rental_duration_days, actual_rate, actual_deposit) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)",
            )
            .bind(rental.id.as_uuid())
            .bind(r.requester_id.as_uuid())
            .bind(r.original_owner_id.as_uuid())
            .bind(r.book_id.as_uuid())
            .bind(r.status.as_str())
            .bind(r.reserved_at)
            .bind(r.reservation_expires_at)
            .bind(r.total_cost)
            .bind(r.meetup.date)
            .bind(&r.meetup.time_window)
            .bind(r.meetup.time)
            .bind(&r.meetup.location)
            .bind(r.meetup.latitude)
            .bind(r.meetup.longitude)
            .bind(r.all_fees_captured)
            .bind(days)
            .bind(rental.actual_rate)
            .bind(rental.actual_deposit)
            .execute(&mut *conn)
            .await
        }
        Transaction::Purchase(purchase) => {
            sqlx::query(
                "INSERT INTO purchases (purchase_id, user_id, original_owner_id, book_id, status, \
                 reserved_at, reservation_expires_at, total_cost, meetup_date, meetup_time_window, \
                 meetup_time, meetup_location, all_fees_captured) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
            )
            .bind(purchase.id.as_uuid())
            .bind(r.requester_id.as_uuid())
            .bind(r.original_owner_id.as_uuid())
            .bind(r.book_id.as_uuid())
            .bind(r.status.as_str())
            .bind(r.reserved_at)
            .bind(r.reservation_expires_at)
            .bind(r.total_cost)
            .bind(r.meetup.date)
            .bind(&r.meetup.time_window)
            .bind(r.meetup.time)
            .bind(&r.meetup.location)
            .bind(r.all_fees_captured)
            .execute(&mut *conn)
            .await
        }
    };

    match result {
        Ok(_) => Ok(()),
        Err(err)
            if is_unique_violation(&err, "rentals_one_pending_per_user_book")
                || is_unique_violation(&err, "purchases_one_pending_per_user_book") =>
        {
            Err(MarketError::DuplicateReservation {
                book_id: r.book_id.to_string(),
            }
            .into())
        }
        Err(err) => Err(err.into()),
    }
}

async fn save_transaction(conn: &mut PgConnection, tx: &Transaction) -> Result<()> {
    let r = tx.reservation();
    match tx {
        Transaction::Rental(rental) => {
            sqlx::query(
                "UPDATE rentals SET status = $2, meetup_time = $3, all_fees_captured = $4, \
                 user_confirmed_pickup = $5, owner_confirmed_pickup = $6, \
                 pickup_confirmation_started_at = $7, user_rated = $8, owner_rated = $9, \
                 rent_start_date = $10, rent_end_date = $11, user_confirmed_return = $12, \
                 owner_confirmed_return = $13, return_confirmation_started_at = $14 \
                 WHERE rental_id = $1",
            )
            .bind(rental.id.as_uuid())
            .bind(r.status.as_str())
            .bind(r.meetup.time)
            .bind(r.all_fees_captured)
            .bind(r.pickup.user_confirmed)
            .bind(r.pickup.owner_confirmed)
            .bind(r.pickup_confirmation_started_at)
            .bind(r.user_rated)
            .bind(r.owner_rated)
            .bind(rental.rent_start_date)
            .bind(rental.rent_end_date)
            .bind(rental.return_confirmation.user_confirmed)
            .bind(rental.return_confirmation.owner_confirmed)
            .bind(rental.return_confirmation_started_at)
            .execute(&mut *conn)
            .await?;
        }
        Transaction::Purchase(purchase) => {
            sqlx::query(
                "UPDATE purchases SET status = $2, meetup_time = $3, all_fees_captured = $4, \
                 user_confirmed_pickup = $5, owner_confirmed_pickup = $6, \
                 pickup_confirmation_started_at = $7, user_rated = $8, owner_rated = $9, \
                 transfer_decision_pending = $10, ownership_transferred = $11 \
                 WHERE purchase_id = $1",
            )
            .bind(purchase.id.as_uuid())
            .bind(r.status.as_str())
            .bind(r.meetup.time)
            .bind(r.all_fees_captured)
            .bind(r.pickup.user_confirmed)
            .bind(r.pickup.owner_confirmed)
            .bind(r.pickup_confirmation_started_at)
            .bind(r.user_rated)
            .bind(r.owner_rated)
            .bind(purchase.transfer_decision_pending)
            .bind(purchase.ownership_transferred)
            .execute(&mut *conn)
            .await?;
        }
    }
    Ok(())
}

async fn delete_transaction(conn: &mut PgConnection, tx_ref: &TransactionRef) -> Result<()> {
    let (table, id_column) = table(tx_ref.kind());
    let sql = format!("DELETE FROM {table} WHERE {id_column} = $1");
    sqlx::query(&sql)
        .bind(tx_ref.as_uuid())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn book_committed_elsewhere(conn: &mut PgConnection, tx: &Transaction) -> Result<bool> {
    let (table, id_column) = table(tx.kind());
    let sql = format!(
        "SELECT EXISTS (SELECT 1 FROM {table} WHERE book_id = $1 AND {id_column} <> $2 \
         AND status = ANY($3))"
    );
    let statuses: Vec<String> = COMMITTED_STATUSES
        .iter()
        .map(|s| s.as_str().to_string())
        .collect();
    let exists = sqlx::query_scalar::<_, bool>(&sql)
        .bind(tx.reservation().book_id.as_uuid())
        .bind(tx.reference().as_uuid())
        .bind(statuses)
        .fetch_one(&mut *conn)
        .await?;
    Ok(exists)
}

async fn lock_book(conn: &mut PgConnection, book_id: &BookId) -> Result<Book> {
    let row = sqlx::query_as::<_, BookRow>(
        "SELECT book_id, owner_id, title, availability, daily_rent_price, security_deposit, \
         purchase_price, is_soft_deleted FROM books WHERE book_id = $1 FOR UPDATE",
    )
    .bind(book_id.as_uuid())
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| MarketError::not_found("book", book_id))?;
    row.try_into()
}

async fn ensure_wallet(conn: &mut PgConnection, user_id: &UserId) -> Result<()> {
    sqlx::query(
        "INSERT INTO readits_wallets (wallet_id, user_id) VALUES ($1, $2) \
         ON CONFLICT (user_id) DO NOTHING",
    )
    .bind(Uuid::new_v4())
    .bind(user_id.as_uuid())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn fetch_wallet(
    conn: &mut PgConnection,
    user_id: &UserId,
    for_update: bool,
) -> Result<Option<Wallet>> {
    let lock = if for_update { " FOR UPDATE" } else { "" };
    let sql = format!("SELECT {WALLET_COLUMNS} FROM readits_wallets WHERE user_id = $1{lock}");
    Ok(sqlx::query_as::<_, WalletRow>(&sql)
        .bind(user_id.as_uuid())
        .fetch_optional(&mut *conn)
        .await?
        .map(Wallet::from))
}

async fn release(conn: &mut PgConnection, user_id: &UserId, amount: i64) -> Result<Option<Wallet>> {
    let sql = format!(
        "UPDATE readits_wallets SET reserved_amount = reserved_amount - $2, last_updated = now() \
         WHERE user_id = $1 AND reserved_amount >= $2 RETURNING {WALLET_COLUMNS}"
    );
    Ok(sqlx::query_as::<_, WalletRow>(&sql)
        .bind(user_id.as_uuid())
        .bind(amount)
        .fetch_optional(&mut *conn)
        .await?
        .map(Wallet::from))
}

async fn deduct(conn: &mut PgConnection, user_id: &UserId, amount: i64) -> Result<Wallet> {
    let sql = format!(
        "UPDATE readits_wallets SET reserved_amount = reserved_amount - $2, \
         balance = balance - $2, last_updated = now() \
         WHERE user_id = $1 AND reserved_amount >= $2 AND balance >= $2 RETURNING {WALLET_COLUMNS}"
    );
    let updated = sqlx::query_as::<_, WalletRow>(&sql)
        .bind(user_id.as_uuid())
        .bind(amount)
        .fetch_optional(&mut *conn)
        .await?;
    if let Some(row) = updated {
        return Ok(row.into());
    }
    let wallet = fetch_wallet(conn, user_id, false)
        .await?
        .ok_or_else(|| MarketError::not_found("wallet", user_id))?;
    Err(MarketError::InsufficientFunds {
        available: wallet.reserved_amount.min(wallet.balance),
        required: amount,
    }
    .into())
}

async fn credit(conn: &mut PgConnection, user_id: &UserId, amount: i64) -> Result<Wallet> {
    let sql = format!(
        "INSERT INTO readits_wallets (wallet_id, user_id, balance) VALUES ($1, $2, $3) \
         ON CONFLICT (user_id) DO UPDATE \
         SET balance = readits_wallets.balance + EXCLUDED.balance, last_updated = now() \
         RETURNING {WALLET_COLUMNS}"
    );
    let row = sqlx::query_as::<_, WalletRow>(&sql)
        .bind(Uuid::new_v4())
        .bind(user_id.as_uuid())
        .bind(amount)
        .fetch_one(&mut *conn)
        .await?;
    Ok(row.into())
}

async fn insert_entry(conn: &mut PgConnection, entry: &LedgerEntry) -> Result<()> {
    sqlx::query(
        "INSERT INTO ledger_entries (entry_id, wallet_id, user_id, amount, entry_type, reference, \
         created_at) VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(entry.id.to_string())
    .bind(entry.wallet_id.as_uuid())
    .bind(entry.user_id.as_uuid())
    .bind(entry.amount)
    .bind(entry.entry_type.as_str())
    .bind(&entry.reference)
    .bind(entry.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

// =============================================================================
// Store Implementation
// =============================================================================

#[async_trait]
impl Store for PgStore {
    // =========================================================================
    // Users and Books
    // =========================================================================

    async fn put_user(&self, user: &User) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (user_id, username, trust_score) VALUES ($1, $2, $3) \
             ON CONFLICT (user_id) DO UPDATE \
             SET username = EXCLUDED.username, trust_score = EXCLUDED.trust_score",
        )
        .bind(user.user_id.as_uuid())
        .bind(&user.username)
        .bind(user.trust_score)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_user(&self, user_id: &UserId) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT user_id, username, trust_score FROM users WHERE user_id = $1",
        )
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    async fn adjust_trust_score(&self, user_id: &UserId, impact: i32) -> Result<i32> {
        sqlx::query_scalar::<_, i32>(
            "UPDATE users SET trust_score = LEAST(1000, GREATEST(0, trust_score + $2)) \
             WHERE user_id = $1 RETURNING trust_score",
        )
        .bind(user_id.as_uuid())
        .bind(impact)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| MarketError::not_found("user", user_id).into())
    }

    async fn put_book(&self, book: &Book) -> Result<()> {
        sqlx::query(
            "INSERT INTO books (book_id, owner_id, title, availability, daily_rent_price, \
             security_deposit, purchase_price, is_soft_deleted) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (book_id) DO UPDATE SET owner_id = EXCLUDED.owner_id, \
             title = EXCLUDED.title, availability = EXCLUDED.availability, \
             daily_rent_price = EXCLUDED.daily_rent_price, \
             security_deposit = EXCLUDED.security_deposit, \
             purchase_price = EXCLUDED.purchase_price, is_soft_deleted = EXCLUDED.is_soft_deleted",
        )
        .bind(book.book_id.as_uuid())
        .bind(book.owner_id.as_uuid())
        .bind(&book.title)
        .bind(book.availability.as_str())
        .bind(book.daily_rent_price)
        .bind(book.security_deposit)
        .bind(book.purchase_price)
        .bind(book.is_soft_deleted)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_book(&self, book_id: &BookId) -> Result<Option<Book>> {
        sqlx::query_as::<_, BookRow>(
            "SELECT book_id, owner_id, title, availability, daily_rent_price, security_deposit, \
             purchase_price, is_soft_deleted FROM books WHERE book_id = $1",
        )
        .bind(book_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .map(Book::try_from)
        .transpose()
    }

    // =========================================================================
    // Wallet Operations
    // =========================================================================

    async fn open_wallet(&self, user_id: &UserId) -> Result<Wallet> {
        let mut conn = self.pool.acquire().await?;
        ensure_wallet(&mut conn, user_id).await?;
        fetch_wallet(&mut conn, user_id, false)
            .await?
            .ok_or_else(|| MarketError::not_found("wallet", user_id).into())
    }

    async fn get_wallet(&self, user_id: &UserId) -> Result<Option<Wallet>> {
        let mut conn = self.pool.acquire().await?;
        fetch_wallet(&mut conn, user_id, false).await
    }

    async fn reserve_funds(&self, user_id: &UserId, amount: i64) -> Result<Wallet> {
        let sql = format!(
            "UPDATE readits_wallets SET reserved_amount = reserved_amount + $2, \
             last_updated = now() WHERE user_id = $1 RETURNING {WALLET_COLUMNS}"
        );
        sqlx::query_as::<_, WalletRow>(&sql)
            .bind(user_id.as_uuid())
            .bind(amount)
            .fetch_optional(&self.pool)
            .await?
            .map(Wallet::from)
            .ok_or_else(|| MarketError::not_found("wallet", user_id).into())
    }

    async fn release_funds(&self, user_id: &UserId, amount: i64) -> Result<Option<Wallet>> {
        let mut conn = self.pool.acquire().await?;
        release(&mut conn, user_id, amount).await
    }

    async fn deduct_reserved(&self, user_id: &UserId, amount: i64) -> Result<Wallet> {
        let mut conn = self.pool.acquire().await?;
        deduct(&mut conn, user_id, amount).await
    }

    async fn credit_top_up(
        &self,
        user_id: &UserId,
        amount: i64,
        payment_ref: &str,
    ) -> Result<Wallet> {
        let mut db = self.pool.begin().await?;

        let claimed = sqlx::query(
            "INSERT INTO payment_references (reference, user_id, amount) VALUES ($1, $2, $3) \
             ON CONFLICT (reference) DO NOTHING",
        )
        .bind(payment_ref)
        .bind(user_id.as_uuid())
        .bind(amount)
        .execute(&mut *db)
        .await?
        .rows_affected();
        if claimed == 0 {
            return Err(MarketError::DuplicatePayment {
                reference: payment_ref.to_string(),
            }
            .into());
        }

        let wallet = credit(&mut db, user_id, amount).await?;
        let entry = LedgerEntry::new(
            &wallet,
            amount,
            LedgerEntryType::TopUp,
            Some(payment_ref.to_string()),
            wallet.last_updated,
        );
        insert_entry(&mut db, &entry).await?;
        db.commit().await?;
        Ok(wallet)
    }

    async fn record_entry(&self, entry: &LedgerEntry) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        insert_entry(&mut conn, entry).await
    }

    async fn list_ledger(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>> {
        sqlx::query_as::<_, LedgerRow>(
            "SELECT entry_id, wallet_id, user_id, amount, entry_type, reference, created_at \
             FROM ledger_entries WHERE user_id = $1 \
             ORDER BY created_at DESC, seq DESC LIMIT $2 OFFSET $3",
        )
        .bind(user_id.as_uuid())
        .bind(to_i64(limit))
        .bind(to_i64(offset))
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(LedgerEntry::try_from)
        .collect()
    }

    // =========================================================================
    // Transaction Operations
    // =========================================================================

    async fn create_reservation(&self, transaction: &Transaction) -> Result<Transaction> {
        let reservation = transaction.reservation();
        let requester = reservation.requester_id;
        let mut db = self.pool.begin().await?;

        // The wallet row lock serializes creates per requester.
        ensure_wallet(&mut db, &requester).await?;
        let wallet = fetch_wallet(&mut db, &requester, true)
            .await?
            .ok_or_else(|| MarketError::not_found("wallet", requester))?;

        let (table, _) = table(transaction.kind());
        let sql = format!(
            "SELECT EXISTS (SELECT 1 FROM {table} WHERE user_id = $1 AND book_id = $2 \
             AND status = 'pending')"
        );
        let duplicate = sqlx::query_scalar::<_, bool>(&sql)
            .bind(requester.as_uuid())
            .bind(reservation.book_id.as_uuid())
            .fetch_one(&mut *db)
            .await?;
        if duplicate {
            return Err(MarketError::DuplicateReservation {
                book_id: reservation.book_id.to_string(),
            }
            .into());
        }

        if !wallet.can_reserve(reservation.total_cost) {
            return Err(MarketError::InsufficientFunds {
                available: wallet.available(),
                required: reservation.total_cost,
            }
            .into());
        }

        insert_transaction(&mut db, transaction).await?;
        sqlx::query(
            "UPDATE readits_wallets SET reserved_amount = reserved_amount + $2, \
             last_updated = now() WHERE user_id = $1",
        )
        .bind(requester.as_uuid())
        .bind(reservation.total_cost)
        .execute(&mut *db)
        .await?;

        db.commit().await?;
        Ok(transaction.clone())
    }

    async fn get_transaction(&self, tx_ref: &TransactionRef) -> Result<Option<Transaction>> {
        let mut conn = self.pool.acquire().await?;
        fetch_transaction(&mut conn, tx_ref, false).await
    }

    async fn list_by_status(
        &self,
        kind: TransactionKind,
        status: TransactionStatus,
    ) -> Result<Vec<Transaction>> {
        let mut conn = self.pool.acquire().await?;
        fetch_where(&mut conn, kind, Filter::Status(status)).await
    }

    async fn list_for_user(
        &self,
        user_id: &UserId,
        kind: TransactionKind,
    ) -> Result<Vec<Transaction>> {
        let mut conn = self.pool.acquire().await?;
        fetch_where(&mut conn, kind, Filter::Party(*user_id.as_uuid())).await
    }

    async fn approve(
        &self,
        tx_ref: &TransactionRef,
        actor: &UserId,
        meetup_time: NaiveTime,
        policy: EscrowPolicy,
    ) -> Result<Approval> {
        let mut db = self.pool.begin().await?;
        let mut tx = lock_transaction(&mut db, tx_ref).await?;
        // Serializes approvals competing for the same book.
        lock_book(&mut db, &tx.reservation().book_id).await?;

        lifecycle::approve(&mut tx, *actor, meetup_time)?;
        if book_committed_elsewhere(&mut db, &tx).await? {
            return Err(MarketError::Conflict(
                "book is already committed to another transaction".into(),
            )
            .into());
        }

        let capture = Capture::plan(&tx, policy);
        let payer_wallet = deduct(&mut db, &capture.payer, capture.amount).await?;
        let payee_wallet = credit(&mut db, &capture.payee, capture.payout).await?;
        let now = Utc::now();
        let debit = LedgerEntry::new(
            &payer_wallet,
            capture.amount,
            capture.debit_type,
            Some(capture.reference.clone()),
            now,
        );
        let earning = LedgerEntry::new(
            &payee_wallet,
            capture.payout,
            capture.credit_type,
            Some(capture.reference.clone()),
            now,
        );
        insert_entry(&mut db, &debit).await?;
        insert_entry(&mut db, &earning).await?;
        save_transaction(&mut db, &tx).await?;
        db.commit().await?;

        Ok(Approval {
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
        let mut db = self.pool.begin().await?;
        let tx = lock_transaction(&mut db, tx_ref).await?;
        lifecycle::check_withdrawal(&tx, withdrawal)?;

        let reservation = tx.reservation();
        let released = release(&mut db, &reservation.requester_id, reservation.total_cost)
            .await?
            .is_some();
        if !released {
            tracing::warn!(
                transaction = %tx_ref,
                user_id = %reservation.requester_id,
                amount = reservation.total_cost,
                "escrow release guard failed; deleting reservation anyway"
            );
        }
        delete_transaction(&mut db, tx_ref).await?;
        db.commit().await?;

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
        let mut db = self.pool.begin().await?;
        let mut tx = lock_transaction(&mut db, tx_ref).await?;
        let outcome = lifecycle::confirm_pickup(&mut tx, *actor, today)?;
        if outcome != ConfirmOutcome::AlreadyConfirmed {
            save_transaction(&mut db, &tx).await?;
        }
        db.commit().await?;
        Ok(Confirmation {
            transaction: tx,
            outcome,
        })
    }

    async fn confirm_return(&self, rental_id: &RentalId, actor: &UserId) -> Result<Confirmation> {
        let tx_ref = TransactionRef::Rental(*rental_id);
        let mut db = self.pool.begin().await?;
        let Transaction::Rental(mut rental) = lock_transaction(&mut db, &tx_ref).await? else {
            return Err(MarketError::not_found("rental", rental_id).into());
        };
        let outcome = lifecycle::confirm_return(&mut rental, *actor)?;
        let tx = Transaction::Rental(rental);
        if outcome != ConfirmOutcome::AlreadyConfirmed {
            save_transaction(&mut db, &tx).await?;
        }
        db.commit().await?;
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
        let mut db = self.pool.begin().await?;
        let Some(mut tx) = fetch_transaction(&mut db, tx_ref, true).await? else {
            return Ok(None);
        };
        if !lifecycle::begin_confirmation_window(&mut tx, phase, now) {
            return Ok(None);
        }
        save_transaction(&mut db, &tx).await?;
        db.commit().await?;
        Ok(Some(tx))
    }

    async fn decide_transfer(
        &self,
        purchase_id: &PurchaseId,
        actor: &UserId,
        transfer_ownership: bool,
    ) -> Result<TransferDecision> {
        let tx_ref = TransactionRef::Purchase(*purchase_id);
        let mut db = self.pool.begin().await?;
        let Transaction::Purchase(mut purchase) = lock_transaction(&mut db, &tx_ref).await? else {
            return Err(MarketError::not_found("purchase", purchase_id).into());
        };
        let mut book = lock_book(&mut db, &purchase.reservation.book_id).await?;

        lifecycle::decide_transfer(&mut purchase, *actor, transfer_ownership)?;
        if transfer_ownership {
            book.owner_id = purchase.reservation.requester_id;
        } else {
            book.is_soft_deleted = true;
        }

        sqlx::query("UPDATE books SET owner_id = $2, is_soft_deleted = $3 WHERE book_id = $1")
            .bind(book.book_id.as_uuid())
            .bind(book.owner_id.as_uuid())
            .bind(book.is_soft_deleted)
            .execute(&mut *db)
            .await?;
        save_transaction(&mut db, &Transaction::Purchase(purchase.clone())).await?;
        db.commit().await?;
        Ok(TransferDecision { purchase, book })
    }

    // =========================================================================
    // Ratings and Notifications
    // =========================================================================

    async fn submit_rating(&self, rating: &Rating, party: Party) -> Result<Transaction> {
        let mut db = self.pool.begin().await?;
        let mut tx = lock_transaction(&mut db, &rating.transaction).await?;
        lifecycle::mark_rated(&mut tx, party)?;

        let (rental_id, purchase_id) = match rating.transaction {
            TransactionRef::Rental(id) => (Some(*id.as_uuid()), None),
            TransactionRef::Purchase(id) => (None, Some(*id.as_uuid())),
        };
        let inserted = sqlx::query(
            "INSERT INTO ratings (rating_id, rater_id, rated_user_id, score, comment, rental_id, \
             purchase_id, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(rating.id.as_uuid())
        .bind(rating.rater_id.as_uuid())
        .bind(rating.rated_user_id.as_uuid())
        .bind(i16::from(rating.score))
        .bind(&rating.comment)
        .bind(rental_id)
        .bind(purchase_id)
        .bind(rating.created_at)
        .execute(&mut *db)
        .await;
        match inserted {
            Ok(_) => {}
            Err(err)
                if is_unique_violation(&err, "ratings_one_per_rental_rater")
                    || is_unique_violation(&err, "ratings_one_per_purchase_rater") =>
            {
                return Err(MarketError::AlreadyRated.into());
            }
            Err(err) => return Err(err.into()),
        }

        save_transaction(&mut db, &tx).await?;
        db.commit().await?;
        Ok(tx)
    }

    async fn insert_notification(&self, notification: &Notification) -> Result<()> {
        sqlx::query(
            "INSERT INTO notifications (notification_id, sender_id, receiver_id, \
             notification_type, header, message, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(notification.id.as_uuid())
        .bind(notification.sender_id.map(|id| *id.as_uuid()))
        .bind(notification.receiver_id.as_uuid())
        .bind(notification.kind.as_str())
        .bind(&notification.header)
        .bind(&notification.message)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_notifications(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Notification>> {
        sqlx::query_as::<_, NotificationRow>(
            "SELECT notification_id, sender_id, receiver_id, notification_type, header, message, \
             created_at FROM notifications WHERE receiver_id = $1 \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3",
        )
        .bind(user_id.as_uuid())
        .bind(to_i64(limit))
        .bind(to_i64(offset))
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Notification::try_from)
        .collect()
    }
}
