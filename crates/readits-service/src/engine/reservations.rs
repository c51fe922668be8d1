//! Reservation factory: validates a request and creates the `pending` record.

use std::sync::Arc;

use chrono::{FixedOffset, NaiveDate};
use serde::Deserialize;

use readits_core::{
    BookId, Clock, MarketError, Meetup, Party, Purchase, Rental, Reservation, TimeWindow,
    Transaction, TransactionKind, UserId, MAX_RENTAL_DURATION_DAYS,
};
use readits_store::{Result, Store};

use super::messages::{Event, Subject};
use super::notify::Notifier;

/// What a requester asks for. Every field is optional on the wire so that a missing one
/// surfaces as a validation error naming it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReservationTerms {
    /// Book to reserve.
    pub book_id: Option<BookId>,
    /// Local meetup date.
    pub meetup_date: Option<NaiveDate>,
    /// Preferred window, e.g. `"10:00 AM - 1:00 PM"`.
    pub meetup_time_window: Option<String>,
    /// Where to meet.
    pub meetup_location: Option<String>,
    /// Rentals only.
    pub latitude: Option<f64>,
    /// Rentals only.
    pub longitude: Option<f64>,
    /// Rentals only; at least 1.
    pub rental_duration_days: Option<u32>,
}

/// Creates rentals and purchases in `pending`, reserving their cost.
#[derive(Clone)]
pub struct ReservationFactory {
    store: Arc<dyn Store>,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
    ttl: chrono::Duration,
    local_offset: FixedOffset,
}

impl ReservationFactory {
    /// Create a factory whose reservations expire `ttl` after creation.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        notifier: Notifier,
        clock: Arc<dyn Clock>,
        ttl: chrono::Duration,
        local_offset: FixedOffset,
    ) -> Self {
        Self {
            store,
            notifier,
            clock,
            ttl,
            local_offset,
        }
    }

    /// Validate `terms` and create a `pending` transaction of `kind` for `requester`.
    ///
    /// # Errors
    ///
    /// - `Validation` for missing or malformed terms, a past meetup date, a zero duration
    ///   or a book not listed for `kind`.
    /// - `EntityNotFound` if the book does not exist, is retired, or belongs to the
    ///   requester.
    /// - `DuplicateReservation` if the requester already has one pending for the book.
    /// - `InsufficientFunds` if the unreserved balance does not cover the cost.
    pub async fn create(
        &self,
        requester: UserId,
        kind: TransactionKind,
        terms: ReservationTerms,
    ) -> Result<Transaction> {
        let days = terms.rental_duration_days.unwrap_or_default();
        let (book_id, meetup) = self.validate_terms(kind, terms)?;

        let book = self
            .store
            .get_book(&book_id)
            .await?
            .filter(|book| !book.is_soft_deleted && book.owner_id != requester)
            .ok_or_else(|| MarketError::not_found("book", book_id))?;
        if !book.availability.allows(kind) {
            return Err(MarketError::validation(format!(
                "'{}' is not listed for {kind}",
                book.title
            ))
            .into());
        }

        let now = self.clock.now();
        let transaction = match kind {
            TransactionKind::Rental => {
                let reservation = Reservation::pending(
                    requester,
                    book.owner_id,
                    book.book_id,
                    book.rental_cost(days),
                    meetup,
                    now,
                    self.ttl,
                );
                Transaction::Rental(Rental::new(
                    reservation,
                    days,
                    book.daily_rent_price,
                    book.security_deposit,
                ))
            }
            TransactionKind::Purchase => {
                let reservation = Reservation::pending(
                    requester,
                    book.owner_id,
                    book.book_id,
                    book.purchase_price,
                    meetup,
                    now,
                    self.ttl,
                );
                Transaction::Purchase(Purchase::new(reservation))
            }
        };

        let created = self.store.create_reservation(&transaction).await?;
        tracing::info!(
            transaction = %created.reference(),
            user_id = %requester,
            book_id = %book_id,
            total_cost = created.reservation().total_cost,
            "reservation created"
        );

        Subject::load(self.store.as_ref(), &created)
            .await
            .notify(&self.notifier, Party::Requester, &Event::Requested);
        Ok(created)
    }

    fn validate_terms(
        &self,
        kind: TransactionKind,
        terms: ReservationTerms,
    ) -> Result<(BookId, Meetup)> {
        let mut missing = Vec::new();
        if terms.book_id.is_none() {
            missing.push("book_id");
        }
        if terms.meetup_date.is_none() {
            missing.push("meetup_date");
        }
        if blank(terms.meetup_time_window.as_deref()) {
            missing.push("meetup_time_window");
        }
        if blank(terms.meetup_location.as_deref()) {
            missing.push("meetup_location");
        }
        if kind == TransactionKind::Rental && terms.rental_duration_days.is_none() {
            missing.push("rental_duration_days");
        }
        let (Some(book_id), Some(date), Some(time_window), Some(location), true) = (
            terms.book_id,
            terms.meetup_date,
            terms.meetup_time_window,
            terms.meetup_location,
            missing.is_empty(),
        ) else {
            return Err(MarketError::validation(format!(
                "missing required fields: {}",
                missing.join(", ")
            ))
            .into());
        };

        if let Some(days) = terms.rental_duration_days {
            if !(1..=MAX_RENTAL_DURATION_DAYS).contains(&days) {
                return Err(MarketError::validation(format!(
                    "rental_duration_days must be between 1 and {MAX_RENTAL_DURATION_DAYS}"
                ))
                .into());
            }
        }
        TimeWindow::parse(&time_window)?;
        let today = self.clock.now().with_timezone(&self.local_offset).date_naive();
        if date < today {
            return Err(MarketError::validation("meetup_date is in the past").into());
        }

        let (latitude, longitude) = match kind {
            TransactionKind::Rental => (terms.latitude, terms.longitude),
            TransactionKind::Purchase => (None, None),
        };
        Ok((
            book_id,
            Meetup {
                date,
                time_window: time_window.trim().to_string(),
                time: None,
                location: location.trim().to_string(),
                latitude,
                longitude,
            },
        ))
    }
}

fn blank(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}
