//! Rental and purchase records.
//!
//! Both kinds share a [`Reservation`] block that carries the escrow amount, the meetup,
//! the pickup confirmation pair and the rating flags. Rentals add a duration, the rent
//! period and a second confirmation pair for the return; purchases add the post-completion
//! ownership transfer decision.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MarketError, Result};
use crate::meetup::Meetup;
use crate::{BookId, PurchaseId, RentalId, UserId};

/// The two transaction kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Time-boxed loan of a book.
    Rental,
    /// Outright sale of a book.
    Purchase,
}

impl TransactionKind {
    /// Both kinds, in sweep order.
    pub const ALL: [Self; 2] = [Self::Rental, Self::Purchase];

    /// Stable string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rental => "rental",
            Self::Purchase => "purchase",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed reference to either kind of transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum TransactionRef {
    /// A rental.
    Rental(RentalId),
    /// A purchase.
    Purchase(PurchaseId),
}

impl TransactionRef {
    /// Kind of the referenced transaction.
    #[must_use]
    pub const fn kind(&self) -> TransactionKind {
        match self {
            Self::Rental(_) => TransactionKind::Rental,
            Self::Purchase(_) => TransactionKind::Purchase,
        }
    }

    /// The raw UUID, whatever the kind.
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        match self {
            Self::Rental(id) => id.as_uuid(),
            Self::Purchase(id) => id.as_uuid(),
        }
    }
}

impl fmt::Display for TransactionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.as_uuid())
    }
}

/// Lifecycle status shared by rentals and purchases.
///
/// `Ongoing` and `AwaitingReturnConfirmation` are only reachable by rentals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Reserved, waiting for the owner.
    Pending,
    /// Approved and paid, waiting for the meetup.
    Approved,
    /// Meetup is near; both parties confirm the handover.
    AwaitingPickupConfirmation,
    /// Book is with the renter.
    Ongoing,
    /// Rent period is ending; both parties confirm the return.
    AwaitingReturnConfirmation,
    /// Terminal.
    Completed,
}

impl TransactionStatus {
    /// Stable string form, as stored.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::AwaitingPickupConfirmation => "awaiting_pickup_confirmation",
            Self::Ongoing => "ongoing",
            Self::AwaitingReturnConfirmation => "awaiting_return_confirmation",
            Self::Completed => "completed",
        }
    }

    /// Whether the book is committed to this transaction (approved but not yet completed).
    #[must_use]
    pub const fn commits_book(self) -> bool {
        matches!(
            self,
            Self::Approved
                | Self::AwaitingPickupConfirmation
                | Self::Ongoing
                | Self::AwaitingReturnConfirmation
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "awaiting_pickup_confirmation" => Ok(Self::AwaitingPickupConfirmation),
            "ongoing" => Ok(Self::Ongoing),
            "awaiting_return_confirmation" => Ok(Self::AwaitingReturnConfirmation),
            "completed" => Ok(Self::Completed),
            other => Err(format!("unknown transaction status: {other}")),
        }
    }
}

/// Which side of a transaction an actor is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Party {
    /// Renter or buyer.
    Requester,
    /// Book owner at creation time.
    Owner,
}

impl Party {
    /// The other side.
    #[must_use]
    pub const fn counterpart(self) -> Self {
        match self {
            Self::Requester => Self::Owner,
            Self::Owner => Self::Requester,
        }
    }
}

/// Two independent confirmation flags for one handover phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationPair {
    /// Renter or buyer confirmed.
    pub user_confirmed: bool,
    /// Owner confirmed.
    pub owner_confirmed: bool,
}

impl ConfirmationPair {
    /// Whether `party` has confirmed.
    #[must_use]
    pub const fn is_confirmed(&self, party: Party) -> bool {
        match party {
            Party::Requester => self.user_confirmed,
            Party::Owner => self.owner_confirmed,
        }
    }

    /// Set `party`'s flag. Returns `false` if it was already set.
    pub fn confirm(&mut self, party: Party) -> bool {
        let flag = match party {
            Party::Requester => &mut self.user_confirmed,
            Party::Owner => &mut self.owner_confirmed,
        };
        let changed = !*flag;
        *flag = true;
        changed
    }

    /// Both sides confirmed.
    #[must_use]
    pub const fn both(&self) -> bool {
        self.user_confirmed && self.owner_confirmed
    }
}

/// Fields shared by rentals and purchases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    /// Renter or buyer.
    pub requester_id: UserId,
    /// Owner of the book when the reservation was made.
    pub original_owner_id: UserId,
    /// The book.
    pub book_id: BookId,
    /// Lifecycle status.
    pub status: TransactionStatus,
    /// Creation time.
    pub reserved_at: DateTime<Utc>,
    /// Pending reservations past this instant are expired by the janitor.
    pub reservation_expires_at: DateTime<Utc>,
    /// Escrowed readits.
    pub total_cost: i64,
    /// Handover details.
    pub meetup: Meetup,
    /// Set once escrow has been captured at approval.
    pub all_fees_captured: bool,
    /// Pickup confirmations.
    pub pickup: ConfirmationPair,
    /// When the pickup confirmation window opened.
    pub pickup_confirmation_started_at: Option<DateTime<Utc>>,
    /// Requester has rated the owner.
    pub user_rated: bool,
    /// Owner has rated the requester.
    pub owner_rated: bool,
}

impl Reservation {
    /// A fresh `pending` reservation expiring `ttl` after `now`.
    #[must_use]
    pub fn pending(
        requester_id: UserId,
        original_owner_id: UserId,
        book_id: BookId,
        total_cost: i64,
        meetup: Meetup,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Self {
        Self {
            requester_id,
            original_owner_id,
            book_id,
            status: TransactionStatus::Pending,
            reserved_at: now,
            reservation_expires_at: now + ttl,
            total_cost,
            meetup,
            all_fees_captured: false,
            pickup: ConfirmationPair::default(),
            pickup_confirmation_started_at: None,
            user_rated: false,
            owner_rated: false,
        }
    }

    /// Resolve `actor` to a side of this transaction.
    ///
    /// # Errors
    ///
    /// Returns an authorization error if `actor` is neither the requester nor the owner.
    pub fn party_of(&self, actor: UserId) -> Result<Party> {
        if actor == self.requester_id {
            Ok(Party::Requester)
        } else if actor == self.original_owner_id {
            Ok(Party::Owner)
        } else {
            Err(MarketError::unauthorized(
                "not a party to this transaction",
            ))
        }
    }

    /// The user on `party`'s side.
    #[must_use]
    pub const fn user(&self, party: Party) -> UserId {
        match party {
            Party::Requester => self.requester_id,
            Party::Owner => self.original_owner_id,
        }
    }

    /// Whether `party` has already rated.
    #[must_use]
    pub const fn has_rated(&self, party: Party) -> bool {
        match party {
            Party::Requester => self.user_rated,
            Party::Owner => self.owner_rated,
        }
    }
}

/// Longest rental a requester may ask for, in days.
pub const MAX_RENTAL_DURATION_DAYS: u32 = 365;

/// A rental record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rental {
    /// Rental id.
    pub id: RentalId,
    /// Shared reservation fields.
    pub reservation: Reservation,
    /// Requested length of the loan.
    pub rental_duration_days: u32,
    /// Stamped when both parties confirm pickup.
    pub rent_start_date: Option<NaiveDate>,
    /// `rent_start_date + rental_duration_days`.
    pub rent_end_date: Option<NaiveDate>,
    /// Daily rate at creation.
    pub actual_rate: i64,
    /// Security deposit at creation.
    pub actual_deposit: i64,
    /// Return confirmations.
    pub return_confirmation: ConfirmationPair,
    /// When the return confirmation window opened.
    pub return_confirmation_started_at: Option<DateTime<Utc>>,
}

impl Rental {
    /// A new rental snapshotting the book's rate and deposit.
    #[must_use]
    pub fn new(reservation: Reservation, rental_duration_days: u32, actual_rate: i64, actual_deposit: i64) -> Self {
        Self {
            id: RentalId::generate(),
            reservation,
            rental_duration_days,
            rent_start_date: None,
            rent_end_date: None,
            actual_rate,
            actual_deposit,
            return_confirmation: ConfirmationPair::default(),
            return_confirmation_started_at: None,
        }
    }
}

/// A purchase record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Purchase {
    /// Purchase id.
    pub id: PurchaseId,
    /// Shared reservation fields.
    pub reservation: Reservation,
    /// Set on completion until the buyer decides on the transfer.
    pub transfer_decision_pending: bool,
    /// The buyer's decision, once made.
    pub ownership_transferred: Option<bool>,
}

impl Purchase {
    /// A new purchase.
    #[must_use]
    pub fn new(reservation: Reservation) -> Self {
        Self {
            id: PurchaseId::generate(),
            reservation,
            transfer_decision_pending: false,
            ownership_transferred: None,
        }
    }
}

/// A rental or a purchase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transaction {
    /// A rental.
    Rental(Rental),
    /// A purchase.
    Purchase(Purchase),
}

impl Transaction {
    /// Typed reference to this record.
    #[must_use]
    pub const fn reference(&self) -> TransactionRef {
        match self {
            Self::Rental(r) => TransactionRef::Rental(r.id),
            Self::Purchase(p) => TransactionRef::Purchase(p.id),
        }
    }

    /// Kind of this record.
    #[must_use]
    pub const fn kind(&self) -> TransactionKind {
        match self {
            Self::Rental(_) => TransactionKind::Rental,
            Self::Purchase(_) => TransactionKind::Purchase,
        }
    }

    /// Shared reservation fields.
    #[must_use]
    pub const fn reservation(&self) -> &Reservation {
        match self {
            Self::Rental(r) => &r.reservation,
            Self::Purchase(p) => &p.reservation,
        }
    }

    /// Shared reservation fields, mutably.
    pub fn reservation_mut(&mut self) -> &mut Reservation {
        match self {
            Self::Rental(r) => &mut r.reservation,
            Self::Purchase(p) => &mut p.reservation,
        }
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> TransactionStatus {
        self.reservation().status
    }
}
