//! Transaction state machine.
//!
//! ```text
//! pending ─approve─▶ approved ─window─▶ awaiting_pickup_confirmation ─both─▶ ongoing (rental)
//!    │                                                                  └──▶ completed (purchase)
//!    └─reject/cancel/expire─▶ (deleted)
//! ongoing ─window─▶ awaiting_return_confirmation ─both─▶ completed
//! ```
//!
//! Every function here mutates a record in memory and nothing else. Stores run them while
//! holding the row, so a check and the write that follows it are one atomic step.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MarketError, Result};
use crate::meetup::TimeWindow;
use crate::transaction::{Party, Purchase, Rental, Transaction, TransactionStatus};
use crate::UserId;

/// The ways a pending reservation can be withdrawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Withdrawal {
    /// Owner declines.
    Reject {
        /// Acting user.
        actor: UserId,
        /// Optional reason passed on to the requester.
        reason: Option<String>,
    },
    /// Requester backs out.
    Cancel {
        /// Acting user.
        actor: UserId,
    },
    /// Janitor expiry.
    Expire {
        /// Sweep time.
        now: DateTime<Utc>,
    },
}

impl Withdrawal {
    /// Verb used in errors and logs.
    #[must_use]
    pub const fn action(&self) -> &'static str {
        match self {
            Self::Reject { .. } => "reject",
            Self::Cancel { .. } => "cancel",
            Self::Expire { .. } => "expire",
        }
    }
}

/// Which two-party handover a confirmation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Book goes from owner to requester.
    Pickup,
    /// Book comes back to the owner (rentals).
    Return,
}

/// Result of a confirm call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmOutcome {
    /// The caller had already confirmed; nothing changed.
    AlreadyConfirmed,
    /// The caller's flag is set; waiting for the other side.
    Partial,
    /// Both sides confirmed and the status advanced.
    Complete,
}

/// Approve a pending reservation at `meetup_time`.
///
/// # Errors
///
/// - `Authorization` unless `actor` is the owner.
/// - `InvalidState` unless the record is `pending`.
/// - `Validation` if `meetup_time` falls outside the requested window.
pub fn approve(tx: &mut Transaction, actor: UserId, meetup_time: NaiveTime) -> Result<()> {
    let reservation = tx.reservation();
    if reservation.party_of(actor)? != Party::Owner {
        return Err(MarketError::unauthorized("only the book owner can approve"));
    }
    if reservation.status != TransactionStatus::Pending {
        return Err(MarketError::InvalidState {
            action: "approve",
            status: reservation.status,
        });
    }
    if !reservation.meetup.time_window.trim().is_empty() {
        let window = TimeWindow::parse(&reservation.meetup.time_window)?;
        if !window.contains(meetup_time) {
            return Err(MarketError::validation(format!(
                "meetup time must be between {}",
                reservation.meetup.time_window
            )));
        }
    }

    let reservation = tx.reservation_mut();
    reservation.status = TransactionStatus::Approved;
    reservation.meetup.time = Some(meetup_time);
    reservation.all_fees_captured = true;
    Ok(())
}

/// Check that `withdrawal` may delete this reservation.
///
/// # Errors
///
/// - `Authorization` if a reject is not by the owner or a cancel not by the requester.
/// - `InvalidState` unless the record is `pending`.
/// - `Conflict` if an expiry runs before `reservation_expires_at`.
pub fn check_withdrawal(tx: &Transaction, withdrawal: &Withdrawal) -> Result<()> {
    let reservation = tx.reservation();
    match withdrawal {
        Withdrawal::Reject { actor, .. } => {
            if reservation.party_of(*actor)? != Party::Owner {
                return Err(MarketError::unauthorized("only the book owner can reject"));
            }
        }
        Withdrawal::Cancel { actor } => {
            if reservation.party_of(*actor)? != Party::Requester {
                return Err(MarketError::unauthorized("only the requester can cancel"));
            }
        }
        Withdrawal::Expire { .. } => {}
    }

    if reservation.status != TransactionStatus::Pending {
        return Err(MarketError::InvalidState {
            action: withdrawal.action(),
            status: reservation.status,
        });
    }

    if let Withdrawal::Expire { now } = withdrawal {
        if reservation.reservation_expires_at > *now {
            return Err(MarketError::Conflict(
                "reservation has not expired yet".to_string(),
            ));
        }
    }
    Ok(())
}

/// Record `actor`'s pickup confirmation.
///
/// Replays are no-ops. When both sides have confirmed, a rental becomes `ongoing` with its
/// rent period starting `today`; a purchase becomes `completed` with a transfer decision
/// pending.
///
/// # Errors
///
/// - `Authorization` if `actor` is not a party.
/// - `InvalidState` unless the record is `approved` or `awaiting_pickup_confirmation`.
/// - `Validation` if the rent period would end past the last representable date.
pub fn confirm_pickup(tx: &mut Transaction, actor: UserId, today: NaiveDate) -> Result<ConfirmOutcome> {
    let party = tx.reservation().party_of(actor)?;
    if tx.reservation().pickup.is_confirmed(party) {
        return Ok(ConfirmOutcome::AlreadyConfirmed);
    }

    let status = tx.status();
    if !matches!(
        status,
        TransactionStatus::Approved | TransactionStatus::AwaitingPickupConfirmation
    ) {
        return Err(MarketError::InvalidState {
            action: "confirm pickup",
            status,
        });
    }

    tx.reservation_mut().pickup.confirm(party);
    if !tx.reservation().pickup.both() {
        return Ok(ConfirmOutcome::Partial);
    }

    match tx {
        Transaction::Rental(rental) => start_rent_period(rental, today)?,
        Transaction::Purchase(purchase) => {
            purchase.reservation.status = TransactionStatus::Completed;
            purchase.transfer_decision_pending = true;
        }
    }
    Ok(ConfirmOutcome::Complete)
}

fn start_rent_period(rental: &mut Rental, today: NaiveDate) -> Result<()> {
    let end = today
        .checked_add_days(chrono::Days::new(u64::from(rental.rental_duration_days)))
        .ok_or_else(|| {
            MarketError::validation(format!(
                "rental of {} days runs past the supported calendar",
                rental.rental_duration_days
            ))
        })?;
    rental.reservation.status = TransactionStatus::Ongoing;
    rental.rent_start_date = Some(today);
    rental.rent_end_date = Some(end);
    Ok(())
}

/// Record `actor`'s return confirmation on a rental.
///
/// Accepted from `ongoing` as well as `awaiting_return_confirmation`, so an early
/// confirmation racing the janitor still lands. Both sides confirmed completes the rental.
///
/// # Errors
///
/// - `Authorization` if `actor` is not a party.
/// - `InvalidState` unless the rental is `ongoing` or `awaiting_return_confirmation`.
pub fn confirm_return(rental: &mut Rental, actor: UserId) -> Result<ConfirmOutcome> {
    let party = rental.reservation.party_of(actor)?;
    if rental.return_confirmation.is_confirmed(party) {
        return Ok(ConfirmOutcome::AlreadyConfirmed);
    }

    let status = rental.reservation.status;
    if !matches!(
        status,
        TransactionStatus::Ongoing | TransactionStatus::AwaitingReturnConfirmation
    ) {
        return Err(MarketError::InvalidState {
            action: "confirm return",
            status,
        });
    }

    rental.return_confirmation.confirm(party);
    if !rental.return_confirmation.both() {
        return Ok(ConfirmOutcome::Partial);
    }
    rental.reservation.status = TransactionStatus::Completed;
    Ok(ConfirmOutcome::Complete)
}

/// Open the confirmation window for `phase`, stamping its start time.
///
/// Returns `false` without changes when the record is not in the status the window opens
/// from (`approved` for pickup, `ongoing` for return), so a sweep racing a manual
/// confirmation never moves a record twice.
pub fn begin_confirmation_window(tx: &mut Transaction, phase: Phase, now: DateTime<Utc>) -> bool {
    match phase {
        Phase::Pickup => {
            let reservation = tx.reservation_mut();
            if reservation.status != TransactionStatus::Approved {
                return false;
            }
            reservation.status = TransactionStatus::AwaitingPickupConfirmation;
            reservation.pickup_confirmation_started_at = Some(now);
            true
        }
        Phase::Return => {
            let Transaction::Rental(rental) = tx else {
                return false;
            };
            if rental.reservation.status != TransactionStatus::Ongoing {
                return false;
            }
            rental.reservation.status = TransactionStatus::AwaitingReturnConfirmation;
            rental.return_confirmation_started_at = Some(now);
            true
        }
    }
}

/// Record the buyer's decision on a completed purchase.
///
/// # Errors
///
/// - `Authorization` unless `actor` is the buyer.
/// - `InvalidState` unless the purchase is `completed` with a decision pending.
pub fn decide_transfer(purchase: &mut Purchase, actor: UserId, transfer_ownership: bool) -> Result<()> {
    if purchase.reservation.party_of(actor)? != Party::Requester {
        return Err(MarketError::unauthorized(
            "only the buyer can decide on the ownership transfer",
        ));
    }
    let status = purchase.reservation.status;
    if status != TransactionStatus::Completed || !purchase.transfer_decision_pending {
        return Err(MarketError::InvalidState {
            action: "decide on ownership transfer",
            status,
        });
    }
    purchase.transfer_decision_pending = false;
    purchase.ownership_transferred = Some(transfer_ownership);
    Ok(())
}

/// Set `party`'s rated flag.
///
/// # Errors
///
/// - `InvalidState` unless the record is `completed`.
/// - `AlreadyRated` if the flag is already set.
pub fn mark_rated(tx: &mut Transaction, party: Party) -> Result<()> {
    let status = tx.status();
    if status != TransactionStatus::Completed {
        return Err(MarketError::InvalidState {
            action: "rate",
            status,
        });
    }
    let reservation = tx.reservation_mut();
    let flag = match party {
        Party::Requester => &mut reservation.user_rated,
        Party::Owner => &mut reservation.owner_rated,
    };
    if *flag {
        return Err(MarketError::AlreadyRated);
    }
    *flag = true;
    Ok(())
}
