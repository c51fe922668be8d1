//! Core types and rules for the readits book marketplace.
//!
//! This crate holds everything the escrow engine decides without touching storage:
//!
//! - **Identifiers**: `UserId`, `BookId`, `RentalId`, `PurchaseId`, `WalletId`, `LedgerEntryId`
//! - **Wallets**: `Wallet`, `LedgerEntry`, `LedgerEntryType`
//! - **Transactions**: `Rental`, `Purchase`, `Transaction`, `TransactionStatus`
//! - **Lifecycle**: approval, withdrawal, two-party confirmations, transfer decisions
//! - **Ratings**: `Rating`, `Perspective` and the credibility-weighted trust formula
//! - **Top-ups**: pack pricing and external id parsing
//!
//! # Readits
//!
//! Readits are the marketplace's internal credit, stored as `i64`. A reservation earmarks
//! readits in the requester's wallet; approval captures them and pays the owner.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod book;
pub mod clock;
pub mod error;
pub mod escrow;
pub mod ids;
pub mod lifecycle;
pub mod meetup;
pub mod notification;
pub mod rating;
pub mod topup;
pub mod transaction;
pub mod wallet;

pub use book::{
    Book, BookAvailability, User, DEFAULT_TRUST_SCORE, MAX_TRUST_SCORE, MIN_TRUST_SCORE,
};
pub use clock::{Clock, SystemClock};
pub use error::{MarketError, Result};
pub use escrow::{Capture, EscrowPolicy};
pub use ids::{
    BookId, IdError, LedgerEntryId, NotificationId, PurchaseId, RatingId, RentalId, UserId,
    WalletId,
};
pub use lifecycle::{ConfirmOutcome, Phase, Withdrawal};
pub use meetup::{Meetup, TimeWindow};
pub use notification::{Notification, NotificationKind};
pub use rating::{Perspective, Rating};
pub use transaction::{
    ConfirmationPair, Party, Purchase, Rental, Reservation, Transaction, TransactionKind,
    TransactionRef, TransactionStatus, MAX_RENTAL_DURATION_DAYS,
};
pub use wallet::{LedgerEntry, LedgerEntryType, Wallet};
