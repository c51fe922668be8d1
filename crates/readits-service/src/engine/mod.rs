//! The escrow engine: the components that sit between the HTTP layer and the store.

pub mod janitor;
pub mod lifecycle;
pub mod messages;
pub mod notify;
pub mod ratings;
pub mod reservations;
pub mod settlement;
pub mod wallet;

pub use janitor::{Janitor, SweepReport};
pub use lifecycle::TransactionStateMachine;
pub use notify::{Dispatcher, Notifier};
pub use ratings::{RatingReceipt, RatingService};
pub use reservations::{ReservationFactory, ReservationTerms};
pub use settlement::EscrowSettlement;
pub use wallet::{TopUp, WalletLedger};
