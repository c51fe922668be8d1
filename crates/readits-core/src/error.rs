//! Error types for marketplace rules.

use crate::ids::IdError;
use crate::transaction::TransactionStatus;

/// Result type for marketplace operations.
pub type Result<T> = std::result::Result<T, MarketError>;

/// Errors raised by the reservation, escrow and rating rules.
///
/// Every variant is a recoverable, caller-facing outcome. Infrastructure failures live in
/// the storage layer's error type instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarketError {
    /// Bad or missing input.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The actor is not entitled to perform the operation.
    #[error("not authorized: {0}")]
    Authorization(String),

    /// The transaction's current state does not permit the transition.
    #[error("cannot {action} while {status}")]
    InvalidState {
        /// The attempted action.
        action: &'static str,
        /// The status the record was in.
        status: TransactionStatus,
    },

    /// A precondition on related records does not hold (e.g. the book is already committed).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Unknown book, transaction, wallet or user.
    #[error("{entity} not found: {id}")]
    EntityNotFound {
        /// Kind of entity.
        entity: &'static str,
        /// The id that did not resolve.
        id: String,
    },

    /// A wallet guard failed.
    #[error("insufficient funds: available={available}, required={required}")]
    InsufficientFunds {
        /// Amount the guard could draw on.
        available: i64,
        /// Amount the operation needed.
        required: i64,
    },

    /// The rater already rated this transaction.
    #[error("already rated this transaction")]
    AlreadyRated,

    /// The requester already holds a pending reservation for this book.
    #[error("a pending reservation already exists for book {book_id}")]
    DuplicateReservation {
        /// The contested book.
        book_id: String,
    },

    /// The external payment reference was already credited.
    #[error("payment already processed: {reference}")]
    DuplicatePayment {
        /// The external payment reference.
        reference: String,
    },

    /// An identifier failed to parse.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),
}

impl MarketError {
    /// Shorthand for [`MarketError::EntityNotFound`].
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::EntityNotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Shorthand for [`MarketError::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Shorthand for [`MarketError::Authorization`].
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Authorization(message.into())
    }
}
