//! Books and users, as far as the escrow engine needs them.
//!
//! Listings and profiles are owned by other parts of the system. The engine reads their
//! price terms and trust scores and, for purchases, reassigns or retires the book.

use serde::{Deserialize, Serialize};

use crate::{BookId, TransactionKind, UserId};

/// Lowest possible trust score.
pub const MIN_TRUST_SCORE: i32 = 0;

/// Highest possible trust score.
pub const MAX_TRUST_SCORE: i32 = 1000;

/// Trust score of a newly registered user.
pub const DEFAULT_TRUST_SCORE: i32 = 500;

/// How a book is offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookAvailability {
    /// Rental only.
    Rent,
    /// Sale only.
    Purchase,
    /// Rental or sale.
    Both,
}

impl BookAvailability {
    /// Whether the listing accepts a transaction of `kind`.
    #[must_use]
    pub const fn allows(self, kind: TransactionKind) -> bool {
        matches!(
            (self, kind),
            (Self::Both, _)
                | (Self::Rent, TransactionKind::Rental)
                | (Self::Purchase, TransactionKind::Purchase)
        )
    }

    /// Stable string form, as stored.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rent => "rent",
            Self::Purchase => "purchase",
            Self::Both => "both",
        }
    }
}

impl std::str::FromStr for BookAvailability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rent" => Ok(Self::Rent),
            "purchase" => Ok(Self::Purchase),
            "both" => Ok(Self::Both),
            other => Err(format!("unknown availability: {other}")),
        }
    }
}

/// A listed book and its price terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    /// Book id.
    pub book_id: BookId,
    /// Current owner. Changes when a purchase transfers ownership.
    pub owner_id: UserId,
    /// Title, used in notification text.
    pub title: String,
    /// Rent, sale or both.
    pub availability: BookAvailability,
    /// Readits per rental day.
    pub daily_rent_price: i64,
    /// Refundable deposit captured with a rental.
    pub security_deposit: i64,
    /// Readits for an outright purchase.
    pub purchase_price: i64,
    /// Retired from circulation.
    pub is_soft_deleted: bool,
}

impl Book {
    /// Rental cost for `days`: rate times days plus the deposit.
    #[must_use]
    pub fn rental_cost(&self, days: u32) -> i64 {
        self.daily_rent_price * i64::from(days) + self.security_deposit
    }
}

/// A marketplace user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// User id.
    pub user_id: UserId,
    /// Display name.
    pub username: String,
    /// Reputation in `0..=1000`.
    pub trust_score: i32,
}

impl User {
    /// A new user with a neutral starting trust score.
    #[must_use]
    pub fn new(user_id: UserId, username: impl Into<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
            trust_score: DEFAULT_TRUST_SCORE,
        }
    }
}
