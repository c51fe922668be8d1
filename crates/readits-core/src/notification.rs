//! Outbound notification requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{NotificationId, TransactionKind, UserId};

/// Category shown to the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// About a rental.
    Rent,
    /// About a purchase.
    Purchase,
    /// Anything else.
    System,
}

impl NotificationKind {
    /// Stable string form, as stored.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rent => "rent",
            Self::Purchase => "purchase",
            Self::System => "system",
        }
    }
}

impl From<TransactionKind> for NotificationKind {
    fn from(kind: TransactionKind) -> Self {
        match kind {
            TransactionKind::Rental => Self::Rent,
            TransactionKind::Purchase => Self::Purchase,
        }
    }
}

impl std::str::FromStr for NotificationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rent" => Ok(Self::Rent),
            "purchase" => Ok(Self::Purchase),
            "system" => Ok(Self::System),
            other => Err(format!("unknown notification kind: {other}")),
        }
    }
}

/// A fire-and-forget message from one user (or the system) to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Notification id.
    pub id: NotificationId,
    /// Originating user, if any.
    pub sender_id: Option<UserId>,
    /// Recipient.
    pub receiver_id: UserId,
    /// Category.
    pub kind: NotificationKind,
    /// Short title.
    pub header: String,
    /// Body text.
    pub message: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Build a notification stamped with the current time.
    #[must_use]
    pub fn new(
        sender_id: Option<UserId>,
        receiver_id: UserId,
        kind: NotificationKind,
        header: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: NotificationId::generate(),
            sender_id,
            receiver_id,
            kind,
            header: header.into(),
            message: message.into(),
            created_at: Utc::now(),
        }
    }
}
