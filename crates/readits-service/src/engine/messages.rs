//! Notification wording.

use readits_core::{
    Notification, NotificationKind, Party, Transaction, TransactionKind, TransactionRef, UserId,
};
use readits_store::Store;

use super::notify::Notifier;

/// Something that happened to a transaction and is worth telling a party about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A new reservation awaits the owner.
    Requested,
    /// The owner approved and fixed the meetup time.
    Approved {
        /// Meetup time as shown to users.
        meetup_time: String,
    },
    /// The owner declined.
    Rejected {
        /// Optional reason from the owner.
        reason: Option<String>,
    },
    /// The requester withdrew.
    Cancelled,
    /// Nobody approved in time.
    Expired,
    /// The pickup window is open.
    PickupReminder,
    /// One side confirmed the pickup.
    PickupConfirmed,
    /// Both sides confirmed the pickup.
    PickupCompleted,
    /// The return window is open.
    ReturnReminder,
    /// One side confirmed the return.
    ReturnConfirmed,
    /// Both sides confirmed the return.
    ReturnCompleted,
    /// The buyer decided what happens to the listing.
    TransferDecided {
        /// Whether the buyer took over the listing.
        transferred: bool,
    },
}

impl Event {
    fn render(&self, kind: TransactionKind, title: &str, sender: &str) -> (String, String) {
        let noun = match kind {
            TransactionKind::Rental => "Rental",
            TransactionKind::Purchase => "Purchase",
        };
        let verb = match kind {
            TransactionKind::Rental => "rent",
            TransactionKind::Purchase => "buy",
        };
        match self {
            Self::Requested => (
                format!("{noun} Request"),
                format!("{sender} wants to {verb} '{title}'. Review the request to accept or decline it."),
            ),
            Self::Approved { meetup_time } => (
                format!("{noun} Request Approved"),
                format!("{sender} approved your request for '{title}'. Meet at {meetup_time} on the agreed date."),
            ),
            Self::Rejected { reason } => (
                format!("{noun} Request Declined"),
                match reason {
                    Some(reason) => format!("{sender} declined your request for '{title}': {reason}. Your reserved readits were released."),
                    None => format!("{sender} declined your request for '{title}'. Your reserved readits were released."),
                },
            ),
            Self::Cancelled => (
                format!("{noun} Request Cancelled"),
                format!("{sender} cancelled their request for '{title}'."),
            ),
            Self::Expired => (
                format!("{noun} Request Expired"),
                format!("Your request for '{title}' from {sender} expired before it was approved. Your reserved readits were released."),
            ),
            Self::PickupReminder => (
                "Pickup Reminder".to_string(),
                format!("Your meetup with {sender} for '{title}' starts within the hour."),
            ),
            Self::PickupConfirmed => (
                "Confirm Book Pickup".to_string(),
                format!("{sender} confirmed the handover of '{title}'. Please confirm it too."),
            ),
            Self::PickupCompleted => match kind {
                TransactionKind::Rental => (
                    "Rental Started".to_string(),
                    format!("You and {sender} both confirmed the pickup of '{title}'. The rental period has started."),
                ),
                TransactionKind::Purchase => (
                    "Purchase Completed".to_string(),
                    format!("You and {sender} both confirmed the handover of '{title}'. The purchase is complete."),
                ),
            },
            Self::ReturnReminder => (
                "Return Reminder".to_string(),
                format!("The return of '{title}' with {sender} is due within the hour."),
            ),
            Self::ReturnConfirmed => (
                "Return Verification Needed".to_string(),
                format!("{sender} confirmed the return of '{title}'. Please confirm it too."),
            ),
            Self::ReturnCompleted => (
                "Rental Completed".to_string(),
                format!("You and {sender} both confirmed the return of '{title}'. You can now rate each other."),
            ),
            Self::TransferDecided { transferred: true } => (
                "Ownership Transferred".to_string(),
                format!("{sender} now lists '{title}' as their own."),
            ),
            Self::TransferDecided { transferred: false } => (
                "Listing Retired".to_string(),
                format!("{sender} chose not to relist '{title}'. The listing was retired."),
            ),
        }
    }
}

/// Names needed to word notifications about one transaction.
#[derive(Debug, Clone)]
pub struct Subject {
    kind: TransactionKind,
    reference: TransactionRef,
    title: String,
    requester: (UserId, String),
    owner: (UserId, String),
}

impl Subject {
    /// Look up the book title and both usernames. Missing records fall back to placeholders.
    pub async fn load(store: &dyn Store, tx: &Transaction) -> Self {
        let reservation = tx.reservation();
        let title = match store.get_book(&reservation.book_id).await {
            Ok(Some(book)) => book.title,
            Ok(None) => "a book".to_string(),
            Err(err) => {
                tracing::debug!(book_id = %reservation.book_id, error = %err, "book lookup failed");
                "a book".to_string()
            }
        };
        let requester = (
            reservation.requester_id,
            username(store, &reservation.requester_id).await,
        );
        let owner = (
            reservation.original_owner_id,
            username(store, &reservation.original_owner_id).await,
        );
        Self {
            kind: tx.kind(),
            reference: tx.reference(),
            title,
            requester,
            owner,
        }
    }

    fn party(&self, party: Party) -> &(UserId, String) {
        match party {
            Party::Requester => &self.requester,
            Party::Owner => &self.owner,
        }
    }

    /// Tell the counterpart of `from` about `event`.
    pub fn notify(&self, notifier: &Notifier, from: Party, event: &Event) {
        let (sender_id, sender_name) = self.party(from);
        let (receiver_id, _) = self.party(from.counterpart());
        let (header, message) = event.render(self.kind, &self.title, sender_name);
        tracing::debug!(transaction = %self.reference, ?event, "notifying");
        notifier.publish(Notification::new(
            Some(*sender_id),
            *receiver_id,
            NotificationKind::from(self.kind),
            header,
            message,
        ));
    }

    /// Tell both parties about `event`, each naming the other.
    pub fn notify_both(&self, notifier: &Notifier, event: &Event) {
        self.notify(notifier, Party::Requester, event);
        self.notify(notifier, Party::Owner, event);
    }
}

async fn username(store: &dyn Store, user_id: &UserId) -> String {
    match store.get_user(user_id).await {
        Ok(Some(user)) => user.username,
        Ok(None) => "A user".to_string(),
        Err(err) => {
            tracing::debug!(user_id = %user_id, error = %err, "username lookup failed");
            "A user".to_string()
        }
    }
}
