//! Post-completion ratings and the trust-score formula.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::book::{MAX_TRUST_SCORE, MIN_TRUST_SCORE};
use crate::error::{MarketError, Result};
use crate::transaction::{Party, Transaction, TransactionKind, TransactionRef};
use crate::{RatingId, UserId};

/// The rater's point of view, which fixes who rates whom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Perspective {
    /// Renter rates the owner.
    Rental,
    /// Owner rates the renter.
    Lending,
    /// Buyer rates the seller.
    Purchase,
    /// Seller rates the buyer.
    Sale,
}

impl Perspective {
    /// Transaction kind this perspective applies to.
    #[must_use]
    pub const fn kind(self) -> TransactionKind {
        match self {
            Self::Rental | Self::Lending => TransactionKind::Rental,
            Self::Purchase | Self::Sale => TransactionKind::Purchase,
        }
    }

    /// Side the rater is on.
    #[must_use]
    pub const fn rater(self) -> Party {
        match self {
            Self::Rental | Self::Purchase => Party::Requester,
            Self::Lending | Self::Sale => Party::Owner,
        }
    }

    /// The perspective of `party` in a transaction of `kind`.
    #[must_use]
    pub const fn of(kind: TransactionKind, party: Party) -> Self {
        match (kind, party) {
            (TransactionKind::Rental, Party::Requester) => Self::Rental,
            (TransactionKind::Rental, Party::Owner) => Self::Lending,
            (TransactionKind::Purchase, Party::Requester) => Self::Purchase,
            (TransactionKind::Purchase, Party::Owner) => Self::Sale,
        }
    }
}

/// An immutable rating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rating {
    /// Rating id.
    pub id: RatingId,
    /// Who rated.
    pub rater_id: UserId,
    /// Who was rated.
    pub rated_user_id: UserId,
    /// Stars, 1 to 5.
    pub score: u8,
    /// Optional free text.
    pub comment: Option<String>,
    /// The rated transaction.
    pub transaction: TransactionRef,
    /// When the rating was submitted.
    pub created_at: DateTime<Utc>,
}

impl Rating {
    /// Build a rating of `tx` by `rater` from `perspective`.
    ///
    /// # Errors
    ///
    /// - `Validation` if `score` is outside 1..=5 or `perspective` does not match the kind.
    /// - `Authorization` if `rater` is not on the side `perspective` names.
    pub fn new(
        tx: &Transaction,
        rater: UserId,
        perspective: Perspective,
        score: u8,
        comment: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Result<Self> {
        if !(1..=5).contains(&score) {
            return Err(MarketError::validation("score must be between 1 and 5"));
        }
        if perspective.kind() != tx.kind() {
            return Err(MarketError::validation(format!(
                "perspective {perspective:?} does not apply to a {}",
                tx.kind()
            )));
        }
        let reservation = tx.reservation();
        let party = reservation.party_of(rater)?;
        if party != perspective.rater() {
            return Err(MarketError::unauthorized(
                "rater does not match the rating perspective",
            ));
        }

        Ok(Self {
            id: RatingId::generate(),
            rater_id: rater,
            rated_user_id: reservation.user(party.counterpart()),
            score,
            comment: comment.filter(|c| !c.trim().is_empty()),
            transaction: tx.reference(),
            created_at,
        })
    }
}

/// Unweighted trust impact of a star score.
#[must_use]
pub const fn base_impact(score: u8) -> i32 {
    match score {
        5 => 15,
        4 => 10,
        2 => -10,
        1 => -30,
        _ => 0,
    }
}

/// Impact weighted by the rater's own credibility:
/// `base * (0.5 + rater_trust / 2000)`, truncated toward zero.
#[must_use]
pub fn trust_impact(score: u8, rater_trust: i32) -> i32 {
    let rater_trust = rater_trust.clamp(MIN_TRUST_SCORE, MAX_TRUST_SCORE);
    base_impact(score) * (1000 + rater_trust) / 2000
}

/// Apply `impact` to `current`, clamped to the valid range.
#[must_use]
pub fn adjusted_trust(current: i32, impact: i32) -> i32 {
    current.saturating_add(impact).clamp(MIN_TRUST_SCORE, MAX_TRUST_SCORE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_stars_from_a_600_rater_is_worth_12() {
        assert_eq!(trust_impact(5, 600), 12);
    }

    #[test]
    fn impact_truncates_toward_zero() {
        // -30 * 0.9995 = -29.985
        assert_eq!(trust_impact(1, 999), -29);
        // 10 * 0.5005 = 5.005
        assert_eq!(trust_impact(4, 1), 5);
        assert_eq!(trust_impact(3, 1000), 0);
        assert_eq!(trust_impact(5, 1000), 15);
        assert_eq!(trust_impact(5, 0), 7);
    }

    #[test]
    fn adjusted_trust_is_clamped() {
        assert_eq!(adjusted_trust(995, 15), 1000);
        assert_eq!(adjusted_trust(10, -30), 0);
        assert_eq!(adjusted_trust(500, 12), 512);
    }

    #[test]
    fn perspective_pairs_sides() {
        assert_eq!(Perspective::of(TransactionKind::Rental, Party::Owner), Perspective::Lending);
        assert_eq!(Perspective::Sale.rater(), Party::Owner);
        assert_eq!(Perspective::Purchase.kind(), TransactionKind::Purchase);
    }
}
