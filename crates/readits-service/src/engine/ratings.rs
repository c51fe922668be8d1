//! Ratings and trust adjustment.

use std::sync::Arc;

use serde::Serialize;

use readits_core::rating::trust_impact;
use readits_core::{
    Clock, MarketError, Perspective, Rating, TransactionRef, UserId, DEFAULT_TRUST_SCORE,
};
use readits_store::{Result, Store};

/// A stored rating and what it did to the rated user's trust score.
#[derive(Debug, Clone, Serialize)]
pub struct RatingReceipt {
    /// The stored rating.
    pub rating: Rating,
    /// Trust change applied to the rated user.
    pub trust_impact: i32,
    /// Rated user's new score, or `None` if the adjustment failed.
    pub rated_user_trust_score: Option<i32>,
}

/// Records ratings on completed transactions and adjusts trust scores.
#[derive(Clone)]
pub struct RatingService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl RatingService {
    /// Create the service.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Rate the counterpart of `rater` on a completed transaction.
    ///
    /// Without a `perspective` the rater's side of the transaction decides it. The trust
    /// update runs after the rating is stored; if it fails the rating stands and the
    /// failure is only logged.
    ///
    /// # Errors
    ///
    /// - `EntityNotFound` for an unknown transaction.
    /// - `Validation` for a score outside 1..=5 or a perspective of the wrong kind.
    /// - `Authorization` if `rater` is not on the perspective's side.
    /// - `InvalidState` unless the transaction is completed.
    /// - `AlreadyRated` on a second rating by the same side.
    pub async fn submit(
        &self,
        tx_ref: &TransactionRef,
        rater: &UserId,
        perspective: Option<Perspective>,
        score: u8,
        comment: Option<String>,
    ) -> Result<RatingReceipt> {
        let tx = self
            .store
            .get_transaction(tx_ref)
            .await?
            .ok_or_else(|| MarketError::not_found(tx_ref.kind().as_str(), tx_ref.as_uuid()))?;
        let perspective = match perspective {
            Some(perspective) => perspective,
            None => Perspective::of(tx.kind(), tx.reservation().party_of(*rater)?),
        };

        let rating = Rating::new(&tx, *rater, perspective, score, comment, self.clock.now())?;
        self.store.submit_rating(&rating, perspective.rater()).await?;
        tracing::info!(
            transaction = %tx_ref,
            rater_id = %rating.rater_id,
            rated_user_id = %rating.rated_user_id,
            score,
            "rating recorded"
        );

        let rater_trust = match self.store.get_user(rater).await {
            Ok(Some(user)) => user.trust_score,
            Ok(None) => DEFAULT_TRUST_SCORE,
            Err(err) => {
                tracing::error!(
                    user_id = %rater,
                    error = %err,
                    "trust lookup failed; rating kept without trust adjustment"
                );
                return Ok(RatingReceipt {
                    rating,
                    trust_impact: 0,
                    rated_user_trust_score: None,
                });
            }
        };
        let impact = trust_impact(score, rater_trust);
        let new_score = match self
            .store
            .adjust_trust_score(&rating.rated_user_id, impact)
            .await
        {
            Ok(score) => Some(score),
            Err(err) => {
                tracing::error!(
                    user_id = %rating.rated_user_id,
                    impact,
                    error = %err,
                    "trust score update failed; rating kept"
                );
                None
            }
        };

        Ok(RatingReceipt {
            rating,
            trust_impact: impact,
            rated_user_trust_score: new_score,
        })
    }
}
