//! Ratings and trust adjustment.

mod common;

use common::TestHarness;

use readits_core::{
    MarketError, Perspective, TransactionRef, UserId, DEFAULT_TRUST_SCORE, MAX_TRUST_SCORE,
};
use readits_store::{Store, StoreError};

/// A completed purchase: `(harness, seller, buyer, purchase)`.
async fn completed_purchase() -> (TestHarness, UserId, UserId, TransactionRef) {
    let h = TestHarness::new();
    let seller = h.user("ana", 0).await;
    let buyer = h.user("ben", 500).await;
    let book = h.book_for_sale(&seller, 100).await;
    let tx_ref = h.pending_purchase(buyer, book).await;
    h.approve(&tx_ref, &seller).await;
    h.hand_over(&tx_ref, &buyer, &seller).await;
    (h, seller, buyer, tx_ref)
}

async fn trust(h: &TestHarness, user_id: &UserId) -> i32 {
    h.store.get_user(user_id).await.unwrap().unwrap().trust_score
}

#[tokio::test]
async fn credible_buyer_lifts_seller_by_twelve() {
    let (h, seller, buyer, tx_ref) = completed_purchase().await;
    h.set_trust(&buyer, 600).await;

    let receipt = h
        .state
        .ratings
        .submit(&tx_ref, &buyer, Some(Perspective::Purchase), 5, Some("Smooth handover".into()))
        .await
        .unwrap();

    assert_eq!(receipt.trust_impact, 12);
    assert_eq!(receipt.rated_user_trust_score, Some(DEFAULT_TRUST_SCORE + 12));
    assert_eq!(receipt.rating.rated_user_id, seller);
    assert_eq!(trust(&h, &seller).await, DEFAULT_TRUST_SCORE + 12);

    let tx = h.transaction(&tx_ref).await.unwrap();
    assert!(tx.reservation().user_rated);
    assert!(!tx.reservation().owner_rated);
}

#[tokio::test]
async fn second_rating_by_the_same_side_is_rejected() {
    let (h, seller, buyer, tx_ref) = completed_purchase().await;

    h.state
        .ratings
        .submit(&tx_ref, &buyer, None, 4, None)
        .await
        .unwrap();
    let after_first = trust(&h, &seller).await;

    let err = h
        .state
        .ratings
        .submit(&tx_ref, &buyer, None, 5, None)
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::Domain(MarketError::AlreadyRated)));
    assert_eq!(trust(&h, &seller).await, after_first);
    assert_eq!(h.store.ratings().await.len(), 1);
}

#[tokio::test]
async fn both_sides_rate_independently() {
    let (h, seller, buyer, tx_ref) = completed_purchase().await;

    h.state
        .ratings
        .submit(&tx_ref, &buyer, None, 5, None)
        .await
        .unwrap();
    let receipt = h
        .state
        .ratings
        .submit(&tx_ref, &seller, None, 1, Some("Late".into()))
        .await
        .unwrap();

    // base -30 weighted by a 500 rater: -30 * 0.75
    assert_eq!(receipt.trust_impact, -22);
    assert_eq!(trust(&h, &buyer).await, DEFAULT_TRUST_SCORE - 22);

    let tx = h.transaction(&tx_ref).await.unwrap();
    assert!(tx.reservation().user_rated && tx.reservation().owner_rated);
}

#[tokio::test]
async fn trust_never_exceeds_the_ceiling() {
    let (h, seller, buyer, tx_ref) = completed_purchase().await;
    h.set_trust(&seller, MAX_TRUST_SCORE - 3).await;
    h.set_trust(&buyer, MAX_TRUST_SCORE).await;

    let receipt = h
        .state
        .ratings
        .submit(&tx_ref, &buyer, None, 5, None)
        .await
        .unwrap();

    assert_eq!(receipt.trust_impact, 15);
    assert_eq!(receipt.rated_user_trust_score, Some(MAX_TRUST_SCORE));
}

#[tokio::test]
async fn unfinished_transactions_cannot_be_rated() {
    let h = TestHarness::new();
    let seller = h.user("ana", 0).await;
    let buyer = h.user("ben", 500).await;
    let book = h.book_for_sale(&seller, 100).await;
    let tx_ref = h.pending_purchase(buyer, book).await;
    h.approve(&tx_ref, &seller).await;

    let err = h
        .state
        .ratings
        .submit(&tx_ref, &buyer, None, 5, None)
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::Domain(MarketError::InvalidState { .. })));
    assert_eq!(trust(&h, &seller).await, DEFAULT_TRUST_SCORE);
}

#[tokio::test]
async fn perspective_must_match_the_rater() {
    let (h, _seller, buyer, tx_ref) = completed_purchase().await;

    let wrong_side = h
        .state
        .ratings
        .submit(&tx_ref, &buyer, Some(Perspective::Sale), 5, None)
        .await
        .unwrap_err();
    assert!(matches!(wrong_side, StoreError::Domain(MarketError::Authorization(_))));

    let wrong_kind = h
        .state
        .ratings
        .submit(&tx_ref, &buyer, Some(Perspective::Rental), 5, None)
        .await
        .unwrap_err();
    assert!(matches!(wrong_kind, StoreError::Domain(MarketError::Validation(_))));

    let bad_score = h
        .state
        .ratings
        .submit(&tx_ref, &buyer, None, 6, None)
        .await
        .unwrap_err();
    assert!(matches!(bad_score, StoreError::Domain(MarketError::Validation(_))));
}
