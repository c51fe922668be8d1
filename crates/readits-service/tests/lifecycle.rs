//! Pickup, return and transfer flows.

mod common;

use chrono::{Days, NaiveDate};
use common::{meetup_instant, TestHarness};

use readits_core::{
    ConfirmOutcome, MarketError, Transaction, TransactionRef, TransactionStatus,
};
use readits_store::{Store, StoreError};

fn local_today() -> NaiveDate {
    common::meetup_date()
}

#[tokio::test]
async fn rental_starts_when_both_confirm_pickup() {
    let h = TestHarness::new();
    let owner = h.user("ana", 0).await;
    let renter = h.user("ben", 500).await;
    let book = h.book_for_rent(&owner, 10, 50).await;
    let tx_ref = h.pending_rental(renter, book, 7).await;
    h.approve(&tx_ref, &owner).await;
    h.clock.set(meetup_instant());

    let first = h
        .state
        .transactions
        .confirm_pickup(&tx_ref, &renter)
        .await
        .unwrap();
    assert_eq!(first.outcome, ConfirmOutcome::Partial);
    assert_eq!(first.transaction.status(), TransactionStatus::Approved);

    let second = h
        .state
        .transactions
        .confirm_pickup(&tx_ref, &owner)
        .await
        .unwrap();
    assert_eq!(second.outcome, ConfirmOutcome::Complete);

    let Transaction::Rental(rental) = second.transaction else {
        panic!("expected a rental");
    };
    assert_eq!(rental.reservation.status, TransactionStatus::Ongoing);
    assert_eq!(rental.rent_start_date, Some(local_today()));
    assert_eq!(
        rental.rent_end_date,
        Some(local_today().checked_add_days(Days::new(7)).unwrap())
    );
}

#[tokio::test]
async fn repeated_confirmation_changes_nothing() {
    let h = TestHarness::new();
    let owner = h.user("ana", 0).await;
    let buyer = h.user("ben", 500).await;
    let book = h.book_for_sale(&owner, 100).await;
    let tx_ref = h.pending_purchase(buyer, book).await;
    h.approve(&tx_ref, &owner).await;

    h.state
        .transactions
        .confirm_pickup(&tx_ref, &buyer)
        .await
        .unwrap();
    let after_once = h.transaction(&tx_ref).await.unwrap();
    h.drain_notifications();

    for _ in 0..3 {
        let replay = h
            .state
            .transactions
            .confirm_pickup(&tx_ref, &buyer)
            .await
            .unwrap();
        assert_eq!(replay.outcome, ConfirmOutcome::AlreadyConfirmed);
    }

    assert_eq!(h.transaction(&tx_ref).await.unwrap(), after_once);
    assert!(h.drain_notifications().is_empty());
}

#[tokio::test]
async fn one_sided_confirmation_never_completes() {
    let h = TestHarness::new();
    let owner = h.user("ana", 0).await;
    let buyer = h.user("ben", 500).await;
    let book = h.book_for_sale(&owner, 100).await;
    let tx_ref = h.pending_purchase(buyer, book).await;
    h.approve(&tx_ref, &owner).await;

    h.state
        .transactions
        .confirm_pickup(&tx_ref, &owner)
        .await
        .unwrap();
    let tx = h.transaction(&tx_ref).await.unwrap();
    assert_eq!(tx.status(), TransactionStatus::Approved);
    assert!(tx.reservation().pickup.owner_confirmed);
    assert!(!tx.reservation().pickup.user_confirmed);
}

#[tokio::test]
async fn pickup_before_approval_is_refused() {
    let h = TestHarness::new();
    let owner = h.user("ana", 0).await;
    let buyer = h.user("ben", 500).await;
    let book = h.book_for_sale(&owner, 100).await;
    let tx_ref = h.pending_purchase(buyer, book).await;

    let err = h
        .state
        .transactions
        .confirm_pickup(&tx_ref, &buyer)
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::Domain(MarketError::InvalidState { .. })));
}

#[tokio::test]
async fn strangers_cannot_confirm() {
    let h = TestHarness::new();
    let owner = h.user("ana", 0).await;
    let buyer = h.user("ben", 500).await;
    let stranger = h.user("cy", 0).await;
    let book = h.book_for_sale(&owner, 100).await;
    let tx_ref = h.pending_purchase(buyer, book).await;
    h.approve(&tx_ref, &owner).await;

    let err = h
        .state
        .transactions
        .confirm_pickup(&tx_ref, &stranger)
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::Domain(MarketError::Authorization(_))));
}

#[tokio::test]
async fn partial_confirmation_prompts_the_other_party() {
    let h = TestHarness::new();
    let owner = h.user("ana", 0).await;
    let buyer = h.user("ben", 500).await;
    let book = h.book_for_sale(&owner, 100).await;
    let tx_ref = h.pending_purchase(buyer, book).await;
    h.approve(&tx_ref, &owner).await;
    h.drain_notifications();

    h.state
        .transactions
        .confirm_pickup(&tx_ref, &buyer)
        .await
        .unwrap();
    let sent = h.drain_notifications();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].receiver_id, owner);
    assert_eq!(sent[0].sender_id, Some(buyer));
    assert_eq!(sent[0].header, "Confirm Book Pickup");

    h.state
        .transactions
        .confirm_pickup(&tx_ref, &owner)
        .await
        .unwrap();
    let sent = h.drain_notifications();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|n| n.header == "Purchase Completed"));
    assert!(sent.iter().any(|n| n.receiver_id == buyer));
    assert!(sent.iter().any(|n| n.receiver_id == owner));
}

#[tokio::test]
async fn rental_completes_when_both_confirm_return() {
    let h = TestHarness::new();
    let owner = h.user("ana", 0).await;
    let renter = h.user("ben", 500).await;
    let book = h.book_for_rent(&owner, 10, 50).await;
    let tx_ref = h.pending_rental(renter, book, 3).await;
    h.approve(&tx_ref, &owner).await;
    h.hand_over(&tx_ref, &renter, &owner).await;
    let TransactionRef::Rental(rental_id) = tx_ref else {
        panic!("expected a rental");
    };

    let first = h
        .state
        .transactions
        .confirm_return(&rental_id, &owner)
        .await
        .unwrap();
    assert_eq!(first.outcome, ConfirmOutcome::Partial);
    assert_eq!(first.transaction.status(), TransactionStatus::Ongoing);

    let second = h
        .state
        .transactions
        .confirm_return(&rental_id, &renter)
        .await
        .unwrap();
    assert_eq!(second.outcome, ConfirmOutcome::Complete);
    assert_eq!(second.transaction.status(), TransactionStatus::Completed);
}

#[tokio::test]
async fn return_before_pickup_is_refused() {
    let h = TestHarness::new();
    let owner = h.user("ana", 0).await;
    let renter = h.user("ben", 500).await;
    let book = h.book_for_rent(&owner, 10, 50).await;
    let tx_ref = h.pending_rental(renter, book, 3).await;
    h.approve(&tx_ref, &owner).await;
    let TransactionRef::Rental(rental_id) = tx_ref else {
        panic!("expected a rental");
    };

    let err = h
        .state
        .transactions
        .confirm_return(&rental_id, &renter)
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::Domain(MarketError::InvalidState { .. })));
}

#[tokio::test]
async fn purchase_completes_with_a_pending_transfer_decision() {
    let h = TestHarness::new();
    let owner = h.user("ana", 0).await;
    let buyer = h.user("ben", 500).await;
    let book = h.book_for_sale(&owner, 100).await;
    let tx_ref = h.pending_purchase(buyer, book).await;
    h.approve(&tx_ref, &owner).await;
    h.hand_over(&tx_ref, &buyer, &owner).await;

    let Some(Transaction::Purchase(purchase)) = h.transaction(&tx_ref).await else {
        panic!("expected a purchase");
    };
    assert_eq!(purchase.reservation.status, TransactionStatus::Completed);
    assert!(purchase.transfer_decision_pending);
    assert_eq!(purchase.ownership_transferred, None);
}

#[tokio::test]
async fn transferring_ownership_moves_the_listing() {
    let h = TestHarness::new();
    let owner = h.user("ana", 0).await;
    let buyer = h.user("ben", 500).await;
    let book = h.book_for_sale(&owner, 100).await;
    let tx_ref = h.pending_purchase(buyer, book).await;
    h.approve(&tx_ref, &owner).await;
    h.hand_over(&tx_ref, &buyer, &owner).await;
    let TransactionRef::Purchase(purchase_id) = tx_ref else {
        panic!("expected a purchase");
    };

    let err = h
        .state
        .transactions
        .decide_transfer(&purchase_id, &owner, true)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Domain(MarketError::Authorization(_))));

    let decision = h
        .state
        .transactions
        .decide_transfer(&purchase_id, &buyer, true)
        .await
        .unwrap();
    assert_eq!(decision.book.owner_id, buyer);
    assert_eq!(decision.purchase.ownership_transferred, Some(true));
    assert!(!decision.purchase.transfer_decision_pending);
    // The record still names the seller it was bought from.
    assert_eq!(decision.purchase.reservation.original_owner_id, owner);

    let again = h
        .state
        .transactions
        .decide_transfer(&purchase_id, &buyer, false)
        .await
        .unwrap_err();
    assert!(matches!(again, StoreError::Domain(MarketError::InvalidState { .. })));
}

#[tokio::test]
async fn declining_the_transfer_retires_the_listing() {
    let h = TestHarness::new();
    let owner = h.user("ana", 0).await;
    let buyer = h.user("ben", 500).await;
    let book = h.book_for_sale(&owner, 100).await;
    let tx_ref = h.pending_purchase(buyer, book).await;
    h.approve(&tx_ref, &owner).await;
    h.hand_over(&tx_ref, &buyer, &owner).await;
    let TransactionRef::Purchase(purchase_id) = tx_ref else {
        panic!("expected a purchase");
    };

    h.state
        .transactions
        .decide_transfer(&purchase_id, &buyer, false)
        .await
        .unwrap();

    let book = h.store.get_book(&book).await.unwrap().unwrap();
    assert!(book.is_soft_deleted);
    assert_eq!(book.owner_id, owner);
}
