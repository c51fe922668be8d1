//! End-to-end HTTP flows.

mod common;

use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderValue, StatusCode};
use common::{meetup_instant, TestHarness};
use serde_json::{json, Value};

use readits_core::BookAvailability;
use readits_service::ServiceConfig;
use readits_store::Store;

// ============================================================================
// Public and auth
// ============================================================================

#[tokio::test]
async fn health_is_public() {
    let h = TestHarness::new();

    let response = h.server.get("/health").await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "readits");
}

#[tokio::test]
async fn requests_without_a_token_are_unauthorized() {
    let h = TestHarness::new();

    h.server.get("/v1/wallet").await.assert_status_unauthorized();
    h.server
        .get("/v1/wallet")
        .add_header(AUTHORIZATION, HeaderValue::from_static("Bearer not-a-jwt"))
        .await
        .assert_status_unauthorized();
}

#[tokio::test]
async fn without_a_secret_every_token_is_refused() {
    let h = TestHarness::with_config(ServiceConfig {
        jwt_secret: None,
        ..TestHarness::config()
    });
    let user = h.user("ben", 100).await;

    h.server
        .get("/v1/wallet")
        .add_header(AUTHORIZATION, h.auth(&user))
        .await
        .assert_status_unauthorized();
}

// ============================================================================
// Wallet
// ============================================================================

#[tokio::test]
async fn wallet_reports_available_funds() {
    let h = TestHarness::new();
    let owner = h.user("ana", 0).await;
    let buyer = h.user("ben", 500).await;
    let book = h.book_for_sale(&owner, 100).await;
    h.pending_purchase(buyer, book).await;

    let response = h
        .server
        .get("/v1/wallet")
        .add_header(AUTHORIZATION, h.auth(&buyer))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["balance"], 500);
    assert_eq!(body["reserved_amount"], 100);
    assert_eq!(body["available"], 400);
}

#[tokio::test]
async fn ledger_pages_report_has_more() {
    let h = TestHarness::new();
    let user = h.user("ben", 0).await;
    for n in 0..3 {
        h.store
            .credit_top_up(&user, 200, &format!("topup_{user}_{n}"))
            .await
            .unwrap();
    }

    let response = h
        .server
        .get("/v1/wallet/ledger")
        .add_query_param("limit", 2)
        .add_header(AUTHORIZATION, h.auth(&user))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["entries"].as_array().unwrap().len(), 2);
    assert_eq!(body["has_more"], true);

    let last = h
        .server
        .get("/v1/wallet/ledger")
        .add_query_param("limit", 2)
        .add_query_param("offset", 2)
        .add_header(AUTHORIZATION, h.auth(&user))
        .await;
    let body: Value = last.json();
    assert_eq!(body["entries"].as_array().unwrap().len(), 1);
    assert_eq!(body["has_more"], false);
}

// ============================================================================
// Rentals
// ============================================================================

#[tokio::test]
async fn rental_runs_from_request_to_rating() {
    let h = TestHarness::new();
    let owner = h.user("ana", 0).await;
    let renter = h.user("ben", 500).await;
    let book = h.book_for_rent(&owner, 10, 50).await;

    let created = h
        .server
        .post("/v1/rentals")
        .add_header(AUTHORIZATION, h.auth(&renter))
        .json(&TestHarness::terms_json(book, Some(7)))
        .await;
    created.assert_status(StatusCode::CREATED);
    let rental: Value = created.json();
    assert_eq!(rental["kind"], "rental");
    assert_eq!(rental["reservation"]["status"], "pending");
    assert_eq!(rental["reservation"]["total_cost"], 120);
    let id = rental["id"].as_str().unwrap().to_string();

    let approved = h
        .server
        .post(&format!("/v1/rentals/{id}/approve"))
        .add_header(AUTHORIZATION, h.auth(&owner))
        .json(&json!({ "meetup_time": "11:30 AM" }))
        .await;
    approved.assert_status_ok();
    let body: Value = approved.json();
    assert_eq!(body["transaction"]["reservation"]["status"], "approved");
    assert_eq!(body["capture"]["payout"], 120);

    h.clock.set(meetup_instant());
    for user in [&renter, &owner] {
        h.server
            .post(&format!("/v1/rentals/{id}/confirm-pickup"))
            .add_header(AUTHORIZATION, h.auth(user))
            .await
            .assert_status_ok();
    }
    let ongoing: Value = h
        .server
        .get(&format!("/v1/rentals/{id}"))
        .add_header(AUTHORIZATION, h.auth(&renter))
        .await
        .json();
    assert_eq!(ongoing["reservation"]["status"], "ongoing");
    assert_eq!(ongoing["rent_start_date"], "2026-03-03");
    assert_eq!(ongoing["rent_end_date"], "2026-03-10");

    let partial: Value = h
        .server
        .post(&format!("/v1/rentals/{id}/confirm-return"))
        .add_header(AUTHORIZATION, h.auth(&owner))
        .await
        .json();
    assert_eq!(partial["outcome"], "partial");
    let complete: Value = h
        .server
        .post(&format!("/v1/rentals/{id}/confirm-return"))
        .add_header(AUTHORIZATION, h.auth(&renter))
        .await
        .json();
    assert_eq!(complete["outcome"], "complete");
    assert_eq!(complete["transaction"]["reservation"]["status"], "completed");

    let rated = h
        .server
        .post(&format!("/v1/rentals/{id}/rating"))
        .add_header(AUTHORIZATION, h.auth(&renter))
        .json(&json!({ "score": 5, "comment": "Great copy" }))
        .await;
    rated.assert_status(StatusCode::CREATED);
    let receipt: Value = rated.json();
    assert_eq!(receipt["trust_impact"], 11);
    assert_eq!(receipt["rated_user_trust_score"], 511);

    h.server
        .post(&format!("/v1/rentals/{id}/rating"))
        .add_header(AUTHORIZATION, h.auth(&renter))
        .json(&json!({ "score": 4 }))
        .await
        .assert_status(StatusCode::CONFLICT);

    let ledger: Value = h
        .server
        .get("/v1/wallet/ledger")
        .add_header(AUTHORIZATION, h.auth(&owner))
        .await
        .json();
    assert_eq!(ledger["entries"][0]["entry_type"], "rental_earning");
    assert_eq!(ledger["entries"][0]["amount"], 120);
}

#[tokio::test]
async fn missing_terms_are_listed() {
    let h = TestHarness::new();
    let owner = h.user("ana", 0).await;
    let renter = h.user("ben", 500).await;
    let book = h.book_for_rent(&owner, 10, 50).await;

    let response = h
        .server
        .post("/v1/rentals")
        .add_header(AUTHORIZATION, h.auth(&renter))
        .json(&json!({ "book_id": book.to_string(), "meetup_location": "Library" }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "bad_request");
    let message = body["error"]["message"].as_str().unwrap();
    assert!(message.contains("meetup_date"));
    assert!(message.contains("meetup_time_window"));
    assert!(message.contains("rental_duration_days"));
}

#[tokio::test]
async fn own_and_unlisted_books_cannot_be_requested() {
    let h = TestHarness::new();
    let owner = h.user("ana", 500).await;
    let renter = h.user("ben", 500).await;
    let for_sale_only = h.book_for_sale(&owner, 100).await;
    let for_rent = h.book_for_rent(&owner, 10, 0).await;

    h.server
        .post("/v1/rentals")
        .add_header(AUTHORIZATION, h.auth(&owner))
        .json(&TestHarness::terms_json(for_rent, Some(2)))
        .await
        .assert_status_not_found();

    h.server
        .post("/v1/rentals")
        .add_header(AUTHORIZATION, h.auth(&renter))
        .json(&TestHarness::terms_json(for_sale_only, Some(2)))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn insufficient_funds_is_payment_required() {
    let h = TestHarness::new();
    let owner = h.user("ana", 0).await;
    let renter = h.user("ben", 30).await;
    let book = h.book(&owner, BookAvailability::Both, 10, 50, 400).await;

    let response = h
        .server
        .post("/v1/rentals")
        .add_header(AUTHORIZATION, h.auth(&renter))
        .json(&TestHarness::terms_json(book, Some(1)))
        .await;

    response.assert_status(StatusCode::PAYMENT_REQUIRED);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "insufficient_funds");
    assert_eq!(body["error"]["details"]["available"], 30);
    assert_eq!(body["error"]["details"]["required"], 60);
}

#[tokio::test]
async fn reject_works_without_a_body() {
    let h = TestHarness::new();
    let owner = h.user("ana", 0).await;
    let renter = h.user("ben", 500).await;
    let book = h.book_for_rent(&owner, 10, 50).await;
    let tx_ref = h.pending_rental(renter, book, 2).await;
    let id = tx_ref.as_uuid();

    let response = h
        .server
        .post(&format!("/v1/rentals/{id}/reject"))
        .add_header(AUTHORIZATION, h.auth(&owner))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["deleted"], true);
    assert_eq!(body["escrow_released"], true);
    assert_eq!(h.funds(&renter).await, (500, 0));

    h.server
        .get(&format!("/v1/rentals/{id}"))
        .add_header(AUTHORIZATION, h.auth(&renter))
        .await
        .assert_status_not_found();
}

#[tokio::test]
async fn strangers_cannot_read_or_act() {
    let h = TestHarness::new();
    let owner = h.user("ana", 0).await;
    let renter = h.user("ben", 500).await;
    let stranger = h.user("cy", 500).await;
    let book = h.book_for_rent(&owner, 10, 50).await;
    let tx_ref = h.pending_rental(renter, book, 2).await;
    let id = tx_ref.as_uuid();

    h.server
        .get(&format!("/v1/rentals/{id}"))
        .add_header(AUTHORIZATION, h.auth(&stranger))
        .await
        .assert_status(StatusCode::FORBIDDEN);

    h.server
        .post(&format!("/v1/rentals/{id}/approve"))
        .add_header(AUTHORIZATION, h.auth(&stranger))
        .json(&json!({ "meetup_time": "11:00" }))
        .await
        .assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn lists_show_both_sides() {
    let h = TestHarness::new();
    let owner = h.user("ana", 0).await;
    let renter = h.user("ben", 500).await;
    let book = h.book_for_rent(&owner, 10, 50).await;
    h.pending_rental(renter, book, 2).await;

    for user in [&owner, &renter] {
        let body: Value = h
            .server
            .get("/v1/rentals")
            .add_header(AUTHORIZATION, h.auth(user))
            .await
            .json();
        assert_eq!(body["transactions"].as_array().unwrap().len(), 1);
    }

    let purchases: Value = h
        .server
        .get("/v1/purchases")
        .add_header(AUTHORIZATION, h.auth(&renter))
        .await
        .json();
    assert!(purchases["transactions"].as_array().unwrap().is_empty());
}

// ============================================================================
// Purchases
// ============================================================================

#[tokio::test]
async fn purchase_ends_with_an_ownership_decision() {
    let h = TestHarness::new();
    let seller = h.user("ana", 0).await;
    let buyer = h.user("ben", 500).await;
    let book = h.book_for_sale(&seller, 100).await;

    let created: Value = h
        .server
        .post("/v1/purchases")
        .add_header(AUTHORIZATION, h.auth(&buyer))
        .json(&TestHarness::terms_json(book, None))
        .await
        .json();
    let id = created["id"].as_str().unwrap().to_string();

    h.server
        .post(&format!("/v1/purchases/{id}/approve"))
        .add_header(AUTHORIZATION, h.auth(&seller))
        .json(&json!({ "meetup_time": "12:00" }))
        .await
        .assert_status_ok();
    for user in [&buyer, &seller] {
        h.server
            .post(&format!("/v1/purchases/{id}/confirm-pickup"))
            .add_header(AUTHORIZATION, h.auth(user))
            .await
            .assert_status_ok();
    }

    h.server
        .post(&format!("/v1/purchases/{id}/transfer-decision"))
        .add_header(AUTHORIZATION, h.auth(&seller))
        .json(&json!({ "transfer_ownership": true }))
        .await
        .assert_status(StatusCode::FORBIDDEN);

    let decided = h
        .server
        .post(&format!("/v1/purchases/{id}/transfer-decision"))
        .add_header(AUTHORIZATION, h.auth(&buyer))
        .json(&json!({ "transfer_ownership": true }))
        .await;
    decided.assert_status_ok();
    let body: Value = decided.json();
    assert_eq!(body["book"]["owner_id"], buyer.to_string());
    assert_eq!(body["purchase"]["ownership_transferred"], true);

    assert_eq!(h.funds(&buyer).await, (400, 0));
    assert_eq!(h.funds(&seller).await, (100, 0));
}

#[tokio::test]
async fn cancel_by_the_buyer_releases_escrow() {
    let h = TestHarness::new();
    let seller = h.user("ana", 0).await;
    let buyer = h.user("ben", 500).await;
    let book = h.book_for_sale(&seller, 100).await;
    let tx_ref = h.pending_purchase(buyer, book).await;
    let id = tx_ref.as_uuid();

    h.server
        .post(&format!("/v1/purchases/{id}/cancel"))
        .add_header(AUTHORIZATION, h.auth(&seller))
        .await
        .assert_status(StatusCode::FORBIDDEN);

    h.server
        .post(&format!("/v1/purchases/{id}/cancel"))
        .add_header(AUTHORIZATION, h.auth(&buyer))
        .await
        .assert_status_ok();
    assert_eq!(h.funds(&buyer).await, (500, 0));

    h.server
        .post(&format!("/v1/purchases/{id}/cancel"))
        .add_header(AUTHORIZATION, h.auth(&buyer))
        .await
        .assert_status_not_found();
}

#[tokio::test]
async fn duplicate_request_is_a_conflict() {
    let h = TestHarness::new();
    let seller = h.user("ana", 0).await;
    let buyer = h.user("ben", 500).await;
    let book = h.book_for_sale(&seller, 100).await;

    for expected in [StatusCode::CREATED, StatusCode::CONFLICT] {
        h.server
            .post("/v1/purchases")
            .add_header(AUTHORIZATION, h.auth(&buyer))
            .json(&TestHarness::terms_json(book, None))
            .await
            .assert_status(expected);
    }
}
