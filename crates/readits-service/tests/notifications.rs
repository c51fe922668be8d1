//! Notification dispatch and inbox.

mod common;

use std::sync::Arc;

use axum::http::header::AUTHORIZATION;
use common::TestHarness;
use serde_json::Value;
use tokio::sync::watch;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use readits_core::{Notification, NotificationKind, UserId};
use readits_service::engine::{Dispatcher, Notifier};
use readits_store::{MemoryStore, Store};

fn notice(receiver: UserId, header: &str) -> Notification {
    Notification::new(
        None,
        receiver,
        NotificationKind::System,
        header,
        "Your request was updated.",
    )
}

#[tokio::test]
async fn delivery_persists_and_forwards() {
    let webhook = MockServer::start().await;
    let receiver = UserId::generate();
    Mock::given(method("POST"))
        .and(path("/notify"))
        .and(body_partial_json(serde_json::json!({
            "receiver_id": receiver.to_string(),
            "header": "Rental Request"
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&webhook)
        .await;

    let store = Arc::new(MemoryStore::new());
    let dispatcher = Dispatcher::new(store.clone(), Some(format!("{}/notify", webhook.uri())));
    dispatcher.deliver(&notice(receiver, "Rental Request")).await;

    let stored = store.list_notifications(&receiver, 10, 0).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].header, "Rental Request");
}

#[tokio::test]
async fn webhook_failure_keeps_the_stored_copy() {
    let webhook = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&webhook)
        .await;

    let store = Arc::new(MemoryStore::new());
    let receiver = UserId::generate();
    let dispatcher = Dispatcher::new(store.clone(), Some(webhook.uri()));
    dispatcher.deliver(&notice(receiver, "Pickup Reminder")).await;

    assert_eq!(store.list_notifications(&receiver, 10, 0).await.unwrap().len(), 1);
}

#[tokio::test]
async fn dispatcher_drains_the_queue_on_shutdown() {
    let store = Arc::new(MemoryStore::new());
    let receiver = UserId::generate();
    let (notifier, queue) = Notifier::channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    for n in 0..5 {
        notifier.publish(notice(receiver, &format!("Update {n}")));
    }
    shutdown_tx.send(true).unwrap();
    Dispatcher::new(store.clone(), None).run(queue, shutdown_rx).await;

    assert_eq!(store.list_notifications(&receiver, 10, 0).await.unwrap().len(), 5);
}

#[tokio::test]
async fn publishing_after_the_dispatcher_stops_is_harmless() {
    let (notifier, queue) = Notifier::channel();
    drop(queue);

    notifier.publish(notice(UserId::generate(), "Nobody listening"));
}

#[tokio::test]
async fn inbox_lists_the_callers_notifications() {
    let h = TestHarness::new();
    let owner = h.user("ana", 0).await;
    let buyer = h.user("ben", 500).await;
    let book = h.book_for_sale(&owner, 100).await;
    let tx_ref = h.pending_purchase(buyer, book).await;
    h.approve(&tx_ref, &owner).await;

    let dispatcher = Dispatcher::new(h.store.clone(), None);
    for notification in h.drain_notifications() {
        dispatcher.deliver(&notification).await;
    }

    let owner_inbox: Value = h
        .server
        .get("/v1/notifications")
        .add_header(AUTHORIZATION, h.auth(&owner))
        .await
        .json();
    let owner_items = owner_inbox["notifications"].as_array().unwrap();
    assert_eq!(owner_items.len(), 1);
    assert_eq!(owner_items[0]["header"], "Purchase Request");
    assert_eq!(owner_items[0]["sender_id"], buyer.to_string());

    let buyer_inbox: Value = h
        .server
        .get("/v1/notifications")
        .add_header(AUTHORIZATION, h.auth(&buyer))
        .await
        .json();
    let buyer_items = buyer_inbox["notifications"].as_array().unwrap();
    assert_eq!(buyer_items.len(), 1);
    assert_eq!(buyer_items[0]["header"], "Purchase Request Approved");
    assert_eq!(buyer_inbox["has_more"], false);
}
