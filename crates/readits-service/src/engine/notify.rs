//! Outbound notifications.
//!
//! The engine hands notifications to a [`Notifier`], which only pushes onto an unbounded
//! channel: publishing never blocks and never fails the transition that triggered it. A
//! [`Dispatcher`] task drains the channel, persists each notification and optionally
//! forwards it to a webhook.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use readits_core::Notification;
use readits_store::Store;

/// Publishing half of the notification channel.
#[derive(Debug, Clone)]
pub struct Notifier {
    sender: mpsc::UnboundedSender<Notification>,
}

impl Notifier {
    /// Create a notifier and the receiver a [`Dispatcher`] will drain.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Queue a notification for delivery.
    pub fn publish(&self, notification: Notification) {
        tracing::debug!(
            receiver_id = %notification.receiver_id,
            header = %notification.header,
            "notification queued"
        );
        if let Err(err) = self.sender.send(notification) {
            tracing::warn!(
                receiver_id = %err.0.receiver_id,
                "notification dropped: dispatcher is not running"
            );
        }
    }
}

/// Drains the notification channel.
pub struct Dispatcher {
    store: Arc<dyn Store>,
    webhook: Option<Webhook>,
}

struct Webhook {
    http: reqwest::Client,
    url: String,
}

impl Dispatcher {
    /// A dispatcher that persists through `store` and, if `webhook_url` is set, POSTs each
    /// notification there.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, webhook_url: Option<String>) -> Self {
        let webhook = webhook_url.map(|url| {
            tracing::info!(url = %url, "notification webhook enabled");
            Webhook {
                http: reqwest::Client::new(),
                url,
            }
        });
        Self { store, webhook }
    }

    /// Deliver until the channel closes or `shutdown` flips to `true`. Whatever is already
    /// queued at shutdown is still delivered.
    pub async fn run(
        self,
        mut receiver: mpsc::UnboundedReceiver<Notification>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                next = receiver.recv() => match next {
                    Some(notification) => self.deliver(&notification).await,
                    None => break,
                },
                _ = shutdown.changed() => {
                    receiver.close();
                    while let Some(notification) = receiver.recv().await {
                        self.deliver(&notification).await;
                    }
                    break;
                }
            }
        }
        tracing::info!("notification dispatcher stopped");
    }

    /// Persist and forward one notification. Failures are logged and dropped.
    pub async fn deliver(&self, notification: &Notification) {
        if let Err(err) = self.store.insert_notification(notification).await {
            tracing::error!(
                notification_id = %notification.id,
                receiver_id = %notification.receiver_id,
                error = %err,
                "failed to persist notification"
            );
        }

        let Some(webhook) = &self.webhook else {
            return;
        };
        let result = webhook
            .http
            .post(&webhook.url)
            .json(notification)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status);
        if let Err(err) = result {
            tracing::error!(
                notification_id = %notification.id,
                error = %err,
                "failed to forward notification"
            );
        }
    }
}
