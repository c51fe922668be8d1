//! Readits Service - escrow engine and HTTP API for the readits marketplace.

use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use readits_core::SystemClock;
use readits_service::engine::{Dispatcher, Notifier};
use readits_service::{create_router, AppState, ServiceConfig};
use readits_store::{MemoryStore, PgStore, RetryingStore, Store};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,readits=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Readits Service");

    let config = ServiceConfig::from_env();

    tracing::info!(
        listen_addr = %config.listen_addr,
        database_configured = %config.database_url.is_some(),
        xendit_configured = %config.xendit_callback_token.is_some(),
        notification_webhook = ?config.notification_webhook_url,
        local_utc_offset_hours = config.local_utc_offset_hours,
        "Service configuration loaded"
    );

    let store: Arc<dyn Store> = if let Some(url) = &config.database_url {
        tracing::info!("Connecting to PostgreSQL");
        let pg = PgStore::connect(url, config.database_max_connections).await?;
        pg.migrate().await?;
        Arc::new(RetryingStore::new(pg, config.retry_policy()))
    } else {
        tracing::warn!("DATABASE_URL not set - using in-memory store, data will not survive a restart");
        Arc::new(RetryingStore::new(MemoryStore::new(), config.retry_policy()))
    };

    let (notifier, notifications) = Notifier::channel();
    let state = AppState::new(
        store.clone(),
        config.clone(),
        Arc::new(SystemClock),
        notifier,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let janitor = tokio::spawn(state.janitor.clone().run(shutdown_rx.clone()));
    let dispatcher = tokio::spawn(
        Dispatcher::new(store, config.notification_webhook_url.clone())
            .run(notifications, shutdown_rx),
    );

    let app = create_router(state);
    tracing::info!("Router configured with all API endpoints");

    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(janitor, dispatcher);
    tracing::info!("Readits Service stopped");

    Ok(())
}
