//! Router configuration.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{health, notifications, purchases, rentals, wallet, webhooks};
use crate::state::AppState;

/// Maximum concurrent requests for authenticated API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Wallet (bearer JWT)
/// - `GET /v1/wallet` - Balance, reserved and available readits
/// - `GET /v1/wallet/ledger` - Ledger history
///
/// ## Rentals (bearer JWT)
/// - `POST /v1/rentals`, `GET /v1/rentals`, `GET /v1/rentals/:id`
/// - `POST /v1/rentals/:id/{approve,reject,cancel,confirm-pickup,confirm-return,rating}`
///
/// ## Purchases (bearer JWT)
/// - `POST /v1/purchases`, `GET /v1/purchases`, `GET /v1/purchases/:id`
/// - `POST /v1/purchases/:id/{approve,reject,cancel,confirm-pickup,transfer-decision,rating}`
///
/// ## Notifications (bearer JWT)
/// - `GET /v1/notifications`
///
/// ## Webhooks (callback token)
/// - `POST /webhooks/xendit` - Wallet top-up callback
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config.cors_origins);
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let state = Arc::new(state);

    let rental_routes = Router::new()
        .route("/", post(rentals::create_rental).get(rentals::list_rentals))
        .route("/:id", get(rentals::get_rental))
        .route("/:id/approve", post(rentals::approve_rental))
        .route("/:id/reject", post(rentals::reject_rental))
        .route("/:id/cancel", post(rentals::cancel_rental))
        .route("/:id/confirm-pickup", post(rentals::confirm_rental_pickup))
        .route("/:id/confirm-return", post(rentals::confirm_rental_return))
        .route("/:id/rating", post(rentals::rate_rental));

    let purchase_routes = Router::new()
        .route(
            "/",
            post(purchases::create_purchase).get(purchases::list_purchases),
        )
        .route("/:id", get(purchases::get_purchase))
        .route("/:id/approve", post(purchases::approve_purchase))
        .route("/:id/reject", post(purchases::reject_purchase))
        .route("/:id/cancel", post(purchases::cancel_purchase))
        .route(
            "/:id/confirm-pickup",
            post(purchases::confirm_purchase_pickup),
        )
        .route("/:id/transfer-decision", post(purchases::decide_transfer))
        .route("/:id/rating", post(purchases::rate_purchase));

    let api_routes = Router::new()
        .route("/wallet", get(wallet::get_wallet))
        .route("/wallet/ledger", get(wallet::list_ledger))
        .nest("/rentals", rental_routes)
        .nest("/purchases", purchase_routes)
        .route("/notifications", get(notifications::list_notifications))
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS));

    Router::new()
        .route("/health", get(health::health))
        .nest("/v1", api_routes)
        // Webhooks are paced by the provider, not rate limited here
        .route("/webhooks/xendit", post(webhooks::xendit_webhook))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
