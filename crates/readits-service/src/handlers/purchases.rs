//! Purchase handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use readits_core::{Book, Purchase, PurchaseId, Transaction, TransactionKind, TransactionRef};

use super::transactions::{
    self, ApprovalResponse, ApproveRequest, ConfirmationResponse, RatingRequest, RejectRequest,
    TransactionList, WithdrawnResponse,
};
use crate::auth::AuthUser;
use crate::engine::{RatingReceipt, ReservationTerms};
use crate::error::ApiError;
use crate::state::AppState;

/// Transfer decision request body.
#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    /// `true` moves the listing to the buyer; `false` retires it.
    pub transfer_ownership: bool,
}

/// Transfer decision response.
#[derive(Debug, Serialize)]
pub struct TransferResponse {
    /// The purchase with its recorded decision.
    pub purchase: Purchase,
    /// The book after the decision.
    pub book: Book,
}

/// Request a purchase.
pub async fn create_purchase(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(terms): Json<ReservationTerms>,
) -> Result<(StatusCode, Json<Transaction>), ApiError> {
    transactions::create(&state, &auth, TransactionKind::Purchase, terms).await
}

/// List the caller's purchases, as buyer or seller.
pub async fn list_purchases(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<TransactionList>, ApiError> {
    transactions::list(&state, &auth, TransactionKind::Purchase).await
}

/// Get one purchase.
pub async fn get_purchase(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<PurchaseId>,
) -> Result<Json<Transaction>, ApiError> {
    transactions::get(&state, &auth, TransactionRef::Purchase(id)).await
}

/// Seller approves.
pub async fn approve_purchase(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<PurchaseId>,
    Json(body): Json<ApproveRequest>,
) -> Result<Json<ApprovalResponse>, ApiError> {
    transactions::approve(&state, &auth, TransactionRef::Purchase(id), &body.meetup_time).await
}

/// Seller declines.
pub async fn reject_purchase(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<PurchaseId>,
    body: Option<Json<RejectRequest>>,
) -> Result<Json<WithdrawnResponse>, ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    transactions::reject(&state, &auth, TransactionRef::Purchase(id), body).await
}

/// Buyer withdraws.
pub async fn cancel_purchase(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<PurchaseId>,
) -> Result<Json<WithdrawnResponse>, ApiError> {
    transactions::cancel(&state, &auth, TransactionRef::Purchase(id)).await
}

/// Either party confirms the handover.
pub async fn confirm_purchase_pickup(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<PurchaseId>,
) -> Result<Json<ConfirmationResponse>, ApiError> {
    transactions::confirm_pickup(&state, &auth, TransactionRef::Purchase(id)).await
}

/// Buyer decides what happens to the listing.
pub async fn decide_transfer(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<PurchaseId>,
    Json(body): Json<TransferRequest>,
) -> Result<Json<TransferResponse>, ApiError> {
    let decision = state
        .transactions
        .decide_transfer(&id, &auth.user_id, body.transfer_ownership)
        .await?;
    Ok(Json(TransferResponse {
        purchase: decision.purchase,
        book: decision.book,
    }))
}

/// Either party rates the other after completion.
pub async fn rate_purchase(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<PurchaseId>,
    Json(body): Json<RatingRequest>,
) -> Result<(StatusCode, Json<RatingReceipt>), ApiError> {
    transactions::rate(&state, &auth, TransactionRef::Purchase(id), body).await
}
