//! Rental handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use readits_core::{RentalId, Transaction, TransactionKind, TransactionRef};

use super::transactions::{
    self, ApprovalResponse, ApproveRequest, ConfirmationResponse, RatingRequest, RejectRequest,
    TransactionList, WithdrawnResponse,
};
use crate::auth::AuthUser;
use crate::engine::{RatingReceipt, ReservationTerms};
use crate::error::ApiError;
use crate::state::AppState;

/// Request a rental.
pub async fn create_rental(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(terms): Json<ReservationTerms>,
) -> Result<(StatusCode, Json<Transaction>), ApiError> {
    transactions::create(&state, &auth, TransactionKind::Rental, terms).await
}

/// List the caller's rentals, as renter or owner.
pub async fn list_rentals(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<TransactionList>, ApiError> {
    transactions::list(&state, &auth, TransactionKind::Rental).await
}

/// Get one rental.
pub async fn get_rental(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<RentalId>,
) -> Result<Json<Transaction>, ApiError> {
    transactions::get(&state, &auth, TransactionRef::Rental(id)).await
}

/// Owner approves.
pub async fn approve_rental(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<RentalId>,
    Json(body): Json<ApproveRequest>,
) -> Result<Json<ApprovalResponse>, ApiError> {
    transactions::approve(&state, &auth, TransactionRef::Rental(id), &body.meetup_time).await
}

/// Owner declines.
pub async fn reject_rental(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<RentalId>,
    body: Option<Json<RejectRequest>>,
) -> Result<Json<WithdrawnResponse>, ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    transactions::reject(&state, &auth, TransactionRef::Rental(id), body).await
}

/// Renter withdraws.
pub async fn cancel_rental(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<RentalId>,
) -> Result<Json<WithdrawnResponse>, ApiError> {
    transactions::cancel(&state, &auth, TransactionRef::Rental(id)).await
}

/// Either party confirms the pickup.
pub async fn confirm_rental_pickup(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<RentalId>,
) -> Result<Json<ConfirmationResponse>, ApiError> {
    transactions::confirm_pickup(&state, &auth, TransactionRef::Rental(id)).await
}

/// Either party confirms the return.
pub async fn confirm_rental_return(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<RentalId>,
) -> Result<Json<ConfirmationResponse>, ApiError> {
    let confirmation = state
        .transactions
        .confirm_return(&id, &auth.user_id)
        .await?;
    Ok(Json(ConfirmationResponse {
        transaction: confirmation.transaction,
        outcome: confirmation.outcome,
    }))
}

/// Either party rates the other after completion.
pub async fn rate_rental(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<RentalId>,
    Json(body): Json<RatingRequest>,
) -> Result<(StatusCode, Json<RatingReceipt>), ApiError> {
    transactions::rate(&state, &auth, TransactionRef::Rental(id), body).await
}
