//! Request and response bodies shared by the rental and purchase handlers, and the
//! handler bodies they both delegate to.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use readits_core::{
    Capture, ConfirmOutcome, Perspective, Transaction, TransactionKind, TransactionRef,
};

use crate::auth::AuthUser;
use crate::engine::{RatingReceipt, ReservationTerms};
use crate::error::ApiError;
use crate::state::AppState;

/// Approve request body.
#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    /// Meetup time inside the requested window, `"14:30"` or `"2:30 PM"`.
    pub meetup_time: String,
}

/// Reject request body.
#[derive(Debug, Default, Deserialize)]
pub struct RejectRequest {
    /// Optional reason passed on to the requester.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Rating request body.
#[derive(Debug, Deserialize)]
pub struct RatingRequest {
    /// Stars, 1 to 5.
    pub score: u8,
    /// Optional comment.
    #[serde(default)]
    pub comment: Option<String>,
    /// Optional point of view; derived from the caller's side when absent.
    #[serde(default)]
    pub perspective: Option<Perspective>,
}

/// Approve response.
#[derive(Debug, Serialize)]
pub struct ApprovalResponse {
    /// The approved record.
    pub transaction: Transaction,
    /// Amounts moved from the requester to the owner.
    pub capture: Capture,
}

/// Reject or cancel response.
#[derive(Debug, Serialize)]
pub struct WithdrawnResponse {
    /// The deleted record.
    pub transaction: TransactionRef,
    /// Always `true`: withdrawn reservations are removed.
    pub deleted: bool,
    /// Whether the escrow was returned to the requester's available funds.
    pub escrow_released: bool,
}

/// Confirmation response.
#[derive(Debug, Serialize)]
pub struct ConfirmationResponse {
    /// The record after the confirmation.
    pub transaction: Transaction,
    /// What the call changed.
    pub outcome: ConfirmOutcome,
}

/// List response.
#[derive(Debug, Serialize)]
pub struct TransactionList {
    /// Records where the caller is requester or owner, newest first.
    pub transactions: Vec<Transaction>,
}

pub(crate) async fn create(
    state: &Arc<AppState>,
    auth: &AuthUser,
    kind: TransactionKind,
    terms: ReservationTerms,
) -> Result<(StatusCode, Json<Transaction>), ApiError> {
    let created = state.reservations.create(auth.user_id, kind, terms).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub(crate) async fn list(
    state: &Arc<AppState>,
    auth: &AuthUser,
    kind: TransactionKind,
) -> Result<Json<TransactionList>, ApiError> {
    let transactions = state
        .transactions
        .list_for_user(&auth.user_id, kind)
        .await?;
    Ok(Json(TransactionList { transactions }))
}

pub(crate) async fn get(
    state: &Arc<AppState>,
    auth: &AuthUser,
    tx_ref: TransactionRef,
) -> Result<Json<Transaction>, ApiError> {
    Ok(Json(state.transactions.get(&tx_ref, &auth.user_id).await?))
}

pub(crate) async fn approve(
    state: &Arc<AppState>,
    auth: &AuthUser,
    tx_ref: TransactionRef,
    meetup_time: &str,
) -> Result<Json<ApprovalResponse>, ApiError> {
    let approval = state
        .transactions
        .approve(&tx_ref, &auth.user_id, meetup_time)
        .await?;
    Ok(Json(ApprovalResponse {
        transaction: approval.transaction,
        capture: approval.capture,
    }))
}

pub(crate) async fn reject(
    state: &Arc<AppState>,
    auth: &AuthUser,
    tx_ref: TransactionRef,
    body: RejectRequest,
) -> Result<Json<WithdrawnResponse>, ApiError> {
    let withdrawn = state
        .transactions
        .reject(&tx_ref, &auth.user_id, body.reason)
        .await?;
    Ok(Json(WithdrawnResponse {
        transaction: tx_ref,
        deleted: true,
        escrow_released: withdrawn.released,
    }))
}

pub(crate) async fn cancel(
    state: &Arc<AppState>,
    auth: &AuthUser,
    tx_ref: TransactionRef,
) -> Result<Json<WithdrawnResponse>, ApiError> {
    let withdrawn = state.transactions.cancel(&tx_ref, &auth.user_id).await?;
    Ok(Json(WithdrawnResponse {
        transaction: tx_ref,
        deleted: true,
        escrow_released: withdrawn.released,
    }))
}

pub(crate) async fn confirm_pickup(
    state: &Arc<AppState>,
    auth: &AuthUser,
    tx_ref: TransactionRef,
) -> Result<Json<ConfirmationResponse>, ApiError> {
    let confirmation = state
        .transactions
        .confirm_pickup(&tx_ref, &auth.user_id)
        .await?;
    Ok(Json(ConfirmationResponse {
        transaction: confirmation.transaction,
        outcome: confirmation.outcome,
    }))
}

pub(crate) async fn rate(
    state: &Arc<AppState>,
    auth: &AuthUser,
    tx_ref: TransactionRef,
    body: RatingRequest,
) -> Result<(StatusCode, Json<RatingReceipt>), ApiError> {
    let receipt = state
        .ratings
        .submit(
            &tx_ref,
            &auth.user_id,
            body.perspective,
            body.score,
            body.comment,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}
