//! Xendit top-up callback.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use readits_core::topup::{credits_for, user_from_external_id};

use crate::crypto::constant_time_eq;
use crate::engine::TopUp;
use crate::error::ApiError;
use crate::state::AppState;

/// Header carrying the shared callback token.
pub const CALLBACK_TOKEN_HEADER: &str = "x-callback-token";

/// Invoice callback payload (the fields we read).
#[derive(Debug, Deserialize)]
pub struct XenditInvoiceCallback {
    /// Invoice id on the provider side.
    #[serde(default)]
    pub id: Option<String>,
    /// `prefix_{user_id}_{timestamp}`, also the idempotence key.
    pub external_id: String,
    /// Amount paid.
    pub amount: i64,
    /// Invoice status; only `PAID` credits the wallet.
    pub status: String,
}

/// What the callback did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TopUpStatus {
    /// Wallet credited.
    Credited,
    /// The external id had already been credited.
    AlreadyProcessed,
    /// Status was not `PAID`; nothing changed.
    Ignored,
}

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Whether the webhook was accepted.
    pub received: bool,
    /// What the callback did.
    pub status: TopUpStatus,
}

/// Handle Xendit invoice callbacks.
pub async fn xendit_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookResponse>, ApiError> {
    let token = headers
        .get(CALLBACK_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Xendit callback without a callback token");
            ApiError::Unauthorized
        })?;

    let Some(expected) = state.config.xendit_callback_token.as_deref() else {
        tracing::warn!("Xendit callback received but no callback token is configured");
        return Err(ApiError::Unauthorized);
    };
    if !constant_time_eq(token, expected) {
        tracing::warn!("Invalid Xendit callback token");
        return Err(ApiError::Unauthorized);
    }

    let callback: XenditInvoiceCallback =
        serde_json::from_str(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    tracing::info!(
        invoice_id = ?callback.id,
        external_id = %callback.external_id,
        amount = callback.amount,
        status = %callback.status,
        "Received Xendit callback"
    );

    if callback.status != "PAID" {
        return Ok(Json(WebhookResponse {
            received: true,
            status: TopUpStatus::Ignored,
        }));
    }

    let credits = credits_for(callback.amount)?;
    let user_id = user_from_external_id(&callback.external_id)?;

    let status = match state
        .wallets
        .credit_top_up(&user_id, credits, &callback.external_id)
        .await?
    {
        TopUp::Credited { .. } => TopUpStatus::Credited,
        TopUp::AlreadyProcessed => TopUpStatus::AlreadyProcessed,
    };

    Ok(Json(WebhookResponse {
        received: true,
        status,
    }))
}
