//! Wallet handlers.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use readits_core::{LedgerEntry, Wallet};

use super::PageQuery;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Wallet response.
#[derive(Debug, Serialize)]
pub struct WalletResponse {
    /// Wallet id.
    pub wallet_id: String,
    /// Readits owned.
    pub balance: i64,
    /// Readits earmarked by open reservations.
    pub reserved_amount: i64,
    /// Readits free for new reservations.
    pub available: i64,
    /// Last change.
    pub last_updated: DateTime<Utc>,
}

impl From<&Wallet> for WalletResponse {
    fn from(wallet: &Wallet) -> Self {
        Self {
            wallet_id: wallet.wallet_id.to_string(),
            balance: wallet.balance,
            reserved_amount: wallet.reserved_amount,
            available: wallet.available(),
            last_updated: wallet.last_updated,
        }
    }
}

/// Get the caller's wallet.
pub async fn get_wallet(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<WalletResponse>, ApiError> {
    let wallet = state.wallets.wallet(&auth.user_id).await?;
    Ok(Json(WalletResponse::from(&wallet)))
}

/// Ledger page response.
#[derive(Debug, Serialize)]
pub struct LedgerResponse {
    /// Entries, newest first.
    pub entries: Vec<LedgerEntry>,
    /// Whether more entries exist past this page.
    pub has_more: bool,
}

/// List the caller's ledger entries.
pub async fn list_ledger(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<PageQuery>,
) -> Result<Json<LedgerResponse>, ApiError> {
    // Fetch one more than requested to determine has_more
    let limit = query.capped_limit();
    let mut entries = state
        .wallets
        .history(&auth.user_id, limit + 1, query.offset)
        .await?;
    let has_more = entries.len() > limit;
    entries.truncate(limit);

    Ok(Json(LedgerResponse { entries, has_more }))
}
