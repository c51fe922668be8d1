//! Notification inbox handler.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::Serialize;

use readits_core::Notification;
use readits_store::Store;

use super::PageQuery;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Notification page response.
#[derive(Debug, Serialize)]
pub struct NotificationsResponse {
    /// Notifications, newest first.
    pub notifications: Vec<Notification>,
    /// Whether more exist past this page.
    pub has_more: bool,
}

/// List the caller's notifications.
pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<PageQuery>,
) -> Result<Json<NotificationsResponse>, ApiError> {
    let limit = query.capped_limit();
    let mut notifications = state
        .store
        .list_notifications(&auth.user_id, limit + 1, query.offset)
        .await?;
    let has_more = notifications.len() > limit;
    notifications.truncate(limit);

    Ok(Json(NotificationsResponse {
        notifications,
        has_more,
    }))
}
