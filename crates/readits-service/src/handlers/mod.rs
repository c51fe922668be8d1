//! API handlers.

pub mod health;
pub mod notifications;
pub mod purchases;
pub mod rentals;
pub mod transactions;
pub mod wallet;
pub mod webhooks;

use serde::Deserialize;

/// Page parameters shared by list endpoints.
#[derive(Debug, Deserialize)]
pub struct PageQuery {
    /// Maximum items to return (default 50, capped at 100).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Items to skip.
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

impl PageQuery {
    /// The requested limit, capped.
    #[must_use]
    pub fn capped_limit(&self) -> usize {
        self.limit.clamp(1, 100)
    }
}
