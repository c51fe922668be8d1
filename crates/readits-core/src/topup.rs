//! Wallet top-up packs sold through the payment provider.

use crate::error::{MarketError, Result};
use crate::UserId;

/// `(amount paid, readits credited)` for each pack.
pub const TOP_UP_PACKS: [(i64, i64); 4] = [(100, 200), (150, 600), (350, 1000), (750, 5000)];

/// Readits credited for a payment of exactly `amount_paid`.
///
/// # Errors
///
/// Returns a validation error if no pack has that price.
pub fn credits_for(amount_paid: i64) -> Result<i64> {
    TOP_UP_PACKS
        .iter()
        .find(|(price, _)| *price == amount_paid)
        .map(|(_, credits)| *credits)
        .ok_or_else(|| MarketError::validation(format!("no top-up pack costs {amount_paid}")))
}

/// Extract the user from an invoice external id of the form `prefix_{user_id}_{timestamp}`.
///
/// # Errors
///
/// Returns a validation error if the id has fewer than three segments, or an id error if
/// the middle segment is not a user id.
pub fn user_from_external_id(external_id: &str) -> Result<UserId> {
    let mut segments = external_id.split('_');
    let (Some(_prefix), Some(user), Some(_timestamp)) =
        (segments.next(), segments.next(), segments.next())
    else {
        return Err(MarketError::validation(format!(
            "malformed external id: {external_id}"
        )));
    };
    Ok(user.parse()?)
}
