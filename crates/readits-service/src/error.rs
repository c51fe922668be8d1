//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use readits_core::MarketError;
use readits_store::StoreError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Forbidden - valid credentials but not a party entitled to act.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Conflict - invalid state transition, duplicate or competing commitment.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Insufficient readits.
    #[error("insufficient funds: available={available}, required={required}")]
    InsufficientFunds {
        /// Funds the guard saw.
        available: i64,
        /// Funds the operation needed.
        required: i64,
    },

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                self.to_string(),
                None,
            ),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg.clone(), None),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone(), None),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone(), None),
            Self::InsufficientFunds {
                available,
                required,
            } => (
                StatusCode::PAYMENT_REQUIRED,
                "insufficient_funds",
                self.to_string(),
                Some(serde_json::json!({
                    "available": available,
                    "required": required
                })),
            ),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<MarketError> for ApiError {
    fn from(err: MarketError) -> Self {
        let message = err.to_string();
        match err {
            MarketError::Validation(_) | MarketError::InvalidId(_) => Self::BadRequest(message),
            MarketError::Authorization(msg) => Self::Forbidden(msg),
            MarketError::EntityNotFound { .. } => Self::NotFound(message),
            MarketError::InsufficientFunds {
                available,
                required,
            } => Self::InsufficientFunds {
                available,
                required,
            },
            MarketError::InvalidState { .. }
            | MarketError::Conflict(_)
            | MarketError::AlreadyRated
            | MarketError::DuplicateReservation { .. }
            | MarketError::DuplicatePayment { .. } => Self::Conflict(message),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Domain(rule) => rule.into(),
            StoreError::Database(msg)
            | StoreError::Transient(msg)
            | StoreError::ConnectionLost(msg)
            | StoreError::Serialization(msg) => Self::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use readits_core::TransactionStatus;

    fn status_of(err: impl Into<ApiError>) -> StatusCode {
        err.into().into_response().status()
    }

    #[test]
    fn rule_violations_map_to_client_errors() {
        assert_eq!(
            status_of(MarketError::validation("bad")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(MarketError::unauthorized("no")),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_of(MarketError::not_found("rental", "x")),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(MarketError::InvalidState {
                action: "approve",
                status: TransactionStatus::Approved,
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(status_of(MarketError::AlreadyRated), StatusCode::CONFLICT);
        assert_eq!(
            status_of(MarketError::InsufficientFunds {
                available: 1,
                required: 2,
            }),
            StatusCode::PAYMENT_REQUIRED
        );
    }

    #[test]
    fn infrastructure_failures_are_internal() {
        assert_eq!(
            status_of(StoreError::Transient("gone".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
