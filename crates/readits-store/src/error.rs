//! Error types for readits storage.

use readits_core::MarketError;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// The call was refused before it applied: pool exhausted, serialization failure or
    /// deadlock. Safe to retry.
    #[error("transient database error: {0}")]
    Transient(String),

    /// The connection dropped mid-call; the write may or may not have committed.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// A stored value could not be mapped to a typed record.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A marketplace rule refused the operation.
    #[error(transparent)]
    Domain(#[from] MarketError),
}

impl StoreError {
    /// Whether the call is known not to have applied and may be repeated.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Whether the call may have applied without its result reaching us.
    #[must_use]
    pub const fn is_indeterminate(&self) -> bool {
        matches!(self, Self::ConnectionLost(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Io(_) | sqlx::Error::WorkerCrashed => {
                Self::ConnectionLost(err.to_string())
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                Self::Transient(err.to_string())
            }
            sqlx::Error::Database(db)
                if matches!(db.code().as_deref(), Some("40001" | "40P01")) =>
            {
                Self::Transient(err.to_string())
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                Self::Serialization(err.to_string())
            }
            _ => Self::Database(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::Database(err.to_string())
    }
}
