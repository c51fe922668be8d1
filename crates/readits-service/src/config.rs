//! Service configuration.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use serde::Deserialize;

use readits_core::EscrowPolicy;
use readits_store::RetryPolicy;

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// PostgreSQL URL. Without one the service runs on the in-memory store.
    pub database_url: Option<String>,

    /// Connection pool size (default: 10).
    pub database_max_connections: u32,

    /// HS256 secret for bearer tokens. Without one every authenticated route answers 401.
    pub jwt_secret: Option<String>,

    /// Shared token Xendit sends in `x-callback-token`.
    pub xendit_callback_token: Option<String>,

    /// Seconds between janitor sweeps (default: 60).
    pub janitor_interval_seconds: u64,

    /// How long a pending reservation waits for the owner (default: 24).
    pub reservation_ttl_hours: i64,

    /// How far ahead of a meetup the confirmation window opens (default: 60).
    pub confirmation_window_minutes: i64,

    /// Offset of the marketplace's local time from UTC (default: 8).
    pub local_utc_offset_hours: i32,

    /// Platform fee withheld from owner payouts, in basis points (default: 0).
    pub platform_fee_bps: u32,

    /// Retries for transient database failures (default: 3).
    pub store_max_retries: u32,

    /// Optional endpoint that receives every notification as JSON.
    pub notification_webhook_url: Option<String>,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,
}

/// Xendit secrets file structure.
#[derive(Debug, Deserialize)]
struct XenditSecrets {
    callback_token: String,
}

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            database_url: std::env::var("DATABASE_URL").ok(),
            database_max_connections: env_or(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
            jwt_secret: std::env::var("JWT_SECRET").ok(),
            xendit_callback_token: load_xendit_token(),
            janitor_interval_seconds: env_or(
                "JANITOR_INTERVAL_SECONDS",
                defaults.janitor_interval_seconds,
            ),
            reservation_ttl_hours: env_or("RESERVATION_TTL_HOURS", defaults.reservation_ttl_hours),
            confirmation_window_minutes: env_or(
                "CONFIRMATION_WINDOW_MINUTES",
                defaults.confirmation_window_minutes,
            ),
            local_utc_offset_hours: env_or(
                "LOCAL_UTC_OFFSET_HOURS",
                defaults.local_utc_offset_hours,
            ),
            platform_fee_bps: env_or("PLATFORM_FEE_BPS", defaults.platform_fee_bps),
            store_max_retries: env_or("STORE_MAX_RETRIES", defaults.store_max_retries),
            notification_webhook_url: std::env::var("NOTIFICATION_WEBHOOK_URL").ok(),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: env_or("MAX_BODY_BYTES", defaults.max_body_bytes),
            request_timeout_seconds: env_or(
                "REQUEST_TIMEOUT_SECONDS",
                defaults.request_timeout_seconds,
            ),
        }
    }

    /// Lifetime of a pending reservation.
    #[must_use]
    pub fn reservation_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.reservation_ttl_hours)
    }

    /// Lead time before a meetup at which its confirmation window opens.
    #[must_use]
    pub fn confirmation_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.confirmation_window_minutes)
    }

    /// The marketplace's local offset. Out-of-range values fall back to UTC.
    #[must_use]
    pub fn local_offset(&self) -> FixedOffset {
        self.local_utc_offset_hours
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| Utc.fix())
    }

    /// Fee policy applied at approval.
    #[must_use]
    pub fn escrow_policy(&self) -> EscrowPolicy {
        EscrowPolicy {
            platform_fee_bps: self.platform_fee_bps,
        }
    }

    /// Retry policy for the database store.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.store_max_retries,
            ..RetryPolicy::default()
        }
    }

    /// Pause between janitor sweeps.
    #[must_use]
    pub fn janitor_interval(&self) -> Duration {
        Duration::from_secs(self.janitor_interval_seconds.max(1))
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Load the Xendit callback token from file or environment.
fn load_xendit_token() -> Option<String> {
    let secret_paths = [".secrets/xendit.json", "../.secrets/xendit.json"];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<XenditSecrets>(path) {
            tracing::info!(path = %path, "Loaded Xendit secrets from file");
            return Some(secrets.callback_token);
        }
    }

    tracing::debug!("Xendit secrets file not found, using environment variables");
    std::env::var("XENDIT_CALLBACK_TOKEN").ok()
}

/// Load secrets from a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, std::io::Error> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Secrets file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            database_url: None,
            database_max_connections: 10,
            jwt_secret: None,
            xendit_callback_token: None,
            janitor_interval_seconds: 60,
            reservation_ttl_hours: 24,
            confirmation_window_minutes: 60,
            local_utc_offset_hours: 8,
            platform_fee_bps: 0,
            store_max_retries: 3,
            notification_webhook_url: None,
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ServiceConfig::default();
        assert_eq!(config.reservation_ttl(), chrono::Duration::hours(24));
        assert_eq!(config.confirmation_window(), chrono::Duration::minutes(60));
        assert_eq!(config.local_offset().local_minus_utc(), 8 * 3600);
        assert_eq!(config.escrow_policy().platform_fee_bps, 0);
        assert_eq!(config.retry_policy().max_retries, 3);
    }

    #[test]
    fn out_of_range_offset_falls_back_to_utc() {
        let config = ServiceConfig {
            local_utc_offset_hours: 30,
            ..ServiceConfig::default()
        };
        assert_eq!(config.local_offset().local_minus_utc(), 0);
    }
}
