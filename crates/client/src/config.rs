//! Client configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `TABLEFARE_API_BASE_URL` - Base URL of the order backend
//! - `TABLEFARE_PAYMENT_KEY_ID` - Public key id the payment widget is opened with
//!
//! ## Optional
//! - `TABLEFARE_STORAGE_DIR` - Directory for durable client state (default: `.tablefare`)
//! - `TABLEFARE_TAX_RATE` - Advisory tax rate for display totals (default: 0.18)
//! - `TABLEFARE_CURRENCY` - ISO 4217 currency code (default: INR)
//! - `TABLEFARE_REQUEST_TIMEOUT_SECS` - Per-request timeout (default: 10)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment tag

use std::path::PathBuf;
use std::time::Duration;

use rust_decimal::Decimal;
use thiserror::Error;
use url::Url;

use tablefare_core::CurrencyCode;

const DEFAULT_STORAGE_DIR: &str = ".tablefare";
const DEFAULT_TAX_RATE: &str = "0.18";
const DEFAULT_TIMEOUT_SECS: &str = "10";

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Ordering client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the order backend.
    pub api_base_url: Url,
    /// Directory holding durable client state (session, cart caches,
    /// in-flight checkout attempts).
    pub storage_dir: PathBuf,
    /// Public key id handed to the payment widget (safe to expose).
    pub payment_key_id: String,
    /// Advisory tax rate applied to display totals. The backend recomputes
    /// totals authoritatively.
    pub tax_rate: Decimal,
    /// Currency all carts and charges are denominated in.
    pub currency: CurrencyCode,
    /// Per-request timeout for backend calls.
    pub request_timeout: Duration,
    /// Sentry DSN for error tracking.
    pub sentry_dsn: Option<String>,
    /// Sentry environment tag.
    pub sentry_environment: Option<String>,
}

impl ClientConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or any
    /// variable fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let api_base_url = parse_env("TABLEFARE_API_BASE_URL", &get_required_env("TABLEFARE_API_BASE_URL")?)?;
        let payment_key_id = get_required_env("TABLEFARE_PAYMENT_KEY_ID")?;
        let storage_dir =
            PathBuf::from(get_env_or_default("TABLEFARE_STORAGE_DIR", DEFAULT_STORAGE_DIR));
        let tax_rate = parse_env(
            "TABLEFARE_TAX_RATE",
            &get_env_or_default("TABLEFARE_TAX_RATE", DEFAULT_TAX_RATE),
        )?;
        let currency = parse_env(
            "TABLEFARE_CURRENCY",
            &get_env_or_default("TABLEFARE_CURRENCY", CurrencyCode::default().code()),
        )?;
        let timeout_secs: u64 = parse_env(
            "TABLEFARE_REQUEST_TIMEOUT_SECS",
            &get_env_or_default("TABLEFARE_REQUEST_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS),
        )?;

        Ok(Self {
            api_base_url,
            storage_dir,
            payment_key_id,
            tax_rate,
            currency,
            request_timeout: Duration::from_secs(timeout_secs),
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse a string value, reporting the variable name on failure.
fn parse_env<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_url() {
        let url: Url = parse_env("X", "https://api.tablefare.app").unwrap();
        assert_eq!(url.host_str(), Some("api.tablefare.app"));

        let err = parse_env::<Url>("TABLEFARE_API_BASE_URL", "not a url").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(name, _) if name == "TABLEFARE_API_BASE_URL"));
    }

    #[test]
    fn test_parse_env_tax_rate() {
        let rate: Decimal = parse_env("X", "0.18").unwrap();
        assert_eq!(rate.to_string(), "0.18");
    }

    #[test]
    fn test_parse_env_currency() {
        let currency: CurrencyCode = parse_env("X", "INR").unwrap();
        assert_eq!(currency, CurrencyCode::INR);

        assert!(parse_env::<CurrencyCode>("TABLEFARE_CURRENCY", "ZZZ").is_err());
    }
}
