//! Cart sync configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `SUPABASE_URL` - Project URL (e.g., `https://abcd.supabase.co`)
//! - `SUPABASE_ANON_KEY` - Public anon key sent as `apikey`
//!
//! ## Optional
//! - `SUPABASE_ACCESS_TOKEN` - Signed-in user's session JWT
//! - `CART_REMOTE_TIMEOUT_MS` - Per-call timeout (default: 10000)
//! - `CART_RETRY_MAX_ATTEMPTS` - Attempts for idempotent calls (default: 3)
//! - `CART_RETRY_BASE_DELAY_MS` - First backoff delay (default: 200)
//! - `CART_RETRY_MAX_DELAY_MS` - Backoff ceiling (default: 5000)
//! - `CART_IDENTITY_CACHE_TTL_SECS` - How long a resolved user is reused (default: 60)
//! - `CART_DATABASE_URL` - Direct `PostgreSQL` connection (falls back to `DATABASE_URL`)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::str::FromStr;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use url::Url;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "xxx",
    "insert",
    "put-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Top-level configuration for the cart sync engine and its binaries.
#[derive(Debug, Clone)]
pub struct CartSyncConfig {
    /// Supabase project settings
    pub supabase: SupabaseConfig,
    /// Timeout and retry policy for remote calls
    pub sync: SyncConfig,
    /// Direct database connection, used by `PgCartStore` and migrations
    pub database_url: Option<SecretString>,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
}

/// Supabase project configuration.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct SupabaseConfig {
    /// Project base URL
    pub url: Url,
    /// Public anon key
    pub anon_key: SecretString,
    /// Session access token of the signed-in user
    pub access_token: Option<SecretString>,
}

impl std::fmt::Debug for SupabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseConfig")
            .field("url", &self.url.as_str())
            .field("anon_key", &"[REDACTED]")
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Timeout and retry policy applied to every remote cart call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Upper bound for a single remote call
    pub remote_timeout: Duration,
    /// Total attempts for idempotent calls (1 disables retries)
    pub max_attempts: u32,
    /// Delay before the first retry; doubles per attempt
    pub base_delay: Duration,
    /// Ceiling for the backoff delay
    pub max_delay: Duration,
    /// How long a resolved identity is reused before asking again
    pub identity_cache_ttl: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote_timeout: Duration::from_secs(10),
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            identity_cache_ttl: Duration::from_secs(60),
        }
    }
}

impl CartSyncConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid, or
    /// if the anon key looks like a placeholder.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Ok(Self {
            supabase: SupabaseConfig::from_env()?,
            sync: SyncConfig::from_env()?,
            database_url: get_database_url("CART_DATABASE_URL"),
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
        })
    }
}

/// Load only the direct database URL, for tools that never talk to Supabase.
///
/// Calls `dotenvy::dotenv()` like [`CartSyncConfig::from_env`].
#[must_use]
pub fn database_url_from_env() -> Option<SecretString> {
    let _ = dotenvy::dotenv();
    get_database_url("CART_DATABASE_URL")
}

impl SupabaseConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let raw_url = get_required_env("SUPABASE_URL")?;
        let url = Url::parse(&raw_url)
            .map_err(|e| ConfigError::InvalidEnvVar("SUPABASE_URL".to_string(), e.to_string()))?;

        let anon_key = get_required_env("SUPABASE_ANON_KEY")?;
        reject_placeholder(&anon_key, "SUPABASE_ANON_KEY")?;

        Ok(Self {
            url,
            anon_key: SecretString::from(anon_key),
            access_token: get_optional_env("SUPABASE_ACCESS_TOKEN").map(SecretString::from),
        })
    }

    /// Bearer token for requests: the user's session if signed in, else the anon key.
    #[must_use]
    pub fn bearer_token(&self) -> &str {
        self.access_token
            .as_ref()
            .unwrap_or(&self.anon_key)
            .expose_secret()
    }
}

impl SyncConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let max_attempts = parse_env_or("CART_RETRY_MAX_ATTEMPTS", defaults.max_attempts)?;
        if max_attempts == 0 {
            return Err(ConfigError::InvalidEnvVar(
                "CART_RETRY_MAX_ATTEMPTS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            remote_timeout: millis_env_or("CART_REMOTE_TIMEOUT_MS", defaults.remote_timeout)?,
            max_attempts,
            base_delay: millis_env_or("CART_RETRY_BASE_DELAY_MS", defaults.base_delay)?,
            max_delay: millis_env_or("CART_RETRY_MAX_DELAY_MS", defaults.max_delay)?,
            identity_cache_ttl: Duration::from_secs(parse_env_or(
                "CART_IDENTITY_CACHE_TTL_SECS",
                defaults.identity_cache_ttl.as_secs(),
            )?),
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

/// Get an optional environment variable, treating empty values as unset.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get database URL with fallback to generic `DATABASE_URL`.
fn get_database_url(primary_key: &str) -> Option<SecretString> {
    get_optional_env(primary_key)
        .or_else(|| get_optional_env("DATABASE_URL"))
        .map(SecretString::from)
}

/// Parse an environment variable, falling back to `default` when unset.
fn parse_env_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_optional_env(key).map_or(Ok(default), |raw| parse_value(key, &raw))
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// Read a millisecond duration, falling back to `default` when unset.
fn millis_env_or(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    parse_env_or(key, default_ms).map(Duration::from_millis)
}

/// Reject obvious placeholder values copied from setup docs.
fn reject_placeholder(value: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = value.to_lowercase();

    if let Some(pattern) = PLACEHOLDER_PATTERNS.iter().find(|p| lower.contains(**p)) {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!("appears to be a placeholder (contains '{pattern}')"),
        ));
    }

    Ok(())
}
