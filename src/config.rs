//! Application configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from environment variables with sensible defaults
//! for development. In production, configure via environment variables or a `.env` file.
//!
//! # Security Configuration
//!
//! - `JWT_SECRET`: HMAC secret for identity tokens (required, never logged)
//! - `DEBUG_ENDPOINTS`: Serve `/debug/*` routes (default: false, 403 otherwise)
//! - `TRUSTED_PROXIES`: CIDR ranges whose forwarding headers are trusted
//! - `PUBLIC_PATHS`: Routes served without a bearer token (entries must start
//!   with `/`; others are skipped with a warning)
//!
//! # Lifecycle
//!
//! - `SHUTDOWN_GRACE_SECS`: How long in-flight requests may run after a
//!   termination signal (default: 5)

use std::env;
use std::fmt;
use std::time::Duration;

use crate::error::{AppError, AppResult};

/// Default trusted proxy ranges (RFC 1918 private networks).
pub const DEFAULT_TRUSTED_PROXIES: [&str; 3] = ["10.0.0.0/8", "172.16.0.0/12", "192.168.0.0/16"];

/// Lowest bcrypt cost accepted for `PASSWORD_HASH_COST`.
pub const MIN_HASH_COST: u32 = 4;

/// Highest bcrypt cost accepted for `PASSWORD_HASH_COST`.
pub const MAX_HASH_COST: u32 = 31;

/// Default routes reachable without authentication.
pub const DEFAULT_PUBLIC_PATHS: [&str; 4] = ["/auth/login", "/auth/register", "/health", "/ready"];

/// A secret value whose `Debug` output never reveals the contents.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret([redacted])")
    }
}

/// Output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Application configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 8080)
    pub port: u16,

    /// Prefix all API routes are nested under (default: "/lms/api/v0").
    /// Empty or "/" serves the API at the root.
    pub service_path: String,

    // =========================================================================
    // Authentication Configuration
    // =========================================================================
    /// HMAC secret used to sign identity tokens
    pub jwt_secret: Secret,

    /// Lifetime of issued tokens (default: 24 hours)
    pub token_ttl: Duration,

    /// bcrypt work factor for stored password hashes
    pub password_hash_cost: u32,

    /// Routes that pass the gate without a bearer token.
    /// Matched exactly against the path below `service_path`.
    pub public_paths: Vec<String>,

    // =========================================================================
    // Gateway Configuration
    // =========================================================================
    /// Serve debug endpoints. When false, any debug path gets 403.
    pub debug_endpoints: bool,

    /// Trusted proxy CIDR ranges used when resolving the client address
    /// from `X-Forwarded-For`.
    ///
    /// Format: Comma-separated CIDR notation (e.g., "10.0.0.0/8,172.16.0.0/12")
    /// Default: RFC 1918 private networks
    pub trusted_proxies: Vec<String>,

    /// Requests per second limit per client (default: 0 = disabled)
    pub rate_limit_rps: u32,

    /// Burst capacity - allows temporary spikes above rps limit (default: 50)
    pub rate_limit_burst: u32,

    /// Maximum request body size in bytes (default: 50MB, uploads included)
    pub max_request_body_size: usize,

    /// Comma-separated list of allowed CORS origins
    /// Use "*" to allow all origins (not recommended for production)
    pub cors_allowed_origins: Vec<String>,

    // =========================================================================
    // Lifecycle Configuration
    // =========================================================================
    /// Grace period for in-flight requests after a termination signal
    pub shutdown_grace: Duration,

    // =========================================================================
    // Object Storage Configuration
    // =========================================================================
    /// Bucket uploads are written to (default: "lms")
    pub storage_bucket: String,

    /// Base URL presigned links point at
    pub storage_public_url: String,

    /// Key for signing presigned URLs. `None` generates one per process.
    pub storage_signing_key: Option<Secret>,

    /// Lifetime of presigned download URLs (default: 24 hours)
    pub presign_ttl: Duration,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log level (e.g., "info", "debug", "trace")
    pub log_level: String,

    /// Log output format ("text" or "json")
    pub log_format: LogFormat,

    /// Port for Prometheus metrics endpoint (default: 0 = disabled)
    pub metrics_port: u16,

    /// Interval for the background telemetry summary (0 = disabled)
    pub telemetry_report_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if any required configuration is missing
    /// or invalid (e.g., unset `JWT_SECRET`, non-numeric PORT value).
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 8080)?,
            service_path: env::var("SERVICE_PATH").unwrap_or_else(|_| "/lms/api/v0".to_string()),

            // Authentication
            jwt_secret: Secret::new(env::var("JWT_SECRET").unwrap_or_default()),
            token_ttl: Duration::from_secs(Self::parse_env("TOKEN_TTL_SECS", 86_400)?),
            password_hash_cost: Self::parse_env("PASSWORD_HASH_COST", bcrypt::DEFAULT_COST)?,
            public_paths: Self::parse_list("PUBLIC_PATHS", &DEFAULT_PUBLIC_PATHS),

            // Gateway
            debug_endpoints: Self::parse_env("DEBUG_ENDPOINTS", false)?,
            trusted_proxies: Self::parse_list("TRUSTED_PROXIES", &DEFAULT_TRUSTED_PROXIES),
            rate_limit_rps: Self::parse_env("RATE_LIMIT_RPS", 0)?,
            rate_limit_burst: Self::parse_env("RATE_LIMIT_BURST", 50)?,
            max_request_body_size: Self::parse_env("MAX_REQUEST_BODY_SIZE", 50 * 1024 * 1024)?,
            cors_allowed_origins: Self::parse_list("CORS_ALLOWED_ORIGINS", &["*"]),

            // Lifecycle
            shutdown_grace: Duration::from_secs(Self::parse_env("SHUTDOWN_GRACE_SECS", 5)?),

            // Object storage
            storage_bucket: env::var("STORAGE_BUCKET").unwrap_or_else(|_| "lms".to_string()),
            storage_public_url: env::var("STORAGE_PUBLIC_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:9000".to_string()),
            storage_signing_key: env::var("STORAGE_SIGNING_KEY")
                .ok()
                .filter(|k| !k.is_empty())
                .map(Secret::new),
            presign_ttl: Duration::from_secs(Self::parse_env("PRESIGN_TTL_SECS", 86_400)?),

            // Observability
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            log_format: Self::parse_log_format()?,
            metrics_port: Self::parse_env("METRICS_PORT", 0)?,
            telemetry_report_interval: Duration::from_secs(Self::parse_env(
                "TELEMETRY_REPORT_SECS",
                60,
            )?),
        };

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if validation fails.
    pub fn validate(&self) -> AppResult<()> {
        if self.jwt_secret.is_empty() {
            return Err(AppError::ConfigError(
                "JWT_SECRET must be set to a non-empty value".to_string(),
            ));
        }

        if self.token_ttl.is_zero() {
            return Err(AppError::ConfigError(
                "TOKEN_TTL_SECS must be greater than 0".to_string(),
            ));
        }

        if !(MIN_HASH_COST..=MAX_HASH_COST).contains(&self.password_hash_cost) {
            return Err(AppError::ConfigError(format!(
                "PASSWORD_HASH_COST must be between {MIN_HASH_COST} and {MAX_HASH_COST}"
            )));
        }

        if self.max_request_body_size == 0 {
            return Err(AppError::ConfigError(
                "MAX_REQUEST_BODY_SIZE must be greater than 0".to_string(),
            ));
        }

        if !self.service_path.is_empty() && !self.service_path.starts_with('/') {
            return Err(AppError::ConfigError(format!(
                "SERVICE_PATH must start with '/' (got {:?})",
                self.service_path
            )));
        }

        if self.storage_bucket.is_empty() {
            return Err(AppError::ConfigError(
                "STORAGE_BUCKET must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Service prefix with any trailing slash removed; `None` for the root.
    pub fn service_prefix(&self) -> Option<&str> {
        let trimmed = self.service_path.trim_end_matches('/');
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    }

    /// Check if rate limiting is enabled.
    pub fn rate_limiting_enabled(&self) -> bool {
        self.rate_limit_rps > 0
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        if self.metrics_enabled() {
            Some(std::net::SocketAddr::from((
                [0, 0, 0, 0],
                self.metrics_port,
            )))
        } else {
            None
        }
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .trim()
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// Parse a comma-separated list, falling back to `default` when unset.
    fn parse_list(name: &str, default: &[&str]) -> Vec<String> {
        match env::var(name) {
            Ok(raw) => raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            Err(_) => default.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    fn parse_log_format() -> AppResult<LogFormat> {
        match env::var("LOG_FORMAT") {
            Err(_) => Ok(LogFormat::Text),
            Ok(v) => match v.trim().to_ascii_lowercase().as_str() {
                "" | "text" | "pretty" => Ok(LogFormat::Text),
                "json" => Ok(LogFormat::Json),
                other => Err(AppError::ConfigError(format!(
                    "Invalid LOG_FORMAT: {other} (expected text or json)"
                ))),
            },
        }
    }
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Server
            host: "0.0.0.0".to_string(),
            port: 8080,
            service_path: "/lms/api/v0".to_string(),
            // Authentication
            jwt_secret: Secret::new("dev-only-secret-change-me"),
            token_ttl: Duration::from_secs(86_400),
            password_hash_cost: bcrypt::DEFAULT_COST,
            public_paths: DEFAULT_PUBLIC_PATHS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            // Gateway
            debug_endpoints: false,
            trusted_proxies: DEFAULT_TRUSTED_PROXIES
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            rate_limit_rps: 0,
            rate_limit_burst: 50,
            max_request_body_size: 50 * 1024 * 1024,
            cors_allowed_origins: vec!["*".to_string()],
            // Lifecycle
            shutdown_grace: Duration::from_secs(5),
            // Object storage
            storage_bucket: "lms".to_string(),
            storage_public_url: "http://127.0.0.1:9000".to_string(),
            storage_signing_key: None,
            presign_ttl: Duration::from_secs(86_400),
            // Observability
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            metrics_port: 0,
            telemetry_report_interval: Duration::from_secs(60),
        }
    }
}
