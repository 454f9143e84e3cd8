//! Shell configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `SHELL_BASE_URL` - Public origin clients use to reach the shell
//! - `SHELL_UPSTREAM_URL` - Origin of the static site being fronted
//!
//! ## Optional
//! - `SHELL_HOST` - Bind address (default: 127.0.0.1)
//! - `SHELL_PORT` - Listen port (default: 3000)
//! - `SHELL_PRECACHE_MANIFEST` - Pre-cache manifest path (default: precache.json)
//! - `SHELL_CACHE_VERSION` - Overrides the manifest's version
//! - `SHELL_CACHE_PREFIX` - Store name prefix (default: site-cache)
//! - `SHELL_CACHE_MAX_ENTRIES` - Entries per store (default: 10000)
//! - `SHELL_CACHE_MAX_ENTRY_BYTES` - Largest cacheable body (default: 5 MiB)
//! - `SHELL_ADMIN_PATH` - Path prefix never intercepted (default: /admin)
//! - `SHELL_IMMEDIATE_TAKEOVER` - Activate new generations at once (default: true)
//! - `SHELL_UPSTREAM_TIMEOUT_SECS` - Upstream request timeout (default: 30)
//! - `SHELL_DATA_DIR` - Cart storage directory (default: ./data)
//! - `SHELL_CONTROL_TOKEN` - Bearer token for `POST /_shell/*` (unset: disabled)
//! - `SHELL_LOG_FORMAT` - `text` or `json` (default: text)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use site_shell_core::CacheVersion;
use thiserror::Error;
use url::Url;

const DEFAULT_MAX_ENTRIES: u64 = 10_000;
const DEFAULT_MAX_ENTRY_BYTES: usize = 5 * 1024 * 1024;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Shell application configuration.
#[derive(Debug, Clone)]
pub struct ShellConfig {
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Public origin; requests for it are same-origin
    pub base_url: Url,
    /// Origin the network fetches are forwarded to
    pub upstream_url: Url,
    /// Upstream request timeout
    pub upstream_timeout: Duration,
    /// Offline cache configuration
    pub cache: CacheSettings,
    /// Directory for the cart's durable storage
    pub data_dir: PathBuf,
    /// Bearer token guarding install and activate; `None` disables them
    pub control_token: Option<SecretString>,
    /// Log output format
    pub log_format: LogFormat,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
}

/// Offline cache configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// Pre-cache manifest file
    pub manifest_path: PathBuf,
    /// Version overriding the one in the manifest
    pub version_override: Option<CacheVersion>,
    /// Prefix of every store name
    pub store_prefix: String,
    /// Maximum entries per store
    pub max_entries: u64,
    /// Largest response body that will be cached
    pub max_entry_bytes: usize,
    /// Path prefix that is never intercepted
    pub admin_path: String,
    /// Whether a freshly installed generation takes over without waiting
    pub immediate_takeover: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            manifest_path: PathBuf::from("precache.json"),
            version_override: None,
            store_prefix: "site-cache".to_string(),
            max_entries: DEFAULT_MAX_ENTRIES,
            max_entry_bytes: DEFAULT_MAX_ENTRY_BYTES,
            admin_path: "/admin".to_string(),
            immediate_takeover: true,
        }
    }
}

impl ShellConfig {
    /// Configuration with defaults for everything but the two origins.
    #[must_use]
    pub fn new(base_url: Url, upstream_url: Url) -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 3000,
            base_url,
            upstream_url,
            upstream_timeout: Duration::from_secs(30),
            cache: CacheSettings::default(),
            data_dir: PathBuf::from("data"),
            control_token: None,
            log_format: LogFormat::default(),
            sentry_dsn: None,
            sentry_environment: None,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let base_url = parse_env::<Url>("SHELL_BASE_URL", &get_required_env("SHELL_BASE_URL")?)?;
        let upstream_url =
            parse_env::<Url>("SHELL_UPSTREAM_URL", &get_required_env("SHELL_UPSTREAM_URL")?)?;

        let mut config = Self::new(base_url, upstream_url);
        config.host = parse_env("SHELL_HOST", &get_env_or_default("SHELL_HOST", "127.0.0.1"))?;
        config.port = parse_env("SHELL_PORT", &get_env_or_default("SHELL_PORT", "3000"))?;
        config.upstream_timeout = Duration::from_secs(parse_env(
            "SHELL_UPSTREAM_TIMEOUT_SECS",
            &get_env_or_default("SHELL_UPSTREAM_TIMEOUT_SECS", "30"),
        )?);
        config.cache = CacheSettings::from_env()?;
        config.data_dir = PathBuf::from(get_env_or_default("SHELL_DATA_DIR", "data"));
        config.control_token = get_optional_env("SHELL_CONTROL_TOKEN").map(SecretString::from);
        config.log_format =
            parse_env("SHELL_LOG_FORMAT", &get_env_or_default("SHELL_LOG_FORMAT", "text"))?;
        config.sentry_dsn = get_optional_env("SENTRY_DSN");
        config.sentry_environment = get_optional_env("SENTRY_ENVIRONMENT");

        Ok(config)
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl CacheSettings {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let version_override = get_optional_env("SHELL_CACHE_VERSION")
            .map(|v| parse_env::<CacheVersion>("SHELL_CACHE_VERSION", &v))
            .transpose()?;

        Ok(Self {
            manifest_path: get_optional_env("SHELL_PRECACHE_MANIFEST")
                .map_or(defaults.manifest_path, PathBuf::from),
            version_override,
            store_prefix: get_env_or_default("SHELL_CACHE_PREFIX", &defaults.store_prefix),
            max_entries: get_optional_env("SHELL_CACHE_MAX_ENTRIES")
                .map(|v| parse_env("SHELL_CACHE_MAX_ENTRIES", &v))
                .transpose()?
                .unwrap_or(defaults.max_entries),
            max_entry_bytes: get_optional_env("SHELL_CACHE_MAX_ENTRY_BYTES")
                .map(|v| parse_env("SHELL_CACHE_MAX_ENTRY_BYTES", &v))
                .transpose()?
                .unwrap_or(defaults.max_entry_bytes),
            admin_path: normalize_admin_path(&get_env_or_default(
                "SHELL_ADMIN_PATH",
                &defaults.admin_path,
            )),
            immediate_takeover: get_optional_env("SHELL_IMMEDIATE_TAKEOVER")
                .map(|v| parse_bool("SHELL_IMMEDIATE_TAKEOVER", &v))
                .transpose()?
                .unwrap_or(defaults.immediate_takeover),
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
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    get_optional_env(key).unwrap_or_else(|| default.to_string())
}

/// Parse a value, naming the variable in the error.
fn parse_env<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            format!("expected a boolean, got '{other}'"),
        )),
    }
}

/// Leading slash, no trailing slash.
fn normalize_admin_path(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}
