//! Configuration module for the edge tracker.
//!
//! This module provides environment-based configuration: server credentials,
//! the shared encryption secret, device identity, collection and submission
//! intervals, movement thresholds, and durable store settings.

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Default collection server endpoint
const DEFAULT_SERVER_URL: &str = "https://alertr.de/chasr/submit.php";

/// Default store location, resolved relative to the executable
const DEFAULT_STORE_PATH: &str = "config/gps.json";

/// Default gpsd address
const DEFAULT_GPSD_ADDR: &str = "127.0.0.1:2947";

/// Default seconds between submissions
const DEFAULT_SUBMISSION_INTERVAL_SECS: u64 = 30;

/// Default minimum seconds between accepted fixes
const DEFAULT_COLLECTION_INTERVAL_SECS: u64 = 10;

/// Default number of samples per submitted chunk
const DEFAULT_CHUNK_SIZE: usize = 100;

/// Default number of consecutive unpack failures before reconnecting
const DEFAULT_MAX_FAILED_FIXES: u32 = 20;

/// Default pause between source reads
const DEFAULT_COLLECT_SLEEP_MS: u64 = 500;

/// Default movement tolerances
const DEFAULT_LAT_CHANGE: f64 = 0.0002;
const DEFAULT_LON_CHANGE: f64 = 0.0002;
const DEFAULT_ALT_CHANGE: f64 = 9.0;

/// Default HTTP request timeout
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

const MAX_SUBMISSION_INTERVAL_SECS: u64 = 3600;
const MAX_COLLECTION_INTERVAL_SECS: u64 = 86_400;
const MAX_CHUNK_SIZE: usize = 10_000;

/// Configuration for the edge tracker.
///
/// All settings are read from `EDGE_TRACKER_*` environment variables once at
/// startup and never mutated afterwards.
#[derive(Clone)]
pub struct Config {
    /// Account name on the collection server
    pub username: String,

    /// Account password on the collection server
    pub password: String,

    /// Shared secret the field encryption key is derived from
    pub secret: String,

    /// Device name sent in clear with every sample
    pub device_name: String,

    /// Full URL of the submission endpoint
    pub server_url: String,

    /// Time between submission rounds
    pub submission_interval: Duration,

    /// Minimum time between two accepted fixes
    pub collection_interval: Duration,

    /// Latitude change that counts as movement
    pub lat_change: f64,

    /// Longitude change that counts as movement
    pub lon_change: f64,

    /// Altitude change that counts as movement
    pub alt_change: f64,

    /// Maximum number of samples per request
    pub chunk_size: usize,

    /// Consecutive unpack failures tolerated before reconnecting to gpsd
    pub max_failed_fixes: u32,

    /// Pause between reads from gpsd
    pub collect_sleep: Duration,

    /// Force the store to stable storage after each write
    pub sync_always: bool,

    /// Location of the durable store
    pub store_path: PathBuf,

    /// Address of the gpsd daemon
    pub gpsd_addr: String,

    /// HTTP request timeout duration
    pub request_timeout: Duration,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("device_name", &self.device_name)
            .field("server_url", &self.server_url)
            .field("submission_interval", &self.submission_interval)
            .field("collection_interval", &self.collection_interval)
            .field("lat_change", &self.lat_change)
            .field("lon_change", &self.lon_change)
            .field("alt_change", &self.alt_change)
            .field("chunk_size", &self.chunk_size)
            .field("max_failed_fixes", &self.max_failed_fixes)
            .field("collect_sleep", &self.collect_sleep)
            .field("sync_always", &self.sync_always)
            .field("store_path", &self.store_path)
            .field("gpsd_addr", &self.gpsd_addr)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Error type for configuration loading failures
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub env_var: Option<String>,
}

impl ConfigError {
    fn for_var(env_var: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            env_var: Some(env_var.to_string()),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.env_var {
            Some(var) => write!(f, "Configuration error for {}: {}", var, self.message),
            None => write!(f, "Configuration error: {}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - a credential, the secret or the device name is missing or empty
    /// - the server URL is not `https://` (unless `EDGE_TRACKER_ALLOW_INSECURE` is set)
    /// - a numeric setting is not a valid number or is out of range
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use edge_tracker::config::Config;
    ///
    /// let config = Config::from_env().expect("Failed to load config");
    /// println!("Submitting to: {}", config.server_url);
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        let username = required("EDGE_TRACKER_USERNAME")?;
        let password = required("EDGE_TRACKER_PASSWORD")?;
        let secret = required("EDGE_TRACKER_SECRET")?;
        let device_name = required("EDGE_TRACKER_DEVICE_NAME")?;

        let server_url = env::var("EDGE_TRACKER_SERVER_URL")
            .unwrap_or_else(|_| DEFAULT_SERVER_URL.to_string());
        let allow_insecure = parse_bool("EDGE_TRACKER_ALLOW_INSECURE", false)?;
        if !server_url.starts_with("https://") && !allow_insecure {
            return Err(ConfigError::for_var(
                "EDGE_TRACKER_SERVER_URL",
                format!("'{}' is not an https:// URL", server_url),
            ));
        }

        let submission_interval_secs: u64 =
            parse_var("EDGE_TRACKER_SUBMISSION_INTERVAL_SECS", DEFAULT_SUBMISSION_INTERVAL_SECS)?;
        check_range(
            "EDGE_TRACKER_SUBMISSION_INTERVAL_SECS",
            submission_interval_secs,
            1,
            MAX_SUBMISSION_INTERVAL_SECS,
        )?;

        let collection_interval_secs: u64 =
            parse_var("EDGE_TRACKER_COLLECTION_INTERVAL_SECS", DEFAULT_COLLECTION_INTERVAL_SECS)?;
        check_range(
            "EDGE_TRACKER_COLLECTION_INTERVAL_SECS",
            collection_interval_secs,
            0,
            MAX_COLLECTION_INTERVAL_SECS,
        )?;

        let chunk_size: usize = parse_var("EDGE_TRACKER_CHUNK_SIZE", DEFAULT_CHUNK_SIZE)?;
        check_range("EDGE_TRACKER_CHUNK_SIZE", chunk_size, 1, MAX_CHUNK_SIZE)?;

        let max_failed_fixes: u32 =
            parse_var("EDGE_TRACKER_MAX_FAILED_FIXES", DEFAULT_MAX_FAILED_FIXES)?;
        check_range("EDGE_TRACKER_MAX_FAILED_FIXES", max_failed_fixes, 1, u32::MAX)?;

        let collect_sleep_ms: u64 =
            parse_var("EDGE_TRACKER_COLLECT_SLEEP_MS", DEFAULT_COLLECT_SLEEP_MS)?;

        let lat_change = parse_tolerance("EDGE_TRACKER_LAT_CHANGE", DEFAULT_LAT_CHANGE)?;
        let lon_change = parse_tolerance("EDGE_TRACKER_LON_CHANGE", DEFAULT_LON_CHANGE)?;
        let alt_change = parse_tolerance("EDGE_TRACKER_ALT_CHANGE", DEFAULT_ALT_CHANGE)?;

        let sync_always = parse_bool("EDGE_TRACKER_SYNC_ALWAYS", false)?;

        let store_path = resolve_path(
            &env::var("EDGE_TRACKER_STORE_PATH").unwrap_or_else(|_| DEFAULT_STORE_PATH.to_string()),
        );

        let gpsd_addr =
            env::var("EDGE_TRACKER_GPSD_ADDR").unwrap_or_else(|_| DEFAULT_GPSD_ADDR.to_string());

        let request_timeout_secs: u64 =
            parse_var("EDGE_TRACKER_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?;

        Ok(Self {
            username,
            password,
            secret,
            device_name,
            server_url,
            submission_interval: Duration::from_secs(submission_interval_secs),
            collection_interval: Duration::from_secs(collection_interval_secs),
            lat_change,
            lon_change,
            alt_change,
            chunk_size,
            max_failed_fixes,
            collect_sleep: Duration::from_millis(collect_sleep_ms),
            sync_always,
            store_path,
            gpsd_addr,
            request_timeout: Duration::from_secs(request_timeout_secs),
        })
    }
}

impl Default for Config {
    /// Create a default configuration with empty credentials.
    ///
    /// This is useful for testing or when environment variables are not set.
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            secret: String::new(),
            device_name: String::new(),
            server_url: DEFAULT_SERVER_URL.to_string(),
            submission_interval: Duration::from_secs(DEFAULT_SUBMISSION_INTERVAL_SECS),
            collection_interval: Duration::from_secs(DEFAULT_COLLECTION_INTERVAL_SECS),
            lat_change: DEFAULT_LAT_CHANGE,
            lon_change: DEFAULT_LON_CHANGE,
            alt_change: DEFAULT_ALT_CHANGE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_failed_fixes: DEFAULT_MAX_FAILED_FIXES,
            collect_sleep: Duration::from_millis(DEFAULT_COLLECT_SLEEP_MS),
            sync_always: false,
            store_path: PathBuf::from(DEFAULT_STORE_PATH),
            gpsd_addr: DEFAULT_GPSD_ADDR.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

/// Resolve a user-supplied path.
///
/// Absolute paths are kept, a leading `~` expands to `$HOME`, and anything
/// else is taken relative to the directory holding the executable.
pub fn resolve_path(input: &str) -> PathBuf {
    if input.starts_with('/') {
        return PathBuf::from(input);
    }

    if let Some(rest) = input.strip_prefix('~') {
        if let Ok(home) = env::var("HOME") {
            return PathBuf::from(format!("{}{}", home, rest));
        }
    }

    let base = env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));
    base.join(input)
}

fn required(env_var: &str) -> Result<String, ConfigError> {
    match env::var(env_var) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        Ok(_) => Err(ConfigError::for_var(env_var, "must not be empty")),
        Err(_) => Err(ConfigError::for_var(env_var, "is not set")),
    }
}

fn parse_var<T: FromStr>(env_var: &str, default: T) -> Result<T, ConfigError> {
    match env::var(env_var) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::for_var(env_var, format!("'{}' is not a valid number", value))),
        Err(_) => Ok(default),
    }
}

fn parse_tolerance(env_var: &str, default: f64) -> Result<f64, ConfigError> {
    let value: f64 = parse_var(env_var, default)?;
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::for_var(
            env_var,
            format!("tolerance {} must be a non-negative number", value),
        ));
    }
    Ok(value)
}

fn parse_bool(env_var: &str, default: bool) -> Result<bool, ConfigError> {
    match env::var(env_var) {
        Ok(value) => match value.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::for_var(
                env_var,
                format!("'{}' is not a valid boolean", value),
            )),
        },
        Err(_) => Ok(default),
    }
}

fn check_range<T>(env_var: &str, value: T, min: T, max: T) -> Result<(), ConfigError>
where
    T: PartialOrd + std::fmt::Display,
{
    if value < min {
        return Err(ConfigError::for_var(
            env_var,
            format!("{} is below minimum ({})", value, min),
        ));
    }
    if value > max {
        return Err(ConfigError::for_var(
            env_var,
            format!("{} exceeds maximum ({})", value, max),
        ));
    }
    Ok(())
}
