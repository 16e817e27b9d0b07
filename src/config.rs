//! Configuration module for healthwatch.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Largest configurable stats window span, in hours (one year).
pub const MAX_WINDOW_HOURS_LIMIT: i64 = 24 * 366;
/// Largest configurable retention bound, in days.
pub const MAX_RETENTION_DAYS_LIMIT: i64 = 36_500;
/// Largest configurable per-probe jitter.
pub const MAX_PROBE_JITTER: Duration = Duration::from_secs(60);

/// A configuration value that parsed but cannot be used.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("HEALTHWATCH_{name} must be between {min} and {max}, got {got}")]
    OutOfRange {
        name: &'static str,
        got: i64,
        min: i64,
        max: i64,
    },
    #[error("retention bounds are inverted: minimum {min_days} days exceeds maximum {max_days} days")]
    InvertedRetentionBounds { min_days: i64, max_days: i64 },
}

fn check_range(name: &'static str, got: i64, min: i64, max: i64) -> Result<(), ConfigError> {
    if (min..=max).contains(&got) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { name, got, min, max })
    }
}

/// What the scheduler does when a firing arrives while a run is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlapPolicy {
    /// Skip the new firing and log it.
    Skip,
    /// Start another run; both write their own records.
    Allow,
}

impl FromStr for OverlapPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "skip" => Ok(OverlapPolicy::Skip),
            "allow" => Ok(OverlapPolicy::Allow),
            other => Err(format!("unknown overlap policy: {}", other)),
        }
    }
}

/// Bounds applied at the stats and retention boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionBounds {
    pub min_days: i64,
    pub max_days: i64,
}

impl Default for RetentionBounds {
    fn default() -> Self {
        Self {
            min_days: 7,
            max_days: 365,
        }
    }
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the reporting API (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "healthwatch.db")
    pub db_path: String,
    /// Time between scheduled runs (default: 30s)
    pub check_interval: Duration,
    /// Maximum probes in flight within one run (default: 16)
    pub max_in_flight: usize,
    /// Deadline for a whole run; unset means runs wait for every probe
    pub run_deadline: Option<Duration>,
    /// Upper bound of the random delay before each probe (default: 0)
    pub probe_jitter: Duration,
    pub overlap_policy: OverlapPolicy,
    /// Header carrying the installation API key (default: "X-API-Key")
    pub credential_header: String,
    pub retention_bounds: RetentionBounds,
    /// Days of logs kept by the background sweeper; unset disables it
    pub retention_days: Option<i64>,
    /// How often the background sweeper runs (default: 1h)
    pub retention_sweep_interval: Duration,
    /// Largest window a stats query may cover (default: 168h)
    pub max_window_hours: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "healthwatch.db".to_string(),
            check_interval: Duration::from_secs(30),
            max_in_flight: 16,
            run_deadline: None,
            probe_jitter: Duration::ZERO,
            overlap_policy: OverlapPolicy::Skip,
            credential_header: "X-API-Key".to_string(),
            retention_bounds: RetentionBounds::default(),
            retention_days: None,
            retention_sweep_interval: Duration::from_secs(3600),
            max_window_hours: 168,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Every variable is prefixed with `HEALTHWATCH_`. Values that do not
    /// parse are ignored in favour of the default; values that parse but
    /// fall outside their allowed range are an error.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parsed = |name: &str| -> Option<String> {
            lookup(&format!("HEALTHWATCH_{}", name)).filter(|v| !v.trim().is_empty())
        };
        let mut cfg = Self::default();

        if let Some(port) = parsed("HTTP_PORT").and_then(|v| v.parse().ok()) {
            cfg.http_port = port;
        }
        if let Some(db_path) = parsed("DB_PATH") {
            cfg.db_path = db_path;
        }
        if let Some(secs) = parsed("CHECK_INTERVAL_SECS").and_then(|v| v.parse::<u64>().ok()) {
            if secs > 0 {
                cfg.check_interval = Duration::from_secs(secs);
            }
        }
        if let Some(n) = parsed("MAX_IN_FLIGHT").and_then(|v| v.parse::<usize>().ok()) {
            if n > 0 {
                cfg.max_in_flight = n;
            }
        }
        if let Some(secs) = parsed("RUN_DEADLINE_SECS").and_then(|v| v.parse::<u64>().ok()) {
            cfg.run_deadline = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(ms) = parsed("PROBE_JITTER_MS").and_then(|v| v.parse().ok()) {
            cfg.probe_jitter = Duration::from_millis(ms);
        }
        if let Some(policy) = parsed("OVERLAP_POLICY") {
            match policy.parse() {
                Ok(p) => cfg.overlap_policy = p,
                Err(e) => tracing::warn!("Ignoring HEALTHWATCH_OVERLAP_POLICY: {}", e),
            }
        }
        if let Some(header) = parsed("CREDENTIAL_HEADER") {
            cfg.credential_header = header;
        }
        if let Some(days) = parsed("RETENTION_MIN_DAYS").and_then(|v| v.parse().ok()) {
            cfg.retention_bounds.min_days = days;
        }
        if let Some(days) = parsed("RETENTION_MAX_DAYS").and_then(|v| v.parse().ok()) {
            cfg.retention_bounds.max_days = days;
        }
        if let Some(days) = parsed("RETENTION_DAYS").and_then(|v| v.parse().ok()) {
            cfg.retention_days = Some(days);
        }
        if let Some(secs) = parsed("RETENTION_SWEEP_SECS").and_then(|v| v.parse::<u64>().ok()) {
            if secs > 0 {
                cfg.retention_sweep_interval = Duration::from_secs(secs);
            }
        }
        if let Some(hours) = parsed("MAX_WINDOW_HOURS").and_then(|v| v.parse().ok()) {
            cfg.max_window_hours = hours;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject bounds that would make every stats or retention request fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("MAX_WINDOW_HOURS", self.max_window_hours, 1, MAX_WINDOW_HOURS_LIMIT)?;

        let jitter_ms = i64::try_from(self.probe_jitter.as_millis()).unwrap_or(i64::MAX);
        check_range("PROBE_JITTER_MS", jitter_ms, 0, MAX_PROBE_JITTER.as_millis() as i64)?;

        let RetentionBounds { min_days, max_days } = self.retention_bounds;
        check_range("RETENTION_MIN_DAYS", min_days, 1, MAX_RETENTION_DAYS_LIMIT)?;
        check_range("RETENTION_MAX_DAYS", max_days, 1, MAX_RETENTION_DAYS_LIMIT)?;
        if min_days > max_days {
            return Err(ConfigError::InvertedRetentionBounds { min_days, max_days });
        }

        if let Some(days) = self.retention_days {
            check_range("RETENTION_DAYS", days, min_days, max_days)?;
        }

        Ok(())
    }
}
