//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Classified outcome of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProbeStatus {
    Up,
    Degraded,
    Down,
}

impl ProbeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeStatus::Up => "UP",
            ProbeStatus::Degraded => "DEGRADED",
            ProbeStatus::Down => "DOWN",
        }
    }
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProbeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UP" => Ok(ProbeStatus::Up),
            "DEGRADED" => Ok(ProbeStatus::Degraded),
            "DOWN" => Ok(ProbeStatus::Down),
            other => Err(format!("unknown probe status: {}", other)),
        }
    }
}

/// Severity attached to every log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Ok,
    Warning,
    Error,
    Critical,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Ok => "ok",
            AlertLevel::Warning => "warning",
            AlertLevel::Error => "error",
            AlertLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(AlertLevel::Ok),
            "warning" => Ok(AlertLevel::Warning),
            "error" => Ok(AlertLevel::Error),
            "critical" => Ok(AlertLevel::Critical),
            other => Err(format!("unknown alert level: {}", other)),
        }
    }
}

/// A grouping entity owning installations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub id: i64,
    pub name: String,
    pub is_active: bool,
}

/// A client's deployment of a service. Its API key is the probe credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Installation {
    pub id: i64,
    pub client_id: i64,
    pub name: String,
    pub api_key: String,
    pub is_active: bool,
}

/// A monitored endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub id: i64,
    pub installation_id: i64,
    /// Resolved through the owning installation when listed.
    pub client_id: i64,
    pub name: String,
    pub url: String,
    pub method: String,
    pub expected_code: u16,
    pub timeout_ms: u64,
    /// Credential read from the owning installation at listing time.
    #[serde(skip_serializing)]
    pub api_key: String,
    pub warning_ms: Option<i64>,
    pub error_ms: Option<i64>,
    pub is_active: bool,
}

impl Default for Target {
    fn default() -> Self {
        Self {
            id: 0,
            installation_id: 0,
            client_id: 0,
            name: String::new(),
            url: String::new(),
            method: "GET".to_string(),
            expected_code: 200,
            timeout_ms: 10_000,
            api_key: String::new(),
            warning_ms: None,
            error_ms: None,
            is_active: true,
        }
    }
}

impl Target {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// A log record about to be appended.
#[derive(Debug, Clone)]
pub struct NewLogRecord {
    pub target_id: i64,
    pub installation_id: i64,
    pub created_at: DateTime<Utc>,
    pub status: ProbeStatus,
    pub latency_ms: Option<i64>,
    pub status_code: Option<u16>,
    pub error_message: Option<String>,
    pub alert_level: Option<AlertLevel>,
    pub alert_triggered: bool,
}

/// A persisted monitoring log record.
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub id: i64,
    pub target_id: i64,
    pub installation_id: i64,
    pub created_at: DateTime<Utc>,
    pub status: ProbeStatus,
    pub latency_ms: Option<i64>,
    pub status_code: Option<u16>,
    pub error_message: Option<String>,
    pub alert_level: Option<AlertLevel>,
    pub alert_triggered: bool,
}

/// Filters for log queries. Unset fields match everything.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogFilter {
    pub installation_id: Option<i64>,
    pub target_id: Option<i64>,
    pub alert_level: Option<AlertLevel>,
    pub alert_triggered: Option<bool>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// Offset pagination, newest first.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self { limit: 100, offset: 0 }
    }
}

/// One alert-level group produced by a windowed aggregate query.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertLevelRow {
    /// `None` for records stored without an alert level.
    pub alert_level: Option<String>,
    pub count: i64,
    pub avg_latency_ms: Option<f64>,
    pub min_latency_ms: Option<i64>,
    pub max_latency_ms: Option<i64>,
}

/// Total and active rows of one entity table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EntityCounts {
    pub total: i64,
    pub active: i64,
}

/// Row counts across the entity tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SystemCounts {
    pub clients: EntityCounts,
    pub installations: EntityCounts,
    pub targets: EntityCounts,
}

/// Installation attached to a log record. The API key is masked.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstallationSummary {
    pub id: i64,
    pub name: String,
    pub api_key: String,
}

/// Target attached to a log record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetSummary {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub method: String,
}

/// A log record with the entities it refers to, if they still exist.
#[derive(Debug, Clone, Serialize)]
pub struct LogDetail {
    #[serde(flatten)]
    pub record: LogRecord,
    pub installation: Option<InstallationSummary>,
    pub target: Option<TargetSummary>,
}

/// Keep the first 8 characters of a key and elide the rest.
pub fn mask_api_key(key: &str) -> String {
    let prefix: String = key.chars().take(8).collect();
    format!("{}...", prefix)
}
