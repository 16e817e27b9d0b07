//! HTTP request handlers.

use super::AppState;
use crate::db::{AlertLevel, DbError, LogFilter, LogRecord, LogSink, Page, Scope, SystemCounts};
use crate::stats::StatsError;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};
use serde_json::json;

pub const DEFAULT_LOG_LIMIT: u32 = 100;
pub const MAX_LOG_LIMIT: u32 = 1000;
pub const DEFAULT_SUMMARY_HOURS: i64 = 24;
pub const DEFAULT_DAYS_TO_KEEP: i64 = 30;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl From<StatsError> for ApiError {
    fn from(e: StatsError) -> Self {
        match e {
            StatsError::Store(db) => db.into(),
            e => ApiError::BadRequest(e.to_string()),
        }
    }
}

impl From<DbError> for ApiError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound => ApiError::NotFound(e.to_string()),
            e => ApiError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (code, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Internal(m) => {
                tracing::error!("Request failed: {}", m);
                (StatusCode::INTERNAL_SERVER_ERROR, m)
            }
        };
        (code, Json(json!({ "error": message }))).into_response()
    }
}

// ============================================================================
// Liveness
// ============================================================================

/// Liveness, including a database round trip. A failing store answers 503.
pub async fn handle_health(State(state): State<AppState>) -> Response {
    let scheduler = state.scheduler.state().await;
    let timestamp = Utc::now();

    match state.store.ping() {
        Ok(()) => Json(json!({
            "status": "ok",
            "timestamp": timestamp,
            "scheduler": scheduler,
            "database": { "status": "connected" },
        }))
        .into_response(),
        Err(e) => {
            tracing::warn!("Health check: database unavailable: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "degraded",
                    "timestamp": timestamp,
                    "scheduler": scheduler,
                    "database": { "status": "disconnected", "error": e.to_string() },
                })),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SystemStats {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub counts: SystemCounts,
    /// Last hour's record counts keyed by alert level ("unknown" when unset).
    pub recent_monitoring_logs: BTreeMap<String, i64>,
}

pub async fn handle_system_stats(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let now = Utc::now();
    let counts = state.store.system_counts()?;
    let recent = state
        .window_stats
        .window_summary(&LogFilter::default(), now - ChronoDuration::hours(1), now)?;

    Ok(Json(SystemStats {
        timestamp: now,
        counts,
        recent_monitoring_logs: recent
            .stats_by_alert_level
            .into_iter()
            .map(|(level, stats)| (level, stats.count))
            .collect(),
    }))
}

// ============================================================================
// API: Status
// ============================================================================

pub async fn handle_installation_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.aggregator.aggregate(Scope::Installation(id))?))
}

pub async fn handle_client_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.aggregator.aggregate(Scope::Client(id))?))
}

// ============================================================================
// API: Logs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub installation_id: Option<i64>,
    pub target_id: Option<i64>,
    pub alert_level: Option<AlertLevel>,
    pub alert_triggered: Option<bool>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub logs: Vec<LogRecord>,
    pub limit: u32,
    pub offset: u32,
}

pub async fn handle_get_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT);
    if !(1..=MAX_LOG_LIMIT).contains(&limit) {
        return Err(ApiError::BadRequest(format!(
            "limit {} out of range [1, {}]",
            limit, MAX_LOG_LIMIT
        )));
    }
    let page = Page {
        limit,
        offset: query.offset.unwrap_or(0),
    };

    let filter = LogFilter {
        installation_id: query.installation_id,
        target_id: query.target_id,
        alert_level: query.alert_level,
        alert_triggered: query.alert_triggered,
        start: query.start,
        end: query.end,
    };

    let logs = state.store.query(&filter, page)?;
    Ok(Json(LogsResponse {
        logs,
        limit: page.limit,
        offset: page.offset,
    }))
}

/// One record with its installation (API key masked) and target.
pub async fn handle_get_log(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.store.get_log(id)?))
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    pub hours: Option<i64>,
    pub installation_id: Option<i64>,
    pub target_id: Option<i64>,
}

pub async fn handle_log_summary(
    State(state): State<AppState>,
    Query(query): Query<SummaryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = LogFilter {
        installation_id: query.installation_id,
        target_id: query.target_id,
        ..Default::default()
    };
    let hours = query.hours.unwrap_or(DEFAULT_SUMMARY_HOURS);
    Ok(Json(state.window_stats.summary_for_hours(&filter, hours)?))
}

#[derive(Debug, Deserialize)]
pub struct CleanupQuery {
    pub days_to_keep: Option<i64>,
}

pub async fn handle_cleanup(
    State(state): State<AppState>,
    Query(query): Query<CleanupQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let days = query.days_to_keep.unwrap_or(DEFAULT_DAYS_TO_KEEP);
    Ok(Json(state.retention.cleanup(days)?))
}
