//! Windowed statistics over the log stream.

use super::StatsError;
use crate::db::{LogFilter, LogSink};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Hours-back range accepted by [`WindowStats::summary_for_hours`].
pub const MIN_WINDOW_HOURS: i64 = 1;
pub const MAX_SUMMARY_HOURS: i64 = 168;

/// Count and latency summary of one alert level.
///
/// Records without latency are counted but excluded from min/avg/max; a
/// group whose latencies are all null reports `None`, never zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelStats {
    pub count: i64,
    pub avg_latency_ms: Option<f64>,
    pub min_latency_ms: Option<i64>,
    pub max_latency_ms: Option<i64>,
}

/// Statistics for records created in `[start, end)`.
#[derive(Debug, Clone, Serialize)]
pub struct WindowSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Keyed by alert level; records without one are grouped as "unknown".
    pub stats_by_alert_level: BTreeMap<String, LevelStats>,
}

impl WindowSummary {
    pub fn total(&self) -> i64 {
        self.stats_by_alert_level.values().map(|s| s.count).sum()
    }
}

#[derive(Clone)]
pub struct WindowStats {
    logs: Arc<dyn LogSink>,
    max_window_hours: i64,
}

impl WindowStats {
    pub fn new(logs: Arc<dyn LogSink>, max_window_hours: i64) -> Self {
        Self {
            logs,
            max_window_hours,
        }
    }

    /// Summarise `[start, end)`. Only the installation and target parts of
    /// `filter` are applied.
    pub fn window_summary(
        &self,
        filter: &LogFilter,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<WindowSummary, StatsError> {
        if start > end {
            return Err(StatsError::InvalidWindow { start, end });
        }
        let span = end - start;
        let cap = ChronoDuration::try_hours(self.max_window_hours).unwrap_or(ChronoDuration::MAX);
        if span > cap {
            // Round up so a 168h + 1s window reports as 169h.
            let hours = (span.num_seconds() + 3599) / 3600;
            return Err(StatsError::WindowTooLarge {
                hours,
                max_hours: self.max_window_hours,
            });
        }

        let rows = self.logs.window_stats(filter, start, end)?;

        let mut stats_by_alert_level = BTreeMap::new();
        for row in rows {
            let key = row.alert_level.unwrap_or_else(|| "unknown".to_string());
            stats_by_alert_level.insert(
                key,
                LevelStats {
                    count: row.count,
                    avg_latency_ms: row.avg_latency_ms,
                    min_latency_ms: row.min_latency_ms,
                    max_latency_ms: row.max_latency_ms,
                },
            );
        }

        Ok(WindowSummary {
            period: None,
            start,
            end,
            stats_by_alert_level,
        })
    }

    /// Summarise the last `hours` hours.
    pub fn summary_for_hours(&self, filter: &LogFilter, hours: i64) -> Result<WindowSummary, StatsError> {
        self.summary_for_hours_at(filter, hours, Utc::now())
    }

    pub fn summary_for_hours_at(
        &self,
        filter: &LogFilter,
        hours: i64,
        now: DateTime<Utc>,
    ) -> Result<WindowSummary, StatsError> {
        if !(MIN_WINDOW_HOURS..=MAX_SUMMARY_HOURS).contains(&hours) {
            return Err(StatsError::HoursOutOfRange {
                got: hours,
                min: MIN_WINDOW_HOURS,
                max: MAX_SUMMARY_HOURS,
            });
        }

        let start = now - ChronoDuration::hours(hours);
        let mut summary = self.window_summary(filter, start, now)?;
        summary.period = Some(format!("last_{}_hours", hours));
        Ok(summary)
    }
}
