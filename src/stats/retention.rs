//! Retention: pruning records past a bounded horizon.

use super::StatsError;
use crate::config::RetentionBounds;
use crate::db::LogSink;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Outcome of a cleanup request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanupReport {
    pub deleted_count: usize,
    pub cutoff: DateTime<Utc>,
    pub days_kept: i64,
}

/// Deletes log records older than a horizon inside configured bounds.
#[derive(Clone)]
pub struct Retention {
    logs: Arc<dyn LogSink>,
    bounds: RetentionBounds,
}

impl Retention {
    pub fn new(logs: Arc<dyn LogSink>, bounds: RetentionBounds) -> Self {
        Self { logs, bounds }
    }

    /// Delete records created strictly before `now - horizon`.
    ///
    /// A horizon outside the configured bounds is rejected, not clamped.
    pub fn purge_older_than(&self, horizon: ChronoDuration) -> Result<usize, StatsError> {
        self.purge_at(horizon, Utc::now()).map(|(deleted, _)| deleted)
    }

    /// Keep the last `days_to_keep` days of records.
    pub fn cleanup(&self, days_to_keep: i64) -> Result<CleanupReport, StatsError> {
        self.cleanup_at(days_to_keep, Utc::now())
    }

    pub fn cleanup_at(&self, days_to_keep: i64, now: DateTime<Utc>) -> Result<CleanupReport, StatsError> {
        self.check_days(days_to_keep)?;
        let horizon = ChronoDuration::try_days(days_to_keep).ok_or_else(|| self.out_of_range(days_to_keep))?;
        let (deleted_count, cutoff) = self.purge_at(horizon, now)?;

        Ok(CleanupReport {
            deleted_count,
            cutoff,
            days_kept: days_to_keep,
        })
    }

    fn purge_at(
        &self,
        horizon: ChronoDuration,
        now: DateTime<Utc>,
    ) -> Result<(usize, DateTime<Utc>), StatsError> {
        let min = ChronoDuration::try_days(self.bounds.min_days).unwrap_or(ChronoDuration::MAX);
        let max = ChronoDuration::try_days(self.bounds.max_days).unwrap_or(ChronoDuration::MAX);
        if horizon < min || horizon > max {
            return Err(self.out_of_range(horizon.num_days()));
        }

        let cutoff = now - horizon;
        let deleted = self.logs.delete_before(cutoff)?;
        if deleted > 0 {
            tracing::info!("Retention: deleted {} records older than {}", deleted, cutoff);
        }
        Ok((deleted, cutoff))
    }

    fn check_days(&self, days: i64) -> Result<(), StatsError> {
        if days < self.bounds.min_days || days > self.bounds.max_days {
            return Err(self.out_of_range(days));
        }
        Ok(())
    }

    fn out_of_range(&self, got: i64) -> StatsError {
        StatsError::HorizonOutOfRange {
            got,
            min: self.bounds.min_days,
            max: self.bounds.max_days,
        }
    }
}
