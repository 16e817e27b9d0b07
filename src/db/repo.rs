//! Repository seams between the monitoring engine and storage.
//!
//! The engine only ever reads targets and appends / reads log records, so the
//! two traits below are all it needs. [`Store`](super::Store) implements both.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

use super::models::*;
use super::store::DbError;

/// Which part of the entity tree an operation applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Scope {
    All,
    Installation(i64),
    Client(i64),
}

/// Source of probe targets.
pub trait TargetSource: Send + Sync {
    /// Active targets under `scope`. A target is active only if it, its
    /// installation and its client are all active.
    fn list_active_targets(&self, scope: Scope) -> Result<Vec<Target>, DbError>;

    /// Whether the scope's installation or client exists, active or not.
    fn scope_exists(&self, scope: Scope) -> Result<bool, DbError>;
}

/// Append-mostly store of monitoring log records.
pub trait LogSink: Send + Sync {
    fn append(&self, record: &NewLogRecord) -> Result<i64, DbError>;

    /// Records matching `filter`, newest first.
    fn query(&self, filter: &LogFilter, page: Page) -> Result<Vec<LogRecord>, DbError>;

    /// Delete every record created strictly before `cutoff`.
    fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<usize, DbError>;

    /// The single newest record for each of `target_ids`, in one round trip.
    /// Targets with no records are absent from the map.
    fn latest_per_target(&self, target_ids: &[i64]) -> Result<HashMap<i64, LogRecord>, DbError>;

    /// Per alert level count and latency min/avg/max over `[start, end)`.
    /// Only the installation and target parts of `filter` are applied.
    fn window_stats(
        &self,
        filter: &LogFilter,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AlertLevelRow>, DbError>;
}
