//! Roll-up of the latest result per target into installation and client status.

use super::StatsError;
use crate::db::{DbError, LogSink, ProbeStatus, Scope, TargetSource};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Status of a target or of a group of targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Up,
    Degraded,
    Down,
    /// No record yet, or nothing to aggregate.
    Unknown,
}

impl From<ProbeStatus> for HealthStatus {
    fn from(status: ProbeStatus) -> Self {
        match status {
            ProbeStatus::Up => HealthStatus::Up,
            ProbeStatus::Degraded => HealthStatus::Degraded,
            ProbeStatus::Down => HealthStatus::Down,
        }
    }
}

/// Combine statuses: DOWN beats DEGRADED beats UP, and UNKNOWN only wins
/// when there is nothing else (including when there is nothing at all).
pub fn rollup<I>(statuses: I) -> HealthStatus
where
    I: IntoIterator<Item = HealthStatus>,
{
    let mut any_up = false;
    let mut any_degraded = false;

    for status in statuses {
        match status {
            HealthStatus::Down => return HealthStatus::Down,
            HealthStatus::Degraded => any_degraded = true,
            HealthStatus::Up => any_up = true,
            HealthStatus::Unknown => {}
        }
    }

    if any_degraded {
        HealthStatus::Degraded
    } else if any_up {
        HealthStatus::Up
    } else {
        HealthStatus::Unknown
    }
}

/// Latest known state of one target.
#[derive(Debug, Clone, Serialize)]
pub struct TargetStatus {
    pub target_id: i64,
    pub installation_id: i64,
    pub name: String,
    pub status: HealthStatus,
    pub checked_at: Option<DateTime<Utc>>,
    pub latency_ms: Option<i64>,
    pub status_code: Option<u16>,
}

/// Status of a scope, derived at query time.
#[derive(Debug, Clone, Serialize)]
pub struct AggregatedStatus {
    pub scope: Scope,
    pub status: HealthStatus,
    /// Per-installation roll-ups within the scope.
    pub installations: BTreeMap<i64, HealthStatus>,
    pub targets: Vec<TargetStatus>,
}

/// Computes scope status from the log stream. Never caches.
#[derive(Clone)]
pub struct Aggregator {
    targets: Arc<dyn TargetSource>,
    logs: Arc<dyn LogSink>,
}

impl Aggregator {
    pub fn new(targets: Arc<dyn TargetSource>, logs: Arc<dyn LogSink>) -> Self {
        Self { targets, logs }
    }

    /// Fails with [`DbError::NotFound`] when the scope's installation or
    /// client does not exist.
    pub fn aggregate(&self, scope: Scope) -> Result<AggregatedStatus, StatsError> {
        if !self.targets.scope_exists(scope)? {
            return Err(DbError::NotFound.into());
        }

        let targets = self.targets.list_active_targets(scope)?;
        let ids: Vec<i64> = targets.iter().map(|t| t.id).collect();
        let latest = self.logs.latest_per_target(&ids)?;

        let target_statuses: Vec<TargetStatus> = targets
            .into_iter()
            .map(|t| {
                let record = latest.get(&t.id);
                TargetStatus {
                    target_id: t.id,
                    installation_id: t.installation_id,
                    name: t.name,
                    status: record.map_or(HealthStatus::Unknown, |r| r.status.into()),
                    checked_at: record.map(|r| r.created_at),
                    latency_ms: record.and_then(|r| r.latency_ms),
                    status_code: record.and_then(|r| r.status_code),
                }
            })
            .collect();

        let mut by_installation: BTreeMap<i64, Vec<HealthStatus>> = BTreeMap::new();
        for t in &target_statuses {
            by_installation.entry(t.installation_id).or_default().push(t.status);
        }
        let installations: BTreeMap<i64, HealthStatus> = by_installation
            .into_iter()
            .map(|(id, statuses)| (id, rollup(statuses)))
            .collect();

        Ok(AggregatedStatus {
            scope,
            status: rollup(installations.values().copied()),
            installations,
            targets: target_statuses,
        })
    }
}
