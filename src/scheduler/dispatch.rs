//! Dispatch coordinator: one run probes every active target once.

use crate::db::{DbError, LogSink, NewLogRecord, ProbeStatus, Scope, Target, TargetSource};
use crate::probe::{alert_level, ProbeResult, Prober, Thresholds};

use chrono::Utc;
use futures::FutureExt;
use rand::Rng;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Default maximum number of probes in flight within one run.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 16;

/// A failure that prevents a run from probing anything.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("failed to list targets: {0}")]
    TargetSource(#[from] DbError),
}

/// Tuning for a dispatch run.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub max_in_flight: usize,
    /// Probes unfinished at this deadline are cancelled and logged as timeouts.
    pub run_deadline: Option<Duration>,
    /// Upper bound of a random delay before each probe.
    pub jitter: Duration,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            run_deadline: None,
            jitter: Duration::ZERO,
        }
    }
}

/// What one run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub targets: usize,
    pub written: usize,
    pub failed_writes: usize,
    pub up: usize,
    pub degraded: usize,
    pub down: usize,
    /// Probes cut off by the run deadline.
    pub abandoned: usize,
}

/// Fans probes out over targets and appends one log record per probe.
pub struct DispatchCoordinator {
    targets: Arc<dyn TargetSource>,
    logs: Arc<dyn LogSink>,
    prober: Arc<dyn Prober>,
    options: DispatchOptions,
}

impl DispatchCoordinator {
    pub fn new(
        targets: Arc<dyn TargetSource>,
        logs: Arc<dyn LogSink>,
        prober: Arc<dyn Prober>,
        options: DispatchOptions,
    ) -> Self {
        Self {
            targets,
            logs,
            prober,
            options,
        }
    }

    /// Probe every currently active target once.
    pub async fn run_once(&self) -> Result<RunReport, DispatchError> {
        let targets = self.targets.list_active_targets(Scope::All)?;
        Ok(self.dispatch(targets).await)
    }

    /// Probe `targets` concurrently and persist the results.
    ///
    /// Failures of individual probes or writes never abort the run.
    pub async fn dispatch(&self, targets: Vec<Target>) -> RunReport {
        let mut report = RunReport {
            targets: targets.len(),
            ..Default::default()
        };
        if targets.is_empty() {
            return report;
        }

        let targets: Arc<[Target]> = targets.into();
        let results = self.probe_all(&targets, &mut report).await;

        for (target, result) in targets.iter().zip(results) {
            match result.status {
                ProbeStatus::Up => report.up += 1,
                ProbeStatus::Degraded => report.degraded += 1,
                ProbeStatus::Down => report.down += 1,
            }

            let record = to_record(target, result);
            match self.logs.append(&record) {
                Ok(_) => report.written += 1,
                Err(e) => {
                    report.failed_writes += 1;
                    tracing::error!("Failed to append result for {}: {}", target.name, e);
                }
            }
        }

        report
    }

    /// Run one probe per target and return results in target order.
    async fn probe_all(&self, targets: &Arc<[Target]>, report: &mut RunReport) -> Vec<ProbeResult> {
        let semaphore = Arc::new(Semaphore::new(self.options.max_in_flight.max(1)));
        let mut set = JoinSet::new();

        for index in 0..targets.len() {
            let targets = targets.clone();
            let prober = self.prober.clone();
            let semaphore = semaphore.clone();
            let jitter = self.options.jitter;

            set.spawn(async move {
                let target = &targets[index];
                if !jitter.is_zero() {
                    tokio::time::sleep(jitter_delay(jitter)).await;
                }

                // Held until the probe finishes
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (index, ProbeResult::failed("dispatch semaphore closed")),
                };

                let probe = prober.probe(target, &target.api_key);
                let result = match AssertUnwindSafe(probe).catch_unwind().await {
                    Ok(result) => result,
                    Err(panic) => {
                        let cause = panic_message(panic.as_ref());
                        tracing::error!("Probe for {} panicked: {}", target.name, cause);
                        ProbeResult::failed(format!("unexpected error: {}", cause))
                    }
                };
                (index, result)
            });
        }

        let mut results: Vec<Option<ProbeResult>> = vec![None; targets.len()];
        let deadline = self
            .options
            .run_deadline
            .map(|d| (d, tokio::time::Instant::now() + d));

        loop {
            let joined = match deadline {
                Some((_, at)) => match tokio::time::timeout_at(at, set.join_next()).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        set.abort_all();
                        break;
                    }
                },
                None => set.join_next().await,
            };

            match joined {
                Some(Ok((index, result))) => results[index] = Some(result),
                Some(Err(e)) => tracing::error!("Probe task failed: {}", e),
                None => break,
            }
        }

        results
            .into_iter()
            .zip(targets.iter())
            .map(|(result, target)| {
                result.unwrap_or_else(|| match deadline {
                    Some((limit, _)) => {
                        report.abandoned += 1;
                        tracing::warn!("Probe for {} cut off by run deadline", target.name);
                        ProbeResult::timed_out(limit)
                    }
                    None => ProbeResult::failed("probe task did not complete"),
                })
            })
            .collect()
    }
}

fn to_record(target: &Target, result: ProbeResult) -> NewLogRecord {
    let level = alert_level(&result, Thresholds::from(target));
    NewLogRecord {
        target_id: target.id,
        installation_id: target.installation_id,
        created_at: Utc::now(),
        status: result.status,
        latency_ms: result.latency_ms,
        status_code: result.status_code,
        error_message: result.error_message,
        alert_level: Some(level),
        alert_triggered: level != crate::db::AlertLevel::Ok,
    }
}

/// Uniform random delay in `[0, max]`, whole milliseconds.
fn jitter_delay(max: Duration) -> Duration {
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}
