//! Scheduler module for periodic dispatch runs and background retention.

mod dispatch;
mod retention;

pub use dispatch::*;
pub use retention::*;

use crate::config::OverlapPolicy;

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

/// Whether the periodic loop is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Stopped,
    Running,
}

struct RunningLoop {
    stop: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

/// Fires a dispatch run every interval, starting immediately.
pub struct Scheduler {
    coordinator: Arc<DispatchCoordinator>,
    interval: Duration,
    overlap: OverlapPolicy,
    retention: Option<RetentionManager>,
    running: Mutex<Option<RunningLoop>>,
}

impl Scheduler {
    pub fn new(coordinator: Arc<DispatchCoordinator>, interval: Duration, overlap: OverlapPolicy) -> Self {
        Self {
            coordinator,
            interval,
            overlap,
            retention: None,
            running: Mutex::new(None),
        }
    }

    /// Run a retention sweeper alongside the dispatch loop.
    pub fn with_retention(mut self, retention: RetentionManager) -> Self {
        self.retention = Some(retention);
        self
    }

    /// Start the periodic loop. Calling it again while running does nothing.
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return;
        }

        tracing::info!(
            "Starting scheduler: interval {:?}, overlap {:?}",
            self.interval,
            self.overlap
        );

        let (stop, stop_rx) = broadcast::channel(1);
        let handle = tokio::spawn(run_loop(
            self.coordinator.clone(),
            self.interval,
            self.overlap,
            stop_rx,
        ));
        *running = Some(RunningLoop { stop, handle });

        if let Some(retention) = &self.retention {
            retention.start().await;
        }
    }

    /// Stop firing and wait for in-flight runs to finish.
    pub async fn shutdown(&self) {
        let mut running = self.running.lock().await;
        let Some(RunningLoop { stop, handle }) = running.take() else {
            return;
        };

        let _ = stop.send(());
        if let Err(e) = handle.await {
            tracing::error!("Scheduler loop ended abnormally: {}", e);
        }

        if let Some(retention) = &self.retention {
            retention.stop().await;
        }
        tracing::info!("Scheduler stopped");
    }

    pub async fn state(&self) -> SchedulerState {
        if self.running.lock().await.is_some() {
            SchedulerState::Running
        } else {
            SchedulerState::Stopped
        }
    }
}

async fn run_loop(
    coordinator: Arc<DispatchCoordinator>,
    period: Duration,
    overlap: OverlapPolicy,
    mut stop_rx: broadcast::Receiver<()>,
) {
    // Single-flight gate for OverlapPolicy::Skip
    let gate = Arc::new(Semaphore::new(1));
    let mut runs = JoinSet::new();

    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = stop_rx.recv() => break,
            _ = interval.tick() => {
                let permit = match overlap {
                    OverlapPolicy::Allow => None,
                    OverlapPolicy::Skip => match gate.clone().try_acquire_owned() {
                        Ok(p) => Some(p),
                        Err(_) => {
                            tracing::warn!("Skipping scheduled run: previous run still in flight");
                            continue;
                        }
                    },
                };

                let coordinator = coordinator.clone();
                runs.spawn(async move {
                    let _permit = permit;
                    fire(&coordinator).await;
                });
            }
            Some(joined) = runs.join_next(), if !runs.is_empty() => log_join(joined),
        }
    }

    while let Some(joined) = runs.join_next().await {
        log_join(joined);
    }
}

async fn fire(coordinator: &DispatchCoordinator) {
    match coordinator.run_once().await {
        Ok(report) => tracing::info!(
            "Run complete: {} targets, {} up, {} degraded, {} down, {} write failures",
            report.targets,
            report.up,
            report.degraded,
            report.down,
            report.failed_writes
        ),
        Err(e) => tracing::error!("Run failed: {}", e),
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        tracing::error!("Scheduled run aborted: {}", e);
    }
}
