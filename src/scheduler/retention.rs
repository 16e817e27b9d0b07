//! Background sweeper that keeps the log store inside its retention horizon.

use crate::stats::Retention;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};

/// Periodically deletes records older than `days_to_keep`.
pub struct RetentionManager {
    retention: Retention,
    days_to_keep: i64,
    interval: Duration,
    stop: Arc<Mutex<Option<broadcast::Sender<()>>>>,
}

impl RetentionManager {
    pub fn new(retention: Retention, days_to_keep: i64, interval: Duration) -> Self {
        Self {
            retention,
            days_to_keep,
            interval,
            stop: Arc::new(Mutex::new(None)),
        }
    }

    /// Start the sweeper. A second call while running is a no-op.
    pub async fn start(&self) {
        let mut stop = self.stop.lock().await;
        if stop.is_some() {
            return;
        }

        let (tx, mut rx) = broadcast::channel(1);
        *stop = Some(tx);

        let retention = self.retention.clone();
        let days = self.days_to_keep;
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        tracing::info!("RetentionManager: keeping {} days of logs", days);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = interval.tick() => sweep(&retention, days),
                }
            }
        });
    }

    /// Stop the sweeper.
    pub async fn stop(&self) {
        if let Some(tx) = self.stop.lock().await.take() {
            let _ = tx.send(());
        }
    }
}

fn sweep(retention: &Retention, days: i64) {
    match retention.cleanup(days) {
        Ok(report) => tracing::debug!(
            "RetentionManager: swept {} records before {}",
            report.deleted_count,
            report.cutoff
        ),
        Err(e) => tracing::error!("RetentionManager: cleanup failed: {}", e),
    }
}
