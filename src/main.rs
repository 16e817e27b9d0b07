//! healthwatch - scheduled health monitoring for client installations.

mod config;
mod db;
mod probe;
mod scheduler;
mod stats;
mod web;

#[cfg(test)]
mod test_util;

use config::ServerConfig;
use db::Store;
use probe::HttpProber;
use scheduler::{DispatchCoordinator, DispatchOptions, RetentionManager, Scheduler};
use stats::Retention;
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("healthwatch=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load()?;
    tracing::info!("Starting healthwatch on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    // Add sample target if none exist
    if store.count_targets()? == 0 {
        tracing::info!("Adding sample target: example.com");
        let client_id = store.add_client("Example")?;
        let installation_id = store.add_installation(client_id, "example-prod", "")?;
        let mut target = db::Target {
            installation_id,
            name: "Example".to_string(),
            url: "https://example.com/".to_string(),
            ..Default::default()
        };
        store.add_target(&mut target)?;
    }

    let prober = Arc::new(HttpProber::new(&cfg.credential_header)?);
    let coordinator = DispatchCoordinator::new(
        store.clone(),
        store.clone(),
        prober,
        DispatchOptions {
            max_in_flight: cfg.max_in_flight,
            run_deadline: cfg.run_deadline,
            jitter: cfg.probe_jitter,
        },
    );

    let mut scheduler = Scheduler::new(Arc::new(coordinator), cfg.check_interval, cfg.overlap_policy);
    if let Some(days) = cfg.retention_days {
        let retention = Retention::new(store.clone(), cfg.retention_bounds);
        scheduler = scheduler.with_retention(RetentionManager::new(
            retention,
            days,
            cfg.retention_sweep_interval,
        ));
    }
    let scheduler = Arc::new(scheduler);

    // Start scheduler
    scheduler.start().await;

    // Start web server
    let server = Server::new(cfg, store, scheduler.clone());
    server
        .start(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown requested");
        })
        .await?;

    scheduler.shutdown().await;

    Ok(())
}
