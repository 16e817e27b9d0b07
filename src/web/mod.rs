//! Web server module: read-only reporting over the log store.

mod handlers;

pub use handlers::*;

use crate::config::ServerConfig;
use crate::db::Store;
use crate::scheduler::Scheduler;
use crate::stats::{Aggregator, Retention, WindowStats};

use axum::{
    routing::{delete, get},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub store: Arc<Store>,
    pub aggregator: Aggregator,
    pub window_stats: WindowStats,
    pub retention: Retention,
    pub scheduler: Arc<Scheduler>,
}

impl AppState {
    pub fn new(config: ServerConfig, store: Arc<Store>, scheduler: Arc<Scheduler>) -> Self {
        Self {
            aggregator: Aggregator::new(store.clone(), store.clone()),
            window_stats: WindowStats::new(store.clone(), config.max_window_hours),
            retention: Retention::new(store.clone(), config.retention_bounds),
            config,
            store,
            scheduler,
        }
    }
}

/// Web server for healthwatch.
pub struct Server {
    state: AppState,
}

impl Server {
    pub fn new(config: ServerConfig, store: Arc<Store>, scheduler: Arc<Scheduler>) -> Self {
        Self {
            state: AppState::new(config, store, scheduler),
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            .route("/health", get(handlers::handle_health))
            .route("/health/stats", get(handlers::handle_system_stats))
            .route("/api/status/installations/{id}", get(handlers::handle_installation_status))
            .route("/api/status/clients/{id}", get(handlers::handle_client_status))
            .route("/api/logs", get(handlers::handle_get_logs))
            .route("/api/logs/{id}", get(handlers::handle_get_log))
            .route("/api/logs/stats/summary", get(handlers::handle_log_summary))
            .route("/api/logs/cleanup", delete(handlers::handle_cleanup))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Serve until `shutdown` resolves.
    pub async fn start<F>(&self, shutdown: F) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Web server listening on {}", addr);

        axum::serve(listener, self.routes())
            .with_graceful_shutdown(shutdown)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OverlapPolicy;
    use crate::db::{AlertLevel, LogFilter, LogSink, NewLogRecord, Page, ProbeStatus, Target};
    use crate::probe::HttpProber;
    use crate::scheduler::{DispatchCoordinator, DispatchOptions};
    use crate::test_util::{add_target, seeded_store};
    use chrono::{Duration as ChronoDuration, Utc};
    use serde_json::Value;
    use std::time::Duration;

    /// Serve the router on an ephemeral port and return its base URL.
    async fn spawn_api(store: &Store) -> String {
        let store = Arc::new(store.clone());
        let coordinator = DispatchCoordinator::new(
            store.clone(),
            store.clone(),
            Arc::new(HttpProber::new("X-API-Key").unwrap()),
            DispatchOptions::default(),
        );
        let scheduler = Arc::new(Scheduler::new(
            Arc::new(coordinator),
            Duration::from_secs(3600),
            OverlapPolicy::Skip,
        ));
        let server = Server::new(ServerConfig::default(), store, scheduler);
        let router = server.routes();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn log(store: &Store, target: &Target, status: ProbeStatus, level: AlertLevel, age: ChronoDuration) {
        store
            .append(&NewLogRecord {
                target_id: target.id,
                installation_id: target.installation_id,
                created_at: Utc::now() - age,
                status,
                latency_ms: Some(120),
                status_code: Some(200),
                error_message: None,
                alert_level: Some(level),
                alert_triggered: level != AlertLevel::Ok,
            })
            .unwrap();
    }

    async fn get_json(url: &str) -> (u16, Value) {
        let resp = reqwest::get(url).await.unwrap();
        let code = resp.status().as_u16();
        (code, resp.json().await.unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (store, _, _) = seeded_store();
        let base = spawn_api(&store).await;

        let (code, body) = get_json(&format!("{}/health", base)).await;
        assert_eq!(code, 200);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["scheduler"], "stopped");
        assert_eq!(body["database"]["status"], "connected");
    }

    #[tokio::test]
    async fn test_installation_and_client_status() {
        let (store, client_id, installation_id) = seeded_store();
        let a = add_target(&store, installation_id, "a", "http://a.invalid", 1000);
        let b = add_target(&store, installation_id, "b", "http://b.invalid", 1000);
        log(&store, &a, ProbeStatus::Up, AlertLevel::Ok, ChronoDuration::minutes(1));
        log(&store, &b, ProbeStatus::Degraded, AlertLevel::Warning, ChronoDuration::minutes(1));
        let base = spawn_api(&store).await;

        let (code, body) = get_json(&format!("{}/api/status/installations/{}", base, installation_id)).await;
        assert_eq!(code, 200);
        assert_eq!(body["status"], "DEGRADED");
        assert_eq!(body["targets"].as_array().unwrap().len(), 2);
        assert_eq!(body["scope"]["kind"], "installation");

        let (_, body) = get_json(&format!("{}/api/status/clients/{}", base, client_id)).await;
        assert_eq!(body["status"], "DEGRADED");

        let (code, body) = get_json(&format!("{}/api/status/clients/9999", base)).await;
        assert_eq!(code, 404);
        assert!(body["error"].is_string());
        let (code, _) = get_json(&format!("{}/api/status/installations/9999", base)).await;
        assert_eq!(code, 404);

        // An existing installation without targets is UNKNOWN, not missing.
        let empty = store.add_installation(client_id, "acme-staging", "k").unwrap();
        let (code, body) = get_json(&format!("{}/api/status/installations/{}", base, empty)).await;
        assert_eq!(code, 200);
        assert_eq!(body["status"], "UNKNOWN");
    }

    #[tokio::test]
    async fn test_logs_filter_and_limit_bounds() {
        let (store, _, installation_id) = seeded_store();
        let a = add_target(&store, installation_id, "a", "http://a.invalid", 1000);
        log(&store, &a, ProbeStatus::Up, AlertLevel::Ok, ChronoDuration::minutes(3));
        log(&store, &a, ProbeStatus::Down, AlertLevel::Critical, ChronoDuration::minutes(2));
        log(&store, &a, ProbeStatus::Up, AlertLevel::Ok, ChronoDuration::minutes(1));
        let base = spawn_api(&store).await;

        let (code, body) = get_json(&format!("{}/api/logs?limit=2", base)).await;
        assert_eq!(code, 200);
        let logs = body["logs"].as_array().unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0]["status"], "UP");
        assert_eq!(logs[1]["status"], "DOWN");

        let (_, body) = get_json(&format!("{}/api/logs?alert_level=critical", base)).await;
        assert_eq!(body["logs"].as_array().unwrap().len(), 1);

        let (_, body) = get_json(&format!("{}/api/logs?alert_triggered=false&offset=1", base)).await;
        assert_eq!(body["logs"].as_array().unwrap().len(), 1);

        let (code, body) = get_json(&format!("{}/api/logs?limit=0", base)).await;
        assert_eq!(code, 400);
        assert!(body["error"].as_str().unwrap().contains("limit"));
        let (code, _) = get_json(&format!("{}/api/logs?limit=1001", base)).await;
        assert_eq!(code, 400);
    }

    #[tokio::test]
    async fn test_summary_hours_bounds() {
        let (store, _, installation_id) = seeded_store();
        let a = add_target(&store, installation_id, "a", "http://a.invalid", 1000);
        log(&store, &a, ProbeStatus::Up, AlertLevel::Ok, ChronoDuration::hours(2));
        log(&store, &a, ProbeStatus::Up, AlertLevel::Ok, ChronoDuration::hours(30));
        let base = spawn_api(&store).await;

        let (code, body) = get_json(&format!("{}/api/logs/stats/summary", base)).await;
        assert_eq!(code, 200);
        assert_eq!(body["period"], "last_24_hours");
        assert_eq!(body["stats_by_alert_level"]["ok"]["count"], 1);
        assert_eq!(body["stats_by_alert_level"]["ok"]["avg_latency_ms"], 120.0);

        let (code, _) = get_json(&format!("{}/api/logs/stats/summary?hours=0", base)).await;
        assert_eq!(code, 400);
        let (code, _) = get_json(&format!("{}/api/logs/stats/summary?hours=169", base)).await;
        assert_eq!(code, 400);
    }

    #[tokio::test]
    async fn test_cleanup_bounds() {
        let (store, _, installation_id) = seeded_store();
        let a = add_target(&store, installation_id, "a", "http://a.invalid", 1000);
        log(&store, &a, ProbeStatus::Up, AlertLevel::Ok, ChronoDuration::days(40));
        log(&store, &a, ProbeStatus::Up, AlertLevel::Ok, ChronoDuration::days(5));
        let base = spawn_api(&store).await;
        let client = reqwest::Client::new();

        let resp = client
            .delete(format!("{}/api/logs/cleanup?days_to_keep=6", base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 400);
        assert_eq!(store.count_logs().unwrap(), 2);

        let resp = client
            .delete(format!("{}/api/logs/cleanup", base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["deleted_count"], 1);
        assert_eq!(body["days_kept"], 30);
        assert_eq!(store.count_logs().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_health_reports_degraded_store() {
        let (store, _, _) = seeded_store();
        let base = spawn_api(&store).await;
        store.poison();

        let (code, body) = get_json(&format!("{}/health", base)).await;
        assert_eq!(code, 503);
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["database"]["status"], "disconnected");
    }

    #[tokio::test]
    async fn test_system_stats() {
        let (store, client_id, installation_id) = seeded_store();
        let a = add_target(&store, installation_id, "a", "http://a.invalid", 1000);
        let b = add_target(&store, installation_id, "b", "http://b.invalid", 1000);
        store.set_target_active(b.id, false).unwrap();
        store.add_installation(client_id, "retired", "k").unwrap();
        log(&store, &a, ProbeStatus::Up, AlertLevel::Ok, ChronoDuration::minutes(5));
        log(&store, &a, ProbeStatus::Down, AlertLevel::Critical, ChronoDuration::minutes(10));
        log(&store, &a, ProbeStatus::Up, AlertLevel::Ok, ChronoDuration::hours(3));
        store
            .append(&NewLogRecord {
                target_id: a.id,
                installation_id,
                created_at: Utc::now() - ChronoDuration::minutes(1),
                status: ProbeStatus::Up,
                latency_ms: None,
                status_code: None,
                error_message: None,
                alert_level: None,
                alert_triggered: false,
            })
            .unwrap();
        let base = spawn_api(&store).await;

        let (code, body) = get_json(&format!("{}/health/stats", base)).await;
        assert_eq!(code, 200);
        assert_eq!(body["clients"]["total"], 1);
        assert_eq!(body["installations"]["total"], 2);
        assert_eq!(body["targets"]["total"], 2);
        assert_eq!(body["targets"]["active"], 1);
        assert_eq!(body["recent_monitoring_logs"]["ok"], 1);
        assert_eq!(body["recent_monitoring_logs"]["critical"], 1);
        assert_eq!(body["recent_monitoring_logs"]["unknown"], 1);
    }

    #[tokio::test]
    async fn test_get_log_by_id() {
        let (store, client_id, _) = seeded_store();
        let installation_id = store.add_installation(client_id, "keyed", "abcdefghijklmnop").unwrap();
        let a = add_target(&store, installation_id, "api", "http://api.invalid/health", 1000);
        log(&store, &a, ProbeStatus::Down, AlertLevel::Critical, ChronoDuration::minutes(1));
        let id = store.query(&LogFilter::default(), Page::default()).unwrap()[0].id;
        let base = spawn_api(&store).await;

        let (code, body) = get_json(&format!("{}/api/logs/{}", base, id)).await;
        assert_eq!(code, 200);
        assert_eq!(body["id"], id);
        assert_eq!(body["status"], "DOWN");
        assert_eq!(body["installation"]["api_key"], "abcdefgh...");
        assert_eq!(body["installation"]["id"], installation_id);
        assert_eq!(body["target"]["name"], "api");
        assert_eq!(body["target"]["url"], "http://api.invalid/health");

        let (code, _) = get_json(&format!("{}/api/logs/{}", base, id + 1)).await;
        assert_eq!(code, 404);
    }
}
