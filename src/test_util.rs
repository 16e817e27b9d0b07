//! Shared helpers for tests: a local HTTP service to probe and a seeded store.

use crate::db::{Store, Target};

use axum::{
    http::{header, HeaderMap, StatusCode},
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::time::Duration;

/// Serve a small app on an ephemeral port.
///
/// - `/ok` answers 200
/// - `/slow` answers 200 after 5 seconds
/// - `/unavailable` answers 503
/// - `/moved` answers 302
/// - `/auth` answers 200 only when `X-API-Key: secret` is present
pub async fn spawn_target_server() -> SocketAddr {
    let app = Router::new()
        .route("/ok", get(|| async { "ok" }))
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        )
        .route("/unavailable", get(|| async { StatusCode::SERVICE_UNAVAILABLE }))
        .route(
            "/moved",
            get(|| async { (StatusCode::FOUND, [(header::LOCATION, "/ok")]) }),
        )
        .route(
            "/auth",
            get(|headers: HeaderMap| async move {
                if headers.get("x-api-key").and_then(|v| v.to_str().ok()) == Some("secret") {
                    StatusCode::OK
                } else {
                    StatusCode::UNAUTHORIZED
                }
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// An address nothing is listening on.
pub async fn closed_port() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// In-memory store with one client and one installation (API key `secret`).
/// Returns the store, client id and installation id.
pub fn seeded_store() -> (Store, i64, i64) {
    let store = Store::open_in_memory().unwrap();
    let client_id = store.add_client("Acme").unwrap();
    let installation_id = store.add_installation(client_id, "acme-prod", "secret").unwrap();
    (store, client_id, installation_id)
}

/// Insert a target under `installation_id`.
pub fn add_target(store: &Store, installation_id: i64, name: &str, url: &str, timeout_ms: u64) -> Target {
    let mut target = Target {
        installation_id,
        name: name.to_string(),
        url: url.to_string(),
        timeout_ms,
        ..Default::default()
    };
    store.add_target(&mut target).unwrap();
    target
}
