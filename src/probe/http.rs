//! HTTP probe implementation.

use std::error::Error as StdError;
use std::time::Instant;

use async_trait::async_trait;
use reqwest::header::HeaderName;
use reqwest::Method;

use super::{classify, ProbeError, ProbeResult, Prober, Response};
use crate::db::Target;

/// Probes targets over HTTP(S) with a shared connection pool.
#[derive(Clone)]
pub struct HttpProber {
    client: reqwest::Client,
    credential_header: HeaderName,
}

impl HttpProber {
    /// Build a prober that sends the credential in `credential_header`.
    pub fn new(credential_header: &str) -> Result<Self, ProbeError> {
        let credential_header = HeaderName::from_bytes(credential_header.as_bytes())
            .map_err(|e| ProbeError::Transport(format!("invalid credential header: {}", e)))?;

        // Redirects are reported, not followed: a 3xx is a partial success.
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ProbeError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            credential_header,
        })
    }

    /// Send one request and wait for the response headers.
    pub async fn send(&self, target: &Target, credential: &str) -> Result<Response, ProbeError> {
        let method = Method::from_bytes(target.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| ProbeError::Transport(format!("invalid HTTP method: {}", target.method)))?;
        let timeout = target.timeout();

        let request = self
            .client
            .request(method, &target.url)
            .header(self.credential_header.clone(), credential);

        let start = Instant::now();

        // The body is never read; elapsed time stops at the headers.
        match tokio::time::timeout(timeout, request.send()).await {
            Err(_) => Err(ProbeError::Timeout(timeout)),
            Ok(Err(e)) if e.is_timeout() => Err(ProbeError::Timeout(timeout)),
            Ok(Err(e)) => Err(ProbeError::Transport(describe(&e))),
            Ok(Ok(response)) => Ok(Response {
                code: response.status().as_u16(),
                elapsed: start.elapsed(),
            }),
        }
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, target: &Target, credential: &str) -> ProbeResult {
        let outcome = self.send(target, credential).await;
        classify(target.expected_code, outcome)
    }
}

/// Flatten an error and its sources into one line.
fn describe(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ProbeStatus;
    use crate::test_util::{closed_port, spawn_target_server};

    fn target(url: String, timeout_ms: u64) -> Target {
        Target {
            id: 1,
            url,
            timeout_ms,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_expected_code_is_up() {
        let addr = spawn_target_server().await;
        let prober = HttpProber::new("X-API-Key").unwrap();

        let result = prober.probe(&target(format!("http://{}/ok", addr), 5000), "secret").await;
        assert_eq!(result.status, ProbeStatus::Up);
        assert_eq!(result.status_code, Some(200));
        assert!(result.latency_ms.is_some());
        assert_eq!(result.error_message, None);
    }

    #[tokio::test]
    async fn test_service_unavailable_is_down() {
        let addr = spawn_target_server().await;
        let prober = HttpProber::new("X-API-Key").unwrap();

        let result = prober
            .probe(&target(format!("http://{}/unavailable", addr), 2000), "secret")
            .await;
        assert_eq!(result.status, ProbeStatus::Down);
        assert_eq!(result.status_code, Some(503));
        assert!(result.latency_ms.is_some());
    }

    #[tokio::test]
    async fn test_redirect_is_degraded() {
        let addr = spawn_target_server().await;
        let prober = HttpProber::new("X-API-Key").unwrap();

        let result = prober.probe(&target(format!("http://{}/moved", addr), 2000), "secret").await;
        assert_eq!(result.status, ProbeStatus::Degraded);
        assert_eq!(result.status_code, Some(302));
    }

    #[tokio::test]
    async fn test_slow_target_times_out() {
        let addr = spawn_target_server().await;
        let prober = HttpProber::new("X-API-Key").unwrap();

        let result = prober.probe(&target(format!("http://{}/slow", addr), 200), "secret").await;
        assert_eq!(result.status, ProbeStatus::Down);
        assert_eq!(result.latency_ms, Some(200));
        assert_eq!(result.status_code, None);
        assert_eq!(result.error_message.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_down_without_latency() {
        let addr = closed_port().await;
        let prober = HttpProber::new("X-API-Key").unwrap();

        let result = prober.probe(&target(format!("http://{}/ok", addr), 2000), "secret").await;
        assert_eq!(result.status, ProbeStatus::Down);
        assert_eq!(result.latency_ms, None);
        assert!(result.error_message.is_some());
    }

    #[tokio::test]
    async fn test_credential_header_is_attached() {
        let addr = spawn_target_server().await;
        let prober = HttpProber::new("X-API-Key").unwrap();
        let t = target(format!("http://{}/auth", addr), 2000);

        assert_eq!(prober.probe(&t, "secret").await.status, ProbeStatus::Up);
        let rejected = prober.probe(&t, "wrong").await;
        assert_eq!(rejected.status, ProbeStatus::Down);
        assert_eq!(rejected.status_code, Some(401));
    }

    #[tokio::test]
    async fn test_invalid_url_and_method_are_down() {
        let prober = HttpProber::new("X-API-Key").unwrap();

        let bad_url = prober.probe(&target("not a url".to_string(), 1000), "secret").await;
        assert_eq!(bad_url.status, ProbeStatus::Down);
        assert!(bad_url.error_message.is_some());

        let mut bad_method = target("http://127.0.0.1:9/".to_string(), 1000);
        bad_method.method = "NOT A METHOD".to_string();
        let result = prober.probe(&bad_method, "secret").await;
        assert_eq!(result.status, ProbeStatus::Down);
        assert_eq!(result.error_message.as_deref(), Some("invalid HTTP method: NOT A METHOD"));
    }

    #[test]
    fn test_invalid_credential_header_rejected() {
        assert!(HttpProber::new("bad header").is_err());
    }
}
