//! Probe module for endpoint health checks.
//!
//! A probe never fails: every outcome, including timeouts and transport
//! errors, is classified into a [`ProbeResult`] that gets logged.

mod classify;
mod http;

pub use classify::*;
pub use http::*;

use crate::db::{ProbeStatus, Target};

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Probe error types.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProbeError {
    #[error("timeout")]
    Timeout(Duration),
    #[error("{0}")]
    Transport(String),
    #[error("unexpected status code {actual} (expected {expected})")]
    UnexpectedStatus { expected: u16, actual: u16 },
}

/// A response that arrived before the deadline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Response {
    pub code: u16,
    /// Time from dispatch until the response headers arrived.
    pub elapsed: Duration,
}

/// The classified outcome of one probe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeResult {
    pub status: ProbeStatus,
    /// Whole milliseconds. For timeouts this is the timeout itself.
    pub latency_ms: Option<i64>,
    pub status_code: Option<u16>,
    pub error_message: Option<String>,
}

impl ProbeResult {
    /// DOWN result for a probe that did not finish within `limit`.
    pub fn timed_out(limit: Duration) -> Self {
        Self {
            status: ProbeStatus::Down,
            latency_ms: Some(limit.as_millis() as i64),
            status_code: None,
            error_message: Some(ProbeError::Timeout(limit).to_string()),
        }
    }

    /// DOWN result carrying only an error message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: ProbeStatus::Down,
            latency_ms: None,
            status_code: None,
            error_message: Some(message.into()),
        }
    }
}

/// Performs one check of one target.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, target: &Target, credential: &str) -> ProbeResult;
}
