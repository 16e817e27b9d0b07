//! Status classification and alert levels.
//!
//! Pure functions only, so the policy can be tested without any network.

use super::{ProbeError, ProbeResult, Response};
use crate::db::{AlertLevel, ProbeStatus, Target};

/// Map an observed response code to a status.
///
/// The exact expected code is UP. Any other 2xx/3xx is a partial success.
pub fn status_for_code(expected: u16, actual: u16) -> ProbeStatus {
    if actual == expected {
        ProbeStatus::Up
    } else if (200..400).contains(&actual) {
        ProbeStatus::Degraded
    } else {
        ProbeStatus::Down
    }
}

/// Turn a raw probe outcome into a result.
pub fn classify(expected: u16, outcome: Result<Response, ProbeError>) -> ProbeResult {
    match outcome {
        Ok(response) => {
            let status = status_for_code(expected, response.code);
            let error_message = match status {
                ProbeStatus::Up => None,
                _ => Some(
                    ProbeError::UnexpectedStatus {
                        expected,
                        actual: response.code,
                    }
                    .to_string(),
                ),
            };
            ProbeResult {
                status,
                latency_ms: Some(response.elapsed.as_millis() as i64),
                status_code: Some(response.code),
                error_message,
            }
        }
        Err(ProbeError::Timeout(limit)) => ProbeResult::timed_out(limit),
        Err(e) => ProbeResult::failed(e.to_string()),
    }
}

/// Latency bounds for alerting. Unset bounds never fire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Thresholds {
    pub warning_ms: Option<i64>,
    pub error_ms: Option<i64>,
}

impl From<&Target> for Thresholds {
    fn from(target: &Target) -> Self {
        Self {
            warning_ms: target.warning_ms,
            error_ms: target.error_ms,
        }
    }
}

/// Severity of a result: DOWN is critical, slow or partial results warn.
pub fn alert_level(result: &ProbeResult, thresholds: Thresholds) -> AlertLevel {
    if result.status == ProbeStatus::Down {
        return AlertLevel::Critical;
    }

    let exceeds = |limit: Option<i64>| match (result.latency_ms, limit) {
        (Some(latency), Some(limit)) => latency > limit,
        _ => false,
    };

    if exceeds(thresholds.error_ms) {
        AlertLevel::Error
    } else if result.status == ProbeStatus::Degraded || exceeds(thresholds.warning_ms) {
        AlertLevel::Warning
    } else {
        AlertLevel::Ok
    }
}
