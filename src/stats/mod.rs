//! Read-side analysis of the log stream: status roll-ups, windowed
//! statistics and retention.

mod aggregate;
mod retention;
mod window;

pub use aggregate::*;
pub use retention::*;
pub use window::*;

use crate::db::DbError;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Stats and retention error types.
///
/// Everything except [`StatsError::Store`] is a rejected request: the caller
/// asked for a window or horizon outside the configured bounds.
#[derive(Error, Debug)]
pub enum StatsError {
    #[error("window start {start} is after end {end}")]
    InvalidWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    #[error("window of {hours}h exceeds the maximum of {max_hours}h")]
    WindowTooLarge { hours: i64, max_hours: i64 },
    #[error("hours must be between {min} and {max}, got {got}")]
    HoursOutOfRange { got: i64, min: i64, max: i64 },
    #[error("retention must be between {min} and {max} days, got {got}")]
    HorizonOutOfRange { got: i64, min: i64, max: i64 },
    #[error(transparent)]
    Store(#[from] DbError),
}

impl StatsError {
    /// True when the request itself was invalid, as opposed to a store failure.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, StatsError::Store(_))
    }
}
