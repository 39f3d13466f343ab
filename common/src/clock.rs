use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::ClockError;

/// Wall clock shared by every component of the lamp.
///
/// Handles are cheap to clone and all clones observe the same time. `set`
/// is only called by a successful NTP exchange.
pub trait Clock: Clone {
    fn now(&self) -> DateTime<Utc>;

    fn set(&self, now: DateTime<Utc>) -> Result<(), ClockError>;

    fn sleep(&self, duration: Duration);

    fn unix_now(&self) -> i64 {
        self.now().timestamp()
    }

    /// Seconds since the Unix epoch with millisecond resolution.
    fn unix_now_f64(&self) -> f64 {
        unix_seconds_f64(self.now())
    }
}

pub fn unix_seconds_f64(at: DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64 / 1_000.0
}

pub fn from_unix(seconds: i64) -> Result<DateTime<Utc>, ClockError> {
    DateTime::<Utc>::from_timestamp(seconds, 0).ok_or(ClockError::OutOfRange(seconds))
}
