//! Small helpers for second-valued arithmetic on UTC timestamps.
//!
//! The engine works in floating-point seconds (residuals, gates, publication
//! intervals) while timestamps are `DateTime<Utc>`. These two helpers keep
//! the conversions in one place, at millisecond resolution.

use chrono::{DateTime, Duration, Utc};

/// Signed difference `a - b` in seconds.
pub fn seconds_between(a: DateTime<Utc>, b: DateTime<Utc>) -> f64 {
    (a - b).num_milliseconds() as f64 / 1000.0
}

/// `t + secs`, rounded to whole milliseconds.
pub fn add_seconds(t: DateTime<Utc>, secs: f64) -> DateTime<Utc> {
    t + Duration::milliseconds((secs * 1000.0).round() as i64)
}
