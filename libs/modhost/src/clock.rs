//! Wall-clock access shared by the scheduler, async manager and event bus.
//!
//! Timestamps are plain `f64` epoch seconds so callers can inject a fixed
//! `now` into `tick` and tests never have to sleep.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as fractional epoch seconds.
pub(crate) fn now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
