//! Timestamp utilities and the server wall-clock source

use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Current Unix epoch time in milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert Unix epoch milliseconds to a UTC timestamp
///
/// Out-of-range values clamp to the Unix epoch.
pub fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_default()
}

/// Source of server-side time for recorded events
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// System clock that never steps backwards
///
/// Readings are millisecond precision and non-decreasing across calls, so
/// events stamped in insertion order keep non-decreasing timestamps even if
/// the host clock is adjusted.
#[derive(Debug, Default)]
pub struct SystemClock {
    last_millis: AtomicI64,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        let wall = now_millis();
        let previous = self.last_millis.fetch_max(wall, Ordering::AcqRel);
        from_millis(wall.max(previous))
    }
}

/// Manually driven clock for tests and replays
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(start.timestamp_millis()),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        self.millis.store(at.timestamp_millis(), Ordering::Release);
    }

    pub fn advance_secs(&self, secs: i64) {
        self.millis.fetch_add(secs * 1000, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        from_millis(self.millis.load(Ordering::Acquire))
    }
}
