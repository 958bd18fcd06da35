//! Wall-clock timestamps and latency timers
//!
//! Session bookkeeping (start time, last activity) is reported in wall-clock
//! nanoseconds so it can be logged and compared across processes. Idle
//! detection itself runs on the monotonic `std::time::Instant`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Nanoseconds since the Unix epoch
#[inline]
pub fn nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

/// Milliseconds since the Unix epoch
#[inline]
pub fn millis() -> u64 {
    nanos() / 1_000_000
}

/// Wall-clock timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    /// Nanoseconds since Unix epoch
    pub nanos: u64,
}

impl Timestamp {
    pub fn from_nanos(nanos: u64) -> Self {
        Self { nanos }
    }

    pub fn now() -> Self {
        Self { nanos: nanos() }
    }

    pub fn as_millis(&self) -> u64 {
        self.nanos / 1_000_000
    }

    /// Time elapsed since this timestamp; zero if it lies in the future
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(nanos().saturating_sub(self.nanos))
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        let secs = (self.nanos / 1_000_000_000) as i64;
        let nsecs = (self.nanos % 1_000_000_000) as u32;
        DateTime::from_timestamp(secs, nsecs).unwrap_or_else(Utc::now)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        let nanos = dt.timestamp() as u64 * 1_000_000_000 + dt.timestamp_subsec_nanos() as u64;
        Self { nanos }
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_datetime().format("%Y-%m-%d %H:%M:%S%.3f UTC"))
    }
}

/// Named latency timer for connection phases (dial, TLS, upgrade, subscribe)
pub struct PerfTimer {
    start: Timestamp,
    name: &'static str,
}

impl PerfTimer {
    pub fn start(name: &'static str) -> Self {
        Self {
            start: Timestamp::now(),
            name,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_micros(&self) -> u64 {
        self.elapsed().as_micros() as u64
    }

    /// Log the elapsed time at debug level and return it
    pub fn log_elapsed(&self) -> Duration {
        let elapsed = self.elapsed();
        crate::log_latency!(self.name, elapsed.as_micros() as u64);
        elapsed
    }
}
