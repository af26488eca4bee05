//! Time sources
//!
//! Every engine operation samples the clock once and threads that instant through
//! all of its sub-steps, so a single tick never mixes readings taken microseconds
//! apart. Tests and replays use [`ManualClock`] to drive simulated time.

use chrono::{DateTime, Local, TimeZone, Timelike, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Milliseconds since the Unix epoch
pub type Millis = i64;

/// Injected time source
pub trait Clock: Send + Sync {
    /// Current time in epoch milliseconds
    fn now_ms(&self) -> Millis;

    /// Wall-clock hour (0-23) of `ts` in the clock's local zone
    fn local_hour(&self, ts: Millis) -> u32;
}

/// Real clock backed by the system time and the host's local zone
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> Millis {
        Utc::now().timestamp_millis()
    }

    fn local_hour(&self, ts: Millis) -> u32 {
        match Local.timestamp_millis_opt(ts).single() {
            Some(dt) => dt.hour(),
            None => 0,
        }
    }
}

/// Manually advanced clock with a fixed UTC offset
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
    offset_secs: i32,
}

impl ManualClock {
    /// Create a clock starting at `start_ms`, reporting hours in UTC
    pub fn new(start_ms: Millis) -> Self {
        Self::with_offset(start_ms, 0)
    }

    /// Create a clock whose local hours are `offset_secs` east of UTC
    pub fn with_offset(start_ms: Millis, offset_secs: i32) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(start_ms)),
            offset_secs,
        }
    }

    /// Set the current time
    pub fn set(&self, ms: Millis) {
        self.now.store(ms, Ordering::SeqCst);
    }

    /// Move the clock forward by `ms`
    pub fn advance(&self, ms: Millis) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> Millis {
        self.now.load(Ordering::SeqCst)
    }

    fn local_hour(&self, ts: Millis) -> u32 {
        let shifted = ts.saturating_add(i64::from(self.offset_secs) * 1000);
        match DateTime::<Utc>::from_timestamp_millis(shifted) {
            Some(dt) => dt.hour(),
            None => 0,
        }
    }
}

/// Render epoch milliseconds as RFC 3339 (UTC)
pub fn to_rfc3339(ts: Millis) -> String {
    DateTime::<Utc>::from_timestamp_millis(ts)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}
