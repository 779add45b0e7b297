//! Time-related utilities with clock abstraction for testability.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, TimeZone, Utc};

/// Clock trait for dependency injection and testing
pub trait Clock: Send + Sync {
    /// Get current time as a UTC datetime
    fn now(&self) -> DateTime<Utc>;

    /// Get current Unix timestamp (milliseconds)
    fn now_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }

    /// Get current Unix timestamp (seconds)
    fn now_secs(&self) -> i64 {
        self.now().timestamp()
    }
}

/// System clock implementation (uses actual system time)
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fixed clock implementation for testing (returns a fixed time)
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    fixed_time: i64,
}

impl FixedClock {
    /// Create a new fixed clock with the given timestamp
    pub fn new(fixed_time_millis: i64) -> Self {
        Self {
            fixed_time: fixed_time_millis,
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        millis_to_datetime(self.fixed_time)
    }
}

/// Manually driven clock for testing timeouts and sweeps.
///
/// Starts at the given timestamp and only moves when `advance` or `set` is called.
#[derive(Debug)]
pub struct ManualClock {
    current: AtomicI64,
}

impl ManualClock {
    /// Create a new manual clock starting at the given timestamp
    pub fn new(start_millis: i64) -> Self {
        Self {
            current: AtomicI64::new(start_millis),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: std::time::Duration) {
        self.current
            .fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }

    /// Jump to an absolute timestamp
    pub fn set(&self, millis: i64) {
        self.current.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        millis_to_datetime(self.current.load(Ordering::SeqCst))
    }
}

/// Convert a Unix timestamp (milliseconds) to a UTC datetime.
///
/// Out-of-range values clamp to the Unix epoch.
pub fn millis_to_datetime(timestamp_millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(timestamp_millis)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
