//! Wrap-safe millisecond timing.
//!
//! Timestamps are 32-bit millisecond counters that roll over after roughly
//! 49.7 days. Every comparison goes through wrapping subtraction, so a
//! rollover between the mark and "now" never reads as a huge elapsed time.

use serde::{Deserialize, Serialize};
use std::{fmt, time::Instant};

/// Point on a wrapping 32-bit millisecond clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp(u32);

impl Timestamp {
    pub const fn from_millis(ms: u32) -> Self {
        Self(ms)
    }

    pub const fn as_millis(self) -> u32 {
        self.0
    }

    /// Milliseconds from `earlier` to `self`, modulo 2^32.
    pub const fn wrapping_since(self, earlier: Timestamp) -> u32 {
        self.0.wrapping_sub(earlier.0)
    }

    pub const fn wrapping_add(self, ms: u32) -> Self {
        Self(self.0.wrapping_add(ms))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Source of "now".
pub trait Clock {
    fn now(&self) -> Timestamp;
}

/// Monotonic clock counting from its own creation.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Timestamp {
        // Truncation is the rollover.
        Timestamp(self.origin.elapsed().as_millis() as u32)
    }
}

/// True iff at least `period_ms` passed from `mark` to `now`.
///
/// Without a mark nothing has elapsed yet.
pub fn elapsed(mark: Option<Timestamp>, now: Timestamp, period_ms: u32) -> bool {
    match mark {
        Some(mark) => now.wrapping_since(mark) >= period_ms,
        None => false,
    }
}

/// "Every N milliseconds" gate.
///
/// The first `ready` call only arms the timer, so a freshly created timer fires
/// one full period later instead of immediately.
#[derive(Debug, Clone)]
pub struct Timer {
    period_ms: u32,
    mark: Option<Timestamp>,
}

impl Timer {
    pub fn new(period_ms: u32) -> Self {
        Self {
            period_ms,
            mark: None,
        }
    }

    pub fn period_ms(&self) -> u32 {
        self.period_ms
    }

    pub fn mark(&self) -> Option<Timestamp> {
        self.mark
    }

    pub fn elapsed(&self, now: Timestamp) -> bool {
        elapsed(self.mark, now, self.period_ms)
    }

    pub fn reset(&mut self, now: Timestamp) -> Timestamp {
        self.mark = Some(now);
        now
    }

    /// Returns true once per period and re-arms on firing.
    pub fn ready(&mut self, now: Timestamp) -> bool {
        if self.mark.is_none() {
            self.reset(now);
            return false;
        }
        if self.elapsed(now) {
            self.reset(now);
            return true;
        }
        false
    }

    pub fn set_period(&mut self, period_ms: u32, now: Timestamp) {
        self.period_ms = period_ms;
        self.reset(now);
    }
}
