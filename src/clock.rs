//! Wall-clock time source.
//!
//! Every remaining-time computation reads `now` through [`Clock`] so that the
//! daemon and the viewers agree on one notion of "now" and tests can drive
//! time by hand.

#[cfg(any(test, feature = "test-utils"))]
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub type Millis = u64;

/// Wall-clock abstraction.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Returns the current wall-clock time in milliseconds.
    fn now_millis(&self) -> Millis;
}

// ============================================================================
// SystemClock
// ============================================================================

/// Clock backed by `SystemTime::now()`.
///
/// Wall-clock based so that deadlines survive a process restart.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> Millis {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }
}

// ============================================================================
// ManualClock
// ============================================================================

/// Clock that only moves when told to.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

#[cfg(any(test, feature = "test-utils"))]
impl ManualClock {
    /// Creates a clock frozen at `start`.
    #[must_use]
    pub fn new(start: Millis) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    /// Moves the clock forward by `millis`.
    pub fn advance(&self, millis: u64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }

    /// Moves the clock forward by whole seconds.
    pub fn advance_secs(&self, secs: u64) {
        self.advance(secs * 1000);
    }

    /// Jumps the clock to an absolute instant.
    pub fn set(&self, now: Millis) {
        self.now.store(now, Ordering::SeqCst);
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl Clock for ManualClock {
    fn now_millis(&self) -> Millis {
        self.now.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Remaining time
// ============================================================================

/// Whole seconds left until `end_time`, rounded up and never negative.
///
/// A 100 ms remainder still reads as one second; anything at or past the
/// deadline reads as zero.
#[must_use]
pub fn remaining_seconds(end_time: Millis, now: Millis) -> u32 {
    let left = end_time.saturating_sub(now);
    u32::try_from(left.div_ceil(1000)).unwrap_or(u32::MAX)
}
