//! Time sources for the limiter.
//!
//! All window arithmetic runs on millisecond timestamps taken from a
//! [`Clock`]. The production clock wraps wall-clock time in a monotonic
//! clamp so that a backward NTP correction can never make previously
//! recorded entries appear to be in the future relative to the window
//! cutoff.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A source of millisecond timestamps since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Wall-clock time, unclamped. Prefer [`MonotonicClock`] in the limiter.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Clamps an inner clock so observed time never moves backward.
///
/// Returns `max(now, last_seen)`, updating `last_seen` atomically. A clock
/// that jumps backward (NTP correction) therefore appears frozen until real
/// time catches up, rather than letting fresh entries land behind the
/// window cutoff.
pub struct MonotonicClock<C> {
    inner: C,
    last_seen: AtomicU64,
}

impl<C: Clock> MonotonicClock<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            last_seen: AtomicU64::new(0),
        }
    }
}

impl<C: Clock> Clock for MonotonicClock<C> {
    fn now_ms(&self) -> u64 {
        let now = self.inner.now_ms();
        let prev = self.last_seen.fetch_max(now, Ordering::AcqRel);
        now.max(prev)
    }
}

/// A manually advanced clock for tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    pub fn advance_ms(&self, delta: u64) {
        self.now.fetch_add(delta, Ordering::SeqCst);
    }

    pub fn set_ms(&self, now_ms: u64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_advances() {
        let clock = SystemClock;
        let a = clock.now_ms();
        let b = clock.now_ms();
        assert!(b >= a);
        assert!(a > 1_600_000_000_000); // sanity: after Sep 2020
    }

    #[test]
    fn test_monotonic_clamp_on_backward_jump() {
        let inner = ManualClock::new(10_000);
        let clock = MonotonicClock::new(inner);

        assert_eq!(clock.now_ms(), 10_000);

        // Simulate an NTP correction jumping the wall clock backward.
        clock.inner.set_ms(4_000);
        assert_eq!(clock.now_ms(), 10_000);

        // Once real time catches up, the clamp releases.
        clock.inner.set_ms(12_000);
        assert_eq!(clock.now_ms(), 12_000);
    }

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::new(0);
        clock.advance_ms(1_500);
        assert_eq!(clock.now_ms(), 1_500);
    }
}
