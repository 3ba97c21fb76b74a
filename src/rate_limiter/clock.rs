//! Clock abstraction for refill scheduling.
//!
//! The limiter measures everything against a monotonic microsecond clock
//! and sleeps on condition variables between refills. Both concerns go
//! through [`SystemClock`] so tests can substitute a virtual clock and
//! drive refill boundaries by hand instead of sleeping for real.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, MutexGuard, PoisonError};
use std::time::Duration;

use super::utils::monotonic_micros;

/// Source of monotonic time and timed condition-variable waits.
///
/// Implementations must be cheap to query; `now_micros` is read on every
/// pass of the coordination loop. `timed_wait` has a default implementation
/// on top of [`Condvar::wait_timeout`] which is right for any clock that
/// reports real time; virtual clocks override it so a "sleep until the next
/// refill" does not block the test for a real refill period.
pub trait SystemClock: Send + Sync + 'static {
    /// Current monotonic time in microseconds. Must never go backwards.
    fn now_micros(&self) -> u64;

    /// Blocks on `cv` until notified, spuriously woken, or `timeout`
    /// elapses, releasing `guard` for the duration of the wait.
    fn timed_wait<'a, T>(
        &self,
        cv: &Condvar,
        guard: MutexGuard<'a, T>,
        timeout: Duration,
    ) -> MutexGuard<'a, T> {
        match cv.wait_timeout(guard, timeout) {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        }
    }
}

/// The production clock: monotonic microseconds, real timed waits.
///
/// # Example
///
/// ```rust
/// use iorate::{MonotonicClock, SystemClock};
///
/// let clock = MonotonicClock::default();
/// assert!(clock.now_micros() > 0);
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl SystemClock for MonotonicClock {
    #[inline]
    fn now_micros(&self) -> u64 {
        monotonic_micros()
    }
}

/// A hand-driven clock for deterministic tests.
///
/// Time only moves when [`advance_micros`](ManualClock::advance_micros) is
/// called. Its `timed_wait` never honors the requested timeout: it parks
/// the waiter for one real millisecond at a time so the coordination loop
/// keeps re-evaluating virtual time while the test advances it from
/// another thread.
///
/// # Example
///
/// ```rust
/// use iorate::{ManualClock, SystemClock};
///
/// let clock = ManualClock::new(1_000);
/// assert_eq!(clock.now_micros(), 1_000);
/// clock.advance_micros(250);
/// assert_eq!(clock.now_micros(), 1_250);
/// ```
#[derive(Debug)]
pub struct ManualClock {
    micros: AtomicU64,
}

/// Real poll interval used by [`ManualClock::timed_wait`].
const MANUAL_POLL: Duration = Duration::from_millis(1);

impl ManualClock {
    /// Creates a clock frozen at `start_micros`.
    pub fn new(start_micros: u64) -> Self {
        Self {
            micros: AtomicU64::new(start_micros),
        }
    }

    /// Moves the clock forward by `micros` microseconds.
    pub fn advance_micros(&self, micros: u64) {
        self.micros.fetch_add(micros, Ordering::SeqCst);
    }
}

impl SystemClock for ManualClock {
    #[inline]
    fn now_micros(&self) -> u64 {
        self.micros.load(Ordering::SeqCst)
    }

    fn timed_wait<'a, T>(
        &self,
        cv: &Condvar,
        guard: MutexGuard<'a, T>,
        _timeout: Duration,
    ) -> MutexGuard<'a, T> {
        match cv.wait_timeout(guard, MANUAL_POLL) {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        }
    }
}

/// Waits on `cv` without a timeout, recovering the guard from a poisoned
/// mutex instead of propagating the panic of an unrelated thread.
pub(crate) fn wait_unpoisoned<'a, T>(
    cv: &Condvar,
    guard: MutexGuard<'a, T>,
) -> MutexGuard<'a, T> {
    cv.wait(guard).unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_monotonic_clock_moves_forward() {
        let clock = MonotonicClock;
        let a = clock.now_micros();
        std::thread::sleep(Duration::from_millis(2));
        let b = clock.now_micros();
        assert!(b > a);
    }

    #[test]
    fn test_manual_clock_only_moves_on_advance() {
        let clock = ManualClock::new(500);
        assert_eq!(clock.now_micros(), 500);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(clock.now_micros(), 500);
        clock.advance_micros(1_000);
        assert_eq!(clock.now_micros(), 1_500);
    }

    #[test]
    fn test_manual_clock_timed_wait_returns_without_advancing() {
        let clock = ManualClock::new(0);
        let mutex = Mutex::new(());
        let cv = Condvar::new();

        let guard = mutex.lock().unwrap();
        let start = std::time::Instant::now();
        let _guard = clock.timed_wait(&cv, guard, Duration::from_secs(3600));
        // The requested hour is ignored; only the short poll elapses.
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(clock.now_micros(), 0);
    }

    #[test]
    fn test_monotonic_timed_wait_honors_timeout() {
        let clock = MonotonicClock;
        let mutex = Mutex::new(());
        let cv = Condvar::new();

        let guard = mutex.lock().unwrap();
        let start = std::time::Instant::now();
        let _guard = clock.timed_wait(&cv, guard, Duration::from_millis(20));
        assert!(start.elapsed() >= Duration::from_millis(15));
    }
}
