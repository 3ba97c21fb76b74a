//! Time and alignment helpers shared by the limiter internals.
//!
//! The limiter never consults wall-clock time for scheduling decisions: the
//! process-wide monotonic anchor below pins a wall-clock epoch once at first
//! use and advances it with a monotonic [`Instant`], so a stepped system
//! clock cannot stall or rush refills.

use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Microseconds per second, the denominator of every rate computation.
pub(crate) const MICROS_PER_SECOND: i64 = 1_000_000;

// Monotonic time base. The wall-clock epoch is sampled exactly once; all
// subsequent readings are that base plus monotonic elapsed time.
static START_TIME_BASE: OnceLock<(Instant, u64)> = OnceLock::new();

/// Returns monotonic microseconds since the UNIX epoch.
///
/// The value is anchored to the wall clock at first call and driven by a
/// monotonic [`Instant`] afterwards, so it never goes backwards.
///
/// # Example
///
/// ```rust
/// use iorate::monotonic_micros;
///
/// let a = monotonic_micros();
/// let b = monotonic_micros();
/// assert!(b >= a);
/// ```
#[inline(always)]
pub fn monotonic_micros() -> u64 {
    let (start, base_ms) = START_TIME_BASE.get_or_init(|| {
        let epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        (Instant::now(), epoch_ms)
    });
    base_ms
        .saturating_mul(1000)
        .saturating_add(start.elapsed().as_micros() as u64)
}

/// Rounds `bytes` down to a multiple of `alignment`.
///
/// Used by [`request_token`](crate::IoRateLimiter::request_token) to keep
/// direct-I/O transfers on page boundaries. An `alignment` of zero or less
/// leaves `bytes` untouched.
///
/// # Example
///
/// ```rust
/// use iorate::truncate_to_boundary;
///
/// assert_eq!(truncate_to_boundary(4096, 10_000), 8192);
/// assert_eq!(truncate_to_boundary(4096, 4096), 4096);
/// assert_eq!(truncate_to_boundary(0, 10_000), 10_000);
/// ```
#[inline]
pub fn truncate_to_boundary(alignment: i64, bytes: i64) -> i64 {
    if alignment <= 0 {
        return bytes;
    }
    bytes / alignment * alignment
}
