//! Observability for the limiter: an externally pluggable statistics sink
//! plus a consistent snapshot of the internal counters.
//!
//! ```text
//!     Metrics Snapshot:
//!     ┌─────────────────────────────────────┐
//!     │  Bytes through (User): 12 MiB       │
//!     │  Bytes through (Low):   3 MiB       │
//!     │  Queued requests:       2           │
//!     │  Available (client 0):  98 304 B    │
//!     └─────────────────────────────────────┘
//! ```
//!
//! The per-priority and per-client counters are maintained under the
//! limiter mutex and are monotonic; the snapshot is taken in one critical
//! section so its fields are mutually consistent.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use super::config::IoPriority;
use super::context::NUM_CLIENTS;

/// Event counters a [`Statistics`] sink may receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Ticker {
    /// A queued request became the refill leader and started a timed wait
    /// on the refill timer.
    NumberRateLimiterDrains,
}

/// Sink for limiter event ticks.
///
/// Passed per call to [`request`](crate::IoRateLimiter::request) /
/// [`request_token`](crate::IoRateLimiter::request_token) so different
/// storage-engine instances can report to different registries. The limiter
/// calls it while holding its mutex; implementations must not block.
pub trait Statistics: Send + Sync {
    /// Adds `count` to the counter identified by `ticker`.
    fn record_tick(&self, ticker: Ticker, count: u64);
}

/// A [`Statistics`] implementation backed by plain atomic counters.
///
/// Handy default for tests and for callers without a metrics registry.
///
/// # Example
///
/// ```rust
/// use iorate::{CountingStatistics, Statistics, Ticker};
///
/// let stats = CountingStatistics::new();
/// stats.record_tick(Ticker::NumberRateLimiterDrains, 1);
/// assert_eq!(stats.count(Ticker::NumberRateLimiterDrains), 1);
/// ```
#[derive(Debug, Default)]
pub struct CountingStatistics {
    drains: AtomicU64,
}

impl CountingStatistics {
    /// Creates a sink with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `ticker`.
    pub fn count(&self, ticker: Ticker) -> u64 {
        match ticker {
            Ticker::NumberRateLimiterDrains => self.drains.load(Ordering::Relaxed),
        }
    }
}

impl Statistics for CountingStatistics {
    fn record_tick(&self, ticker: Ticker, count: u64) {
        match ticker {
            Ticker::NumberRateLimiterDrains => {
                self.drains.fetch_add(count, Ordering::Relaxed);
            }
        }
    }
}

/// Consistent snapshot of an [`IoRateLimiter`](crate::IoRateLimiter)'s
/// counters and bucket levels.
///
/// Produced by [`metrics`](crate::IoRateLimiter::metrics). All counter
/// fields are monotonic across successive snapshots; bucket levels and the
/// queue depth are instantaneous.
#[derive(Debug, Clone)]
pub struct IoLimiterMetrics {
    /// Requests admitted per scheduled priority class, indexed by
    /// [`IoPriority::index`].
    pub total_requests: [u64; IoPriority::COUNT],

    /// Bytes fully granted per scheduled priority class.
    pub total_bytes_through: [u64; IoPriority::COUNT],

    /// Diagnostic: calls observed per client.
    pub calls_per_client: [u64; NUM_CLIENTS],

    /// Diagnostic: total calls observed.
    pub total_calls: u64,

    /// Tokens currently left in each client's bucket.
    pub available_bytes: [i64; NUM_CLIENTS],

    /// Requests currently parked in the queue matrix.
    pub queued_requests: usize,

    /// Configured rate at snapshot time.
    pub rate_bytes_per_sec: i64,

    /// Tokens each bucket restarts with at a refill.
    pub refill_bytes_per_period: i64,
}

impl IoLimiterMetrics {
    /// Requests admitted at `pri`; [`IoPriority::Total`] sums all classes.
    pub fn requests(&self, pri: IoPriority) -> u64 {
        match pri {
            IoPriority::Total => self.total_requests.iter().sum(),
            scheduled => self.total_requests[scheduled.index()],
        }
    }

    /// Bytes fully granted at `pri`; [`IoPriority::Total`] sums all
    /// classes.
    pub fn bytes_through(&self, pri: IoPriority) -> u64 {
        match pri {
            IoPriority::Total => self.total_bytes_through.iter().sum(),
            scheduled => self.total_bytes_through[scheduled.index()],
        }
    }

    /// Sum of all clients' currently available tokens.
    ///
    /// Bounded by `NUM_CLIENTS * refill_bytes_per_period` at all times.
    pub fn available_total(&self) -> i64 {
        self.available_bytes.iter().sum()
    }

    /// Human-readable multi-line report, suitable for logs.
    pub fn summary(&self) -> String {
        format!(
            "IoRateLimiter Metrics:\n\
             ├─ Throughput:\n\
             │  ├─ Rate: {} B/s\n\
             │  ├─ Refill per period: {} B\n\
             │  └─ Bytes through (total): {}\n\
             ├─ Requests:\n\
             │  ├─ Admitted (total): {}\n\
             │  └─ Queued now: {}\n\
             └─ Buckets:\n\
                ├─ Available (total): {} B\n\
                └─ Calls observed: {}",
            self.rate_bytes_per_sec,
            self.refill_bytes_per_period,
            self.bytes_through(IoPriority::Total),
            self.requests(IoPriority::Total),
            self.queued_requests,
            self.available_total(),
            self.total_calls,
        )
    }
}

impl fmt::Display for IoLimiterMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> IoLimiterMetrics {
        IoLimiterMetrics {
            total_requests: [4, 0, 1, 7],
            total_bytes_through: [400, 0, 100, 700],
            calls_per_client: [3, 2, 0, 0, 7],
            total_calls: 12,
            available_bytes: [10, 20, 0, 0, 5],
            queued_requests: 2,
            rate_bytes_per_sec: 1_000_000,
            refill_bytes_per_period: 100_000,
        }
    }

    #[test]
    fn test_per_priority_accessors() {
        let metrics = sample();
        assert_eq!(metrics.requests(IoPriority::Low), 4);
        assert_eq!(metrics.requests(IoPriority::User), 7);
        assert_eq!(metrics.requests(IoPriority::Total), 12);
        assert_eq!(metrics.bytes_through(IoPriority::High), 100);
        assert_eq!(metrics.bytes_through(IoPriority::Total), 1200);
    }

    #[test]
    fn test_available_total() {
        assert_eq!(sample().available_total(), 35);
    }

    #[test]
    fn test_summary_contains_key_lines() {
        let text = sample().summary();
        assert!(text.contains("IoRateLimiter Metrics"));
        assert!(text.contains("Rate: 1000000 B/s"));
        assert!(text.contains("Queued now: 2"));

        let display = format!("{}", sample());
        assert_eq!(display, text);
    }

    #[test]
    fn test_counting_statistics() {
        let stats = CountingStatistics::new();
        assert_eq!(stats.count(Ticker::NumberRateLimiterDrains), 0);
        stats.record_tick(Ticker::NumberRateLimiterDrains, 2);
        stats.record_tick(Ticker::NumberRateLimiterDrains, 1);
        assert_eq!(stats.count(Ticker::NumberRateLimiterDrains), 3);
    }
}
