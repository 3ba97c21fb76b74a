//! # Limiter Configuration
//!
//! Configuration structures and enums for the multi-tenant I/O limiter.
//! Think of this as the "settings panel": how fast tokens flow back, which
//! operations are throttled at all, and how large a single draw may be.
//!
//! ## Token Flow Parameters
//!
//! ```text
//!     Per-client bucket, refilled every period:
//!
//!     ┌──────────────────────────────────┐
//!     │ rate_bytes_per_sec: 1 MiB/s      │
//!     │ refill_period_us:   100 000      │
//!     │                                  │
//!     │ Result: every 100 ms each client │
//!     │         bucket restarts at       │
//!     │         ~104 857 bytes           │
//!     └──────────────────────────────────┘
//! ```
//!
//! ## Priorities
//!
//! Within one client, queued requests are served in strict priority order:
//!
//! ```text
//!     User ──► High ──► Mid ──► Low
//! ```
//!
//! `Total` is not a schedulable class; it is the sentinel that means
//! "unlimited / bypass" at the request surface and "sum over all classes"
//! in the counter accessors.

use thiserror::Error;

/// Default refill period: 100 ms, expressed in microseconds.
pub const DEFAULT_REFILL_PERIOD_US: i64 = 100_000;

/// Default fairness knob value.
///
/// Fairness is accepted and clamped for API compatibility but does not
/// influence scheduling; priority order within a client is strict.
pub const DEFAULT_FAIRNESS: u32 = 10;

/// Upper clamp applied to the fairness knob at construction.
pub const MAX_FAIRNESS: u32 = 100;

/// Errors produced by the limiter's fallible surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// A caller-supplied value was out of range. The operation that
    /// returned this has had no effect.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

/// The direction of a byte transfer being throttled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpType {
    /// A read from underlying storage.
    Read,
    /// A write to underlying storage.
    Write,
}

/// Which operation types the limiter actually throttles.
///
/// Operations excluded by the mode pass through
/// [`request_token`](crate::IoRateLimiter::request_token) untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Only reads are rate limited.
    ReadsOnly,
    /// Only writes are rate limited (the default).
    WritesOnly,
    /// Both reads and writes are rate limited.
    AllIo,
}

impl Mode {
    /// Returns `true` when `op_type` falls under this mode.
    ///
    /// # Example
    ///
    /// ```rust
    /// use iorate::{Mode, OpType};
    ///
    /// assert!(Mode::WritesOnly.is_rate_limited(OpType::Write));
    /// assert!(!Mode::WritesOnly.is_rate_limited(OpType::Read));
    /// assert!(Mode::AllIo.is_rate_limited(OpType::Read));
    /// ```
    #[inline]
    pub fn is_rate_limited(self, op_type: OpType) -> bool {
        matches!(
            (self, op_type),
            (Mode::AllIo, _) | (Mode::ReadsOnly, OpType::Read) | (Mode::WritesOnly, OpType::Write)
        )
    }
}

impl Default for Mode {
    fn default() -> Self {
        Mode::WritesOnly
    }
}

/// I/O priority class of a request.
///
/// Ordered from lowest to highest urgency. `User` is strictly superior
/// within a client: no lower class receives tokens from a refill while a
/// `User` request is still queued for that client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IoPriority {
    /// Background work such as compactions.
    Low = 0,
    /// Elevated background work.
    Mid = 1,
    /// Latency-sensitive internal work such as flushes.
    High = 2,
    /// Foreground user traffic; always served first within a client.
    User = 3,
    /// Sentinel: bypass the limiter entirely. Also selects the sum over
    /// all classes in counter accessors.
    Total = 4,
}

impl IoPriority {
    /// Number of schedulable priority classes (`Total` excluded).
    pub const COUNT: usize = 4;

    /// The schedulable classes, lowest first.
    pub const SCHEDULED: [IoPriority; IoPriority::COUNT] = [
        IoPriority::Low,
        IoPriority::Mid,
        IoPriority::High,
        IoPriority::User,
    ];

    /// Returns `true` for every class except the `Total` sentinel.
    #[inline]
    pub fn is_scheduled(self) -> bool {
        self != IoPriority::Total
    }

    /// Array index of this class; `Total` maps to [`IoPriority::COUNT`].
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Configuration for an [`IoRateLimiter`](crate::IoRateLimiter).
///
/// Create one with [`IoRateLimiterConfig::bytes_per_second`] and refine it
/// with the `with_*` methods, or fill the fields directly.
///
/// # Example
///
/// ```rust
/// use iorate::{IoRateLimiterConfig, Mode};
///
/// // 8 MiB/s over both directions, refilled every 50 ms, with a
/// // deterministic refill permutation for tests.
/// let config = IoRateLimiterConfig::bytes_per_second(8 << 20)
///     .with_mode(Mode::AllIo)
///     .with_refill_period_us(50_000)
///     .with_seed(42);
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct IoRateLimiterConfig {
    /// Target aggregate throughput in bytes per second. Must be positive.
    pub rate_bytes_per_sec: i64,

    /// Interval between bucket refills in microseconds. Must be positive.
    /// Immutable once the limiter is built.
    pub refill_period_us: i64,

    /// Fairness knob, clamped to [`MAX_FAIRNESS`] at construction.
    /// Preserved for API compatibility; scheduling within a client is
    /// strict priority regardless of this value.
    pub fairness: u32,

    /// Which operation types are throttled.
    pub mode: Mode,

    /// When `true`, the limiter starts at half the configured rate and
    /// expects an external tuner to raise it via
    /// [`set_bytes_per_second`](crate::IoRateLimiter::set_bytes_per_second).
    pub auto_tuned: bool,

    /// Explicit cap on the bytes a single request may draw. Zero means
    /// "derive from one refill period's worth of tokens".
    pub single_burst_bytes: i64,

    /// When positive, reads are diverted to a dedicated nested limiter
    /// running at this rate, so reads and writes draw from disjoint
    /// buckets.
    pub read_rate_bytes_per_sec: i64,

    /// Seed for the per-refill client permutation. `None` seeds from
    /// entropy; tests that need a reproducible grant order inject a value.
    pub seed: Option<u64>,
}

impl Default for IoRateLimiterConfig {
    /// 64 MiB/s, 100 ms refill period, writes only, no explicit burst,
    /// no read split.
    fn default() -> Self {
        Self {
            rate_bytes_per_sec: 64 << 20,
            refill_period_us: DEFAULT_REFILL_PERIOD_US,
            fairness: DEFAULT_FAIRNESS,
            mode: Mode::default(),
            auto_tuned: false,
            single_burst_bytes: 0,
            read_rate_bytes_per_sec: 0,
            seed: None,
        }
    }
}

impl IoRateLimiterConfig {
    /// Creates a configuration with the given rate and all other fields at
    /// their defaults.
    pub fn bytes_per_second(rate_bytes_per_sec: i64) -> Self {
        Self {
            rate_bytes_per_sec,
            ..Default::default()
        }
    }

    /// Sets the refill period in microseconds.
    pub fn with_refill_period_us(mut self, refill_period_us: i64) -> Self {
        self.refill_period_us = refill_period_us;
        self
    }

    /// Sets the fairness knob (kept for compatibility, unused for
    /// scheduling).
    pub fn with_fairness(mut self, fairness: u32) -> Self {
        self.fairness = fairness;
        self
    }

    /// Sets which operation types are throttled.
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Enables or disables the auto-tune initial-rate halving.
    pub fn with_auto_tuned(mut self, auto_tuned: bool) -> Self {
        self.auto_tuned = auto_tuned;
        self
    }

    /// Sets an explicit single-burst cap; zero derives it from the refill.
    pub fn with_single_burst_bytes(mut self, single_burst_bytes: i64) -> Self {
        self.single_burst_bytes = single_burst_bytes;
        self
    }

    /// Routes reads to a nested limiter running at `rate`.
    pub fn with_read_rate_bytes_per_sec(mut self, rate: i64) -> Self {
        self.read_rate_bytes_per_sec = rate;
        self
    }

    /// Seeds the refill permutation RNG for deterministic tests.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Validates the configuration.
    ///
    /// Called automatically by every constructor; exposed so callers can
    /// check user-supplied settings up front.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] when a rate or period is not
    /// positive, the fairness knob is zero, or a byte count is negative.
    pub fn validate(&self) -> Result<(), Error> {
        if self.rate_bytes_per_sec <= 0 {
            return Err(Error::InvalidArgument("rate_bytes_per_sec must be positive"));
        }
        if self.refill_period_us <= 0 {
            return Err(Error::InvalidArgument("refill_period_us must be positive"));
        }
        if self.fairness == 0 {
            return Err(Error::InvalidArgument("fairness must be positive"));
        }
        if self.single_burst_bytes < 0 {
            return Err(Error::InvalidArgument("single_burst_bytes must be non-negative"));
        }
        if self.read_rate_bytes_per_sec < 0 {
            return Err(Error::InvalidArgument(
                "read_rate_bytes_per_sec must be non-negative",
            ));
        }
        Ok(())
    }
}
