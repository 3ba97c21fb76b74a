//! # iorate - Multi-Tenant I/O Rate Limiter for Rust
//!
//! A blocking, byte-denominated rate limiter that caps the aggregate I/O
//! bandwidth of a storage engine while keeping its tenants out of each
//! other's way. Callers ask for permission to transfer N bytes; the
//! limiter either grants immediately from the caller's token bucket or
//! blocks the calling thread until periodic refills have covered the
//! request.
//!
//! ## What Makes It Multi-Tenant?
//!
//! Every request is billed to one of a fixed set of logical clients, each
//! with its own bucket and its own priority queues:
//!
//! ```text
//!     One refill period (default 100 ms):
//!
//!     Client 0: [🪙🪙🪙🪙]   queues: User > High > Mid > Low
//!     Client 1: [🪙🪙🪙🪙]   queues: User > High > Mid > Low
//!     ...                     ...
//!     Client 4: [🪙🪙🪙🪙]   queues: User > High > Mid > Low
//!
//!     Refill: every bucket restarts at one period's worth of tokens;
//!     clients are served in a fresh random order, and within a client
//!     strictly by priority.
//! ```
//!
//! - **Isolation** - a greedy client exhausts only its own bucket
//! - **Priority** - `User` traffic never waits behind background work of
//!   the same client
//! - **No systematic starvation** - the per-refill client permutation
//!   gives every client the same expected position at the trough
//!
//! ## Quick Start
//!
//! ```rust
//! use iorate::{IoPriority, IoRateLimiter, OpType};
//!
//! // Cap writes at 64 MiB/s, refilled every 100 ms.
//! let limiter = IoRateLimiter::new(64 << 20);
//!
//! // In an I/O path: ask before writing. Blocks until budgeted.
//! let budget = limiter.request_token(
//!     4096,               // bytes we want to write
//!     0,                  // no alignment requirement
//!     IoPriority::User,   // foreground traffic
//!     None,               // no statistics sink
//!     OpType::Write,
//! );
//! assert_eq!(budget, 4096);
//! ```
//!
//! ## Tagging Threads With Their Client
//!
//! ```rust
//! use iorate::{ClientId, ClientScope, ClientTag, IoPriority, IoRateLimiter, OpType};
//!
//! let limiter = IoRateLimiter::new(64 << 20);
//!
//! let client = ClientId::new(2).expect("within NUM_CLIENTS");
//! let _scope = ClientScope::enter(ClientTag::Client(client));
//! // Requests issued from this thread now draw from client 2's bucket.
//! limiter.request_token(4096, 0, IoPriority::High, None, OpType::Write);
//! ```
//!
//! Threads that never set a tag are billed to the maintenance client;
//! threads marked [`ClientTag::Invalid`] have their requests silently
//! dropped.
//!
//! ## Splitting Reads From Writes
//!
//! ```rust
//! use iorate::{IoRateLimiterBuilder, Mode};
//!
//! // Writes at 8 MiB/s, reads at 4 MiB/s from a disjoint bucket set.
//! let limiter = IoRateLimiterBuilder::new(8 << 20)
//!     .mode(Mode::AllIo)
//!     .read_rate_bytes_per_sec(4 << 20)
//!     .build();
//!
//! assert!(limiter.read_limiter().is_some());
//! ```
//!
//! ## Architecture Overview
//!
//! ```text
//!                    ┌─────────────────────────┐
//!                    │     Storage Engine      │
//!                    └──────────┬──────────────┘
//!                               │
//!                    ┌──────────▼──────────────┐
//!                    │   Rate Limiter API      │
//!                    ├──────────────────────────┤
//!                    │  • request_token()       │
//!                    │  • set_bytes_per_second()│
//!                    │  • metrics()             │
//!                    └──────────┬───────────────┘
//!                               │
//!                ┌──────────────┴───────────────┐
//!                │                              │
//!     ┌──────────▼──────────┐       ┌───────────▼──────────┐
//!     │  Per-Client Buckets │       │  Coordination Loop   │
//!     ├─────────────────────┤       ├──────────────────────┤
//!     │ • token accounting  │       │ • one refill leader  │
//!     │ • priority queues   │       │ • personal condvars  │
//!     │ • random serve order│       │ • timed refill waits │
//!     └─────────────────────┘       └──────────────────────┘
//! ```
//!
//! ## Blocking Model
//!
//! This crate deliberately uses OS threads, one mutex and per-request
//! condition variables rather than an async runtime: the consumers are
//! storage-engine worker threads that must not proceed until their byte
//! budget exists. Only the request whose budget just materialized is
//! woken, so grants stay O(granted requests) instead of waking every
//! waiter per refill.
//!
//! ## Thread Safety
//!
//! [`IoRateLimiter`] is `Send + Sync`; share it via
//! [`SharedIoRateLimiter`] and call it from any number of threads.
//! Shutdown is collective: [`stop`](IoRateLimiter::stop) (also run on
//! drop) wakes every queued request and blocks until all of them have
//! returned.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    missing_debug_implementations
)]
#![forbid(unsafe_code)]

// Internal module
mod rate_limiter;

// Public re-exports
pub use rate_limiter::{
    monotonic_micros, set_thread_client, thread_client, truncate_to_boundary, ClientId,
    ClientScope, ClientTag, CountingStatistics, Error, IoLimiterMetrics, IoPriority,
    IoRateLimiter, IoRateLimiterConfig, ManualClock, Mode, MonotonicClock, OpType, Statistics,
    SystemClock, Ticker, DEFAULT_FAIRNESS, DEFAULT_REFILL_PERIOD_US, MAX_FAIRNESS, NUM_CLIENTS,
};

/// A rate limiter wrapped in `Arc` for convenient thread-safe sharing.
///
/// # Example
/// ```rust
/// use iorate::{IoPriority, IoRateLimiter, OpType, SharedIoRateLimiter};
/// use std::sync::Arc;
///
/// let shared: SharedIoRateLimiter = Arc::new(IoRateLimiter::new(64 << 20));
///
/// let limiter = shared.clone();
/// std::thread::spawn(move || {
///     limiter.request_token(4096, 0, IoPriority::User, None, OpType::Write);
/// })
/// .join()
/// .unwrap();
/// ```
pub type SharedIoRateLimiter = std::sync::Arc<IoRateLimiter>;

/// Version information for the crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Minimum supported Rust version.
///
/// This crate requires at least Rust 1.70.0 due to:
/// - `OnceLock` in the monotonic time anchor
/// - Edition 2021 features
pub const MSRV: &str = "1.70.0";

/// Prelude module for convenient imports.
///
/// Import everything you need with a single line:
/// ```rust
/// use iorate::prelude::*;
///
/// let limiter = IoRateLimiter::new(64 << 20);
/// let _ = limiter.request_token(4096, 0, IoPriority::User, None, OpType::Write);
/// ```
pub mod prelude {
    //! Common imports for typical rate limiting use cases.

    pub use crate::{
        ClientId, ClientScope, ClientTag, IoLimiterMetrics, IoPriority, IoRateLimiter,
        IoRateLimiterBuilder, IoRateLimiterConfig, Mode, OpType, SharedIoRateLimiter, Statistics,
        Ticker, NUM_CLIENTS,
    };
}

/// Builder pattern for creating rate limiters with custom configuration.
///
/// A fluent front over [`IoRateLimiterConfig`] with validation at build
/// time. This is the recommended way to construct limiters with
/// non-default settings.
///
/// # Example
///
/// ```rust
/// use iorate::{IoRateLimiterBuilder, Mode};
///
/// let limiter = IoRateLimiterBuilder::new(16 << 20) // 16 MiB/s
///     .refill_period_us(50_000)                     // refill every 50 ms
///     .mode(Mode::AllIo)                            // throttle both directions
///     .single_burst_bytes(1 << 20)                  // cap draws at 1 MiB
///     .build();
///
/// assert_eq!(limiter.single_burst_bytes(), 1 << 20);
///
/// // Or use try_build() for error handling
/// let result = IoRateLimiterBuilder::new(0).try_build(); // invalid rate!
/// assert!(result.is_err());
/// ```
#[derive(Debug, Clone)]
pub struct IoRateLimiterBuilder {
    config: IoRateLimiterConfig,
}

impl IoRateLimiterBuilder {
    /// Creates a builder for a limiter at `rate_bytes_per_sec`, all other
    /// settings at their defaults (100 ms refill period, writes only,
    /// derived burst, no read split).
    pub fn new(rate_bytes_per_sec: i64) -> Self {
        Self {
            config: IoRateLimiterConfig::bytes_per_second(rate_bytes_per_sec),
        }
    }

    /// Sets the refill interval in microseconds.
    pub fn refill_period_us(mut self, refill_period_us: i64) -> Self {
        self.config.refill_period_us = refill_period_us;
        self
    }

    /// Sets the fairness knob (accepted for compatibility, unused for
    /// scheduling).
    pub fn fairness(mut self, fairness: u32) -> Self {
        self.config.fairness = fairness;
        self
    }

    /// Sets which operation types are throttled.
    pub fn mode(mut self, mode: Mode) -> Self {
        self.config.mode = mode;
        self
    }

    /// Starts the limiter at half the configured rate for external
    /// auto-tuning.
    pub fn auto_tuned(mut self, auto_tuned: bool) -> Self {
        self.config.auto_tuned = auto_tuned;
        self
    }

    /// Caps the bytes a single request may draw; zero derives the cap
    /// from one refill period's worth of tokens.
    pub fn single_burst_bytes(mut self, single_burst_bytes: i64) -> Self {
        self.config.single_burst_bytes = single_burst_bytes;
        self
    }

    /// Routes reads to a dedicated nested limiter at `rate`.
    pub fn read_rate_bytes_per_sec(mut self, rate: i64) -> Self {
        self.config.read_rate_bytes_per_sec = rate;
        self
    }

    /// Seeds the refill permutation RNG for deterministic tests.
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    /// Builds the rate limiter with the configured settings.
    ///
    /// # Panics
    ///
    /// Panics when the configuration is invalid (see
    /// [`IoRateLimiterConfig::validate`]). Use
    /// [`try_build`](IoRateLimiterBuilder::try_build) to handle errors.
    pub fn build(self) -> IoRateLimiter {
        IoRateLimiter::with_config(self.config)
    }

    /// Attempts to build the rate limiter, returning an error if invalid.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] naming the offending field.
    pub fn try_build(self) -> Result<IoRateLimiter, Error> {
        IoRateLimiter::try_with_config(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_functionality() {
        let limiter = IoRateLimiter::new(64 << 20);

        let granted = limiter.request_token(8192, 0, IoPriority::User, None, OpType::Write);
        assert_eq!(granted, 8192);
        assert_eq!(limiter.total_bytes_through(IoPriority::User), 8192);
    }

    #[test]
    fn test_builder() {
        let limiter = IoRateLimiterBuilder::new(16 << 20)
            .refill_period_us(50_000)
            .mode(Mode::AllIo)
            .single_burst_bytes(1 << 20)
            .seed(9)
            .build();

        assert_eq!(limiter.bytes_per_second(), 16 << 20);
        assert_eq!(limiter.refill_period_us(), 50_000);
        assert_eq!(limiter.mode(), Mode::AllIo);
        assert_eq!(limiter.single_burst_bytes(), 1 << 20);
    }

    #[test]
    fn test_builder_validation() {
        assert!(IoRateLimiterBuilder::new(0).try_build().is_err());
        assert!(IoRateLimiterBuilder::new(1024)
            .refill_period_us(0)
            .try_build()
            .is_err());
        assert!(IoRateLimiterBuilder::new(1024).try_build().is_ok());
    }

    #[test]
    fn test_builder_read_split_and_auto_tune() {
        let limiter = IoRateLimiterBuilder::new(8 << 20)
            .mode(Mode::AllIo)
            .auto_tuned(true)
            .read_rate_bytes_per_sec(4 << 20)
            .build();

        // Auto-tune halves the write rate; the read side keeps its own.
        assert_eq!(limiter.bytes_per_second(), 4 << 20);
        let read_limiter = limiter.read_limiter().expect("read split configured");
        assert_eq!(read_limiter.bytes_per_second(), 4 << 20);
    }

    #[test]
    fn test_shared_type() {
        let shared: SharedIoRateLimiter = std::sync::Arc::new(IoRateLimiter::new(64 << 20));
        let clone = shared.clone();
        std::thread::spawn(move || {
            clone.request_token(4096, 0, IoPriority::User, None, OpType::Write);
        })
        .join()
        .unwrap();
        assert_eq!(shared.total_bytes_through(IoPriority::Total), 4096);
    }

    #[test]
    fn test_prelude_imports() {
        use crate::prelude::*;

        let _limiter = IoRateLimiter::new(64 << 20);
        let _config = IoRateLimiterConfig::default();
        let _mode = Mode::AllIo;
        let _pri = IoPriority::User;
        assert_eq!(NUM_CLIENTS, 5);
    }

    #[test]
    fn test_constants() {
        assert!(!VERSION.is_empty());
        assert_eq!(MSRV, "1.70.0");
    }
}
