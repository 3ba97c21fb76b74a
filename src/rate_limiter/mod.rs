//! # Rate Limiter Module
//!
//! Internal implementation of the multi-tenant I/O limiter, organized into
//! submodules with one responsibility each.
//!
//! ## Module Structure
//!
//! ```text
//!     rate_limiter/
//!     ├── mod.rs          (You are here - Module organization)
//!     ├── config.rs       (Priorities, modes, configuration, validation)
//!     ├── core.rs         (Buckets, queues, the coordination loop)
//!     ├── clock.rs        (Monotonic time source and timed waits)
//!     ├── context.rs      (Per-thread client identity)
//!     ├── metrics.rs      (Counters, snapshots, statistics sink)
//!     └── utils.rs        (Time anchor, alignment helpers)
//! ```
//!
//! ## Request Flow
//!
//! ```text
//!     Storage layer
//!          │  request_token(bytes, alignment, pri, stats, op)
//!          ▼
//!     ┌─────────┐   bypass on Total priority / mode mismatch
//!     │  Core   │ ◄── client id from Context, time from Clock
//!     └────┬────┘
//!          │  fast path: draw from the client's bucket
//!          │  slow path: queue + coordination loop until refilled
//!          ▼
//!     ┌─────────┐
//!     │ Metrics │ ◄── per-priority counters, drain ticks
//!     └─────────┘
//! ```

mod clock;
mod config;
mod context;
mod core;
mod metrics;
mod utils;

/// Clock abstraction: the production monotonic clock and the test clock.
pub use clock::{ManualClock, MonotonicClock, SystemClock};

/// Priorities, operation types, modes, configuration and errors.
pub use config::{
    Error, IoPriority, IoRateLimiterConfig, Mode, OpType, DEFAULT_FAIRNESS,
    DEFAULT_REFILL_PERIOD_US, MAX_FAIRNESS,
};

/// Per-thread client identity.
pub use context::{
    set_thread_client, thread_client, ClientId, ClientScope, ClientTag, NUM_CLIENTS,
};

/// The multi-tenant blocking limiter itself.
pub use self::core::IoRateLimiter;

/// Observability: snapshots and the pluggable statistics sink.
pub use metrics::{CountingStatistics, IoLimiterMetrics, Statistics, Ticker};

/// Time and alignment helpers.
pub use utils::{monotonic_micros, truncate_to_boundary};
