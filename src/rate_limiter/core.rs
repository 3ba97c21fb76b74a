//! # Core Multi-Tenant Limiter
//!
//! The blocking heart of the crate: per-client token buckets, a queue
//! matrix of pending requests, and the coordination protocol that decides
//! which blocked thread sleeps on the refill timer.
//!
//! ## Coordination
//!
//! Every queued request parks on its own condition variable under one
//! shared mutex. At any instant at most one queued thread, the *leader*,
//! performs a timed wait until the next refill; everyone else, the
//! *followers*, waits untimed until granted or tapped.
//!
//! ```text
//!     Queued thread duties, per loop pass:
//!
//!     refill due? ──No──► leader slot free? ──Yes──► timed wait (leader)
//!          │                     │
//!          Yes                   No
//!          ▼                     ▼
//!     refill buckets,      wait on personal
//!     grant queue heads    cv (follower)
//!          │
//!          ▼
//!     granted in full? ──Yes──► tap one queue head
//!                               so coordination
//!                               continues, exit
//! ```
//!
//! A refill resets every client bucket to one period's worth of tokens
//! (unused quota is discarded), then walks the clients in a fresh random
//! order and, within each client, the priority queues from `User` down to
//! `Low`. Queue heads are granted in full when the bucket covers them and
//! partially otherwise, so an oversized request drains across several
//! periods without losing its place.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, warn};

use super::clock::{wait_unpoisoned, MonotonicClock, SystemClock};
use super::config::{
    Error, IoPriority, IoRateLimiterConfig, Mode, OpType, DEFAULT_REFILL_PERIOD_US, MAX_FAIRNESS,
};
use super::context::{self, NUM_CLIENTS};
use super::metrics::{IoLimiterMetrics, Statistics, Ticker};
use super::utils::{truncate_to_boundary, MICROS_PER_SECOND};

/// Emit the per-client call distribution every this many requests.
const CALL_LOG_INTERVAL: u64 = 1000;

/// A pending request, shared between the blocked caller and exactly one
/// `(client, priority)` queue while unsatisfied.
struct Req {
    /// Bytes asked for at enqueue time; credited to the throughput
    /// counters once the request drains completely.
    original_bytes: i64,
    /// Bytes still owed. Only mutated under the limiter mutex; atomic
    /// solely so the record can be shared across threads.
    remaining_bytes: AtomicI64,
    /// Personal wakeup channel, always used with the limiter mutex.
    cv: Condvar,
}

impl Req {
    fn new(bytes: i64) -> Self {
        Self {
            original_bytes: bytes,
            remaining_bytes: AtomicI64::new(bytes),
            cv: Condvar::new(),
        }
    }

    #[inline]
    fn remaining(&self) -> i64 {
        self.remaining_bytes.load(Ordering::Relaxed)
    }

    #[inline]
    fn set_remaining(&self, bytes: i64) {
        self.remaining_bytes.store(bytes, Ordering::Relaxed);
    }
}

type PriorityQueues = [VecDeque<Arc<Req>>; IoPriority::COUNT];

/// Everything guarded by the single request mutex.
struct State {
    next_refill_us: i64,
    available_bytes: [i64; NUM_CLIENTS],
    queues: [PriorityQueues; NUM_CLIENTS],
    stop: bool,
    /// True while some queued thread is sleeping on the refill timer.
    wait_until_refill_pending: bool,
    /// Queued requests still to drain during shutdown.
    requests_to_wait: i64,
    total_requests: [u64; IoPriority::COUNT],
    total_bytes_through: [u64; IoPriority::COUNT],
    calls_per_client: [u64; NUM_CLIENTS],
    total_calls: u64,
    /// Drives the per-refill client permutation.
    rng: StdRng,
}

impl State {
    fn queued_requests(&self) -> usize {
        self.queues
            .iter()
            .flat_map(|queues| queues.iter())
            .map(VecDeque::len)
            .sum()
    }
}

/// Multi-tenant, priority-aware, blocking I/O rate limiter.
///
/// Byte budgets are tracked per client in [`NUM_CLIENTS`] token buckets
/// that all restart at one refill period's worth of tokens. A request that
/// cannot be covered from its client's bucket blocks the calling thread
/// until enough refills have happened; within a client, queued requests
/// are served in strict [`IoPriority`] order, and across clients each
/// refill serves the buckets in a fresh random order so no client is
/// systematically starved.
///
/// The limiter is `Sync`; share it with `Arc` and call it from any number
/// of threads. The calling thread's client is taken from the thread-local
/// context (see [`ClientScope`](crate::ClientScope)).
///
/// # Example
///
/// ```rust
/// use iorate::{IoPriority, IoRateLimiter, OpType};
///
/// // 64 MiB/s across writes, default 100 ms refill period.
/// let limiter = IoRateLimiter::new(64 << 20);
///
/// let granted = limiter.request_token(4096, 0, IoPriority::User, None, OpType::Write);
/// assert_eq!(granted, 4096);
/// ```
pub struct IoRateLimiter<C: SystemClock = MonotonicClock> {
    mode: Mode,
    refill_period_us: i64,
    /// Accepted and clamped for API compatibility; scheduling is strict
    /// priority regardless.
    fairness: u32,
    rate_bytes_per_sec: AtomicI64,
    refill_bytes_per_period: AtomicI64,
    raw_single_burst_bytes: AtomicI64,
    clock: Arc<C>,
    state: Mutex<State>,
    /// Signaled by draining waiters during shutdown.
    exit_cv: Condvar,
    read_rate_limiter: Option<Box<IoRateLimiter<C>>>,
}

impl IoRateLimiter<MonotonicClock> {
    /// Creates a limiter at `rate_bytes_per_sec` with default settings
    /// (100 ms refill period, writes only, derived burst, no read split).
    ///
    /// # Panics
    ///
    /// Panics when `rate_bytes_per_sec` is not positive.
    pub fn new(rate_bytes_per_sec: i64) -> Self {
        Self::with_config(IoRateLimiterConfig::bytes_per_second(rate_bytes_per_sec))
    }

    /// Creates a limiter from `config`, panicking on invalid settings.
    ///
    /// Use [`try_with_config`](IoRateLimiter::try_with_config) to handle
    /// validation errors instead.
    pub fn with_config(config: IoRateLimiterConfig) -> Self {
        Self::try_with_config(config).expect("invalid rate limiter configuration")
    }

    /// Creates a limiter from `config` against the real monotonic clock.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] when the configuration fails
    /// [`validate`](IoRateLimiterConfig::validate).
    pub fn try_with_config(config: IoRateLimiterConfig) -> Result<Self, Error> {
        Self::with_clock(config, Arc::new(MonotonicClock))
    }
}

impl<C: SystemClock> IoRateLimiter<C> {
    /// Creates a limiter from `config` against a caller-supplied clock.
    ///
    /// The clock is shared with the nested read limiter when
    /// `read_rate_bytes_per_sec` is positive. Tests pass a
    /// [`ManualClock`](crate::ManualClock) here to drive refill
    /// boundaries deterministically.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] when the configuration fails
    /// [`validate`](IoRateLimiterConfig::validate).
    pub fn with_clock(config: IoRateLimiterConfig, clock: Arc<C>) -> Result<Self, Error> {
        config.validate()?;

        let rate_bytes_per_sec = if config.auto_tuned {
            // Auto-tuning starts at half rate; keep it positive so the
            // refill computation stays well-defined.
            (config.rate_bytes_per_sec / 2).max(1)
        } else {
            config.rate_bytes_per_sec
        };
        let refill_bytes_per_period =
            calculate_refill_bytes_per_period(rate_bytes_per_sec, config.refill_period_us);

        let read_rate_limiter = if config.read_rate_bytes_per_sec > 0 {
            // The nested limiter keeps the historical writes-only mode; it
            // is irrelevant in practice because forwarded reads enter its
            // local path directly, below the mode check.
            let read_config =
                IoRateLimiterConfig::bytes_per_second(config.read_rate_bytes_per_sec)
                    .with_refill_period_us(DEFAULT_REFILL_PERIOD_US)
                    .with_mode(Mode::WritesOnly);
            let read_config = match config.seed {
                Some(seed) => read_config.with_seed(seed.wrapping_add(1)),
                None => read_config,
            };
            Some(Box::new(IoRateLimiter::with_clock(
                read_config,
                Arc::clone(&clock),
            )?))
        } else {
            None
        };

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let state = State {
            next_refill_us: clock.now_micros() as i64,
            available_bytes: [0; NUM_CLIENTS],
            queues: std::array::from_fn(|_| std::array::from_fn(|_| VecDeque::new())),
            stop: false,
            wait_until_refill_pending: false,
            requests_to_wait: 0,
            total_requests: [0; IoPriority::COUNT],
            total_bytes_through: [0; IoPriority::COUNT],
            calls_per_client: [0; NUM_CLIENTS],
            total_calls: 0,
            rng,
        };

        Ok(Self {
            mode: config.mode,
            refill_period_us: config.refill_period_us,
            fairness: config.fairness.min(MAX_FAIRNESS),
            rate_bytes_per_sec: AtomicI64::new(rate_bytes_per_sec),
            refill_bytes_per_period: AtomicI64::new(refill_bytes_per_period),
            raw_single_burst_bytes: AtomicI64::new(config.single_burst_bytes),
            clock,
            state: Mutex::new(state),
            exit_cv: Condvar::new(),
            read_rate_limiter,
        })
    }

    /// Requests permission to transfer up to `bytes` bytes and returns the
    /// number actually budgeted, blocking until that budget is granted.
    ///
    /// This is the entry point used by the storage layer. Requests at
    /// [`IoPriority::Total`] or whose `op_type` falls outside the
    /// configured [`Mode`] bypass the limiter and return `bytes`
    /// unchanged. Otherwise `bytes` is clamped to
    /// [`single_burst_bytes`](IoRateLimiter::single_burst_bytes) and, when
    /// `alignment` is positive, rounded down to an alignment boundary but
    /// never below one alignment unit, since direct I/O cannot transfer
    /// less than one unit per call.
    ///
    /// # Example
    ///
    /// ```rust
    /// use iorate::{IoPriority, IoRateLimiter, OpType};
    ///
    /// let limiter = IoRateLimiter::new(64 << 20);
    ///
    /// // Writes are limited (and aligned)...
    /// let granted = limiter.request_token(10_000, 4096, IoPriority::High, None, OpType::Write);
    /// assert_eq!(granted, 8192);
    ///
    /// // ...reads pass through untouched under the default writes-only mode.
    /// let granted = limiter.request_token(10_000, 4096, IoPriority::High, None, OpType::Read);
    /// assert_eq!(granted, 10_000);
    /// ```
    pub fn request_token(
        &self,
        bytes: i64,
        alignment: i64,
        pri: IoPriority,
        stats: Option<&dyn Statistics>,
        op_type: OpType,
    ) -> i64 {
        // Bypassed requests return `bytes` untouched, whatever it is.
        let mut bytes = bytes;
        if pri.is_scheduled() && self.is_rate_limited(op_type) {
            bytes = bytes.max(0).min(self.single_burst_bytes());
            if alignment > 0 {
                bytes = truncate_to_boundary(alignment, bytes).max(alignment);
            }
            self.request(bytes, pri, stats, op_type);
        }
        bytes
    }

    /// The blocking request primitive.
    ///
    /// Reads are forwarded to the nested read limiter when one was
    /// configured, so reads and writes draw from disjoint buckets; in
    /// every other case the local path runs: draw what the client's bucket
    /// covers, then block in the coordination loop for the rest.
    ///
    /// Callers are expected to keep `bytes` within
    /// [`single_burst_bytes`](IoRateLimiter::single_burst_bytes) (checked
    /// by debug assertion); [`request_token`](IoRateLimiter::request_token)
    /// does this clamping for you.
    pub fn request(
        &self,
        bytes: i64,
        pri: IoPriority,
        stats: Option<&dyn Statistics>,
        op_type: OpType,
    ) {
        match (&self.read_rate_limiter, op_type) {
            (Some(read_limiter), OpType::Read) => read_limiter.request_local(bytes, pri, stats),
            _ => self.request_local(bytes, pri, stats),
        }
    }

    fn request_local(&self, bytes: i64, pri: IoPriority, stats: Option<&dyn Statistics>) {
        debug_assert!(pri.is_scheduled(), "Total is not a schedulable priority");
        debug_assert!(bytes <= self.single_burst_bytes());

        let client = match context::thread_client().resolve() {
            Some(client) => client,
            None => {
                debug!("dropping request from thread with invalid client context");
                return;
            }
        };
        let cid = client.get();
        let pri_idx = pri.index();
        let mut bytes = bytes.max(0);

        let mut state = self.lock_state();
        if state.stop {
            // Tear-down has begun; new arrivals leave without touching
            // quota or queues.
            return;
        }

        state.calls_per_client[cid] += 1;
        state.total_calls += 1;
        if state.total_calls % CALL_LOG_INTERVAL == 0 {
            debug!(
                calls_per_client = ?state.calls_per_client,
                "rate limiter per-client call distribution"
            );
        }
        state.total_requests[pri_idx] += 1;

        // Fast path: draw whatever the client's bucket still holds.
        if state.available_bytes[cid] > 0 {
            let through = state.available_bytes[cid].min(bytes);
            state.total_bytes_through[pri_idx] += through as u64;
            state.available_bytes[cid] -= through;
            bytes -= through;
        }
        if bytes == 0 {
            return;
        }

        let req = Arc::new(Req::new(bytes));
        state.queues[cid][pri_idx].push_back(Arc::clone(&req));

        // A queued thread coordinates two duties with its peers until it
        // is granted: (1) sleeping on the refill timer, done by exactly
        // one leader at a time while everyone else parks on a personal
        // cv, and (2) performing the refill once the timer has expired.
        // Spurious wakeups are harmless, every pass re-reads the clock
        // and the remaining byte count.
        loop {
            let time_until_refill_us = state.next_refill_us - self.clock.now_micros() as i64;
            if time_until_refill_us > 0 {
                if state.wait_until_refill_pending {
                    state = wait_unpoisoned(&req.cv, state);
                } else {
                    if let Some(stats) = stats {
                        stats.record_tick(Ticker::NumberRateLimiterDrains, 1);
                    }
                    state.wait_until_refill_pending = true;
                    state = self.clock.timed_wait(
                        &req.cv,
                        state,
                        Duration::from_micros(time_until_refill_us as u64),
                    );
                    state.wait_until_refill_pending = false;
                }
            } else {
                self.refill_and_grant(&mut state);
            }

            if req.remaining() == 0 {
                // Fully granted. Tap one queue head so somebody is awake
                // to take over the timer and refill duties: clients in
                // index order, priorities high to low, first head wins.
                'scan: for client_queues in state.queues.iter() {
                    for queue in client_queues.iter().rev() {
                        if let Some(front) = queue.front() {
                            front.cv.notify_one();
                            break 'scan;
                        }
                    }
                }
            }

            if state.stop || req.remaining() == 0 {
                break;
            }
        }

        if state.stop && req.remaining() > 0 {
            // Still queued when tear-down started; report our exit so the
            // drain in `stop` can complete.
            state.requests_to_wait -= 1;
            self.exit_cv.notify_one();
        }
    }

    /// Resets every bucket to one period's worth of tokens and grants
    /// queue heads. Runs under the mutex, invoked by whichever queued
    /// thread finds the refill timer expired.
    fn refill_and_grant(&self, state: &mut State) {
        state.next_refill_us = self.clock.now_micros() as i64 + self.refill_period_us;
        let refill_bytes = self.refill_bytes_per_period.load(Ordering::Relaxed);

        let State {
            available_bytes,
            queues,
            total_bytes_through,
            rng,
            ..
        } = state;

        // Unused quota from the previous period is discarded; every
        // bucket restarts at exactly one period's worth.
        for bucket in available_bytes.iter_mut() {
            *bucket = refill_bytes;
        }

        // Fresh permutation every refill so no client is systematically
        // first or last at the trough.
        let mut client_order: [usize; NUM_CLIENTS] = std::array::from_fn(|i| i);
        client_order.shuffle(rng);

        'clients: for &client in client_order.iter() {
            for pri_idx in (0..IoPriority::COUNT).rev() {
                let queue = &mut queues[client][pri_idx];
                while let Some(head) = queue.front().cloned() {
                    let remaining = head.remaining();
                    if available_bytes[client] < remaining {
                        // Partial grant: the head absorbs the leftovers
                        // and keeps its place; the next refill resumes at
                        // the same request.
                        head.set_remaining(remaining - available_bytes[client]);
                        available_bytes[client] = 0;
                        continue 'clients;
                    }
                    available_bytes[client] -= remaining;
                    head.set_remaining(0);
                    total_bytes_through[pri_idx] += head.original_bytes as u64;
                    queue.pop_front();
                    head.cv.notify_one();
                }
            }
        }
    }

    /// Stops admitting requests and drains every queued waiter.
    ///
    /// Queued requests are woken and return without a guarantee of
    /// satisfaction; the call blocks until the last of them has left.
    /// Idempotent, and invoked automatically on drop. A nested read
    /// limiter is drained first.
    pub fn stop(&self) {
        if let Some(read_limiter) = &self.read_rate_limiter {
            read_limiter.stop();
        }

        let mut state = self.lock_state();
        if state.stop {
            return;
        }
        state.stop = true;
        state.requests_to_wait = state.queued_requests() as i64;
        if state.requests_to_wait > 0 {
            debug!(
                queued = state.requests_to_wait,
                "rate limiter draining queued requests"
            );
        }

        for client_queues in state.queues.iter() {
            for queue in client_queues.iter().rev() {
                for req in queue.iter() {
                    req.cv.notify_one();
                }
            }
        }

        while state.requests_to_wait > 0 {
            state = wait_unpoisoned(&self.exit_cv, state);
        }

        for client_queues in state.queues.iter_mut() {
            for queue in client_queues.iter_mut() {
                queue.clear();
            }
        }
    }

    /// Dynamically changes the target throughput.
    ///
    /// Both the stored rate and the derived per-period refill are updated
    /// together under the mutex; buckets pick the new value up at the next
    /// refill. Non-positive rates are rejected with a warning and leave
    /// the limiter unchanged.
    pub fn set_bytes_per_second(&self, bytes_per_second: i64) {
        debug_assert!(bytes_per_second > 0);
        if bytes_per_second <= 0 {
            warn!(bytes_per_second, "ignoring non-positive rate");
            return;
        }
        let _state = self.lock_state();
        self.rate_bytes_per_sec
            .store(bytes_per_second, Ordering::Relaxed);
        self.refill_bytes_per_period.store(
            calculate_refill_bytes_per_period(bytes_per_second, self.refill_period_us),
            Ordering::Relaxed,
        );
    }

    /// Sets an explicit cap on the bytes a single request may draw;
    /// zero restores the derived default of one refill period's worth.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for negative input, in which
    /// case nothing changes.
    pub fn set_single_burst_bytes(&self, single_burst_bytes: i64) -> Result<(), Error> {
        if single_burst_bytes < 0 {
            return Err(Error::InvalidArgument(
                "single_burst_bytes must be non-negative",
            ));
        }
        let _state = self.lock_state();
        self.raw_single_burst_bytes
            .store(single_burst_bytes, Ordering::Relaxed);
        Ok(())
    }

    /// Largest byte count a single request may ask for: the explicit cap
    /// when one is set, otherwise one refill period's worth of tokens.
    #[inline]
    pub fn single_burst_bytes(&self) -> i64 {
        let raw = self.raw_single_burst_bytes.load(Ordering::Relaxed);
        if raw > 0 {
            raw
        } else {
            self.refill_bytes_per_period.load(Ordering::Relaxed)
        }
    }

    /// Current target throughput in bytes per second.
    #[inline]
    pub fn bytes_per_second(&self) -> i64 {
        self.rate_bytes_per_sec.load(Ordering::Relaxed)
    }

    /// Returns `true` when `op_type` is throttled by this limiter's mode.
    #[inline]
    pub fn is_rate_limited(&self, op_type: OpType) -> bool {
        self.mode.is_rate_limited(op_type)
    }

    /// The configured operation-type mode.
    #[inline]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// The refill interval in microseconds, fixed at construction.
    #[inline]
    pub fn refill_period_us(&self) -> i64 {
        self.refill_period_us
    }

    /// The (clamped) fairness knob, kept for API compatibility.
    #[inline]
    pub fn fairness(&self) -> u32 {
        self.fairness
    }

    /// The nested limiter serving reads, when a read split is configured.
    #[inline]
    pub fn read_limiter(&self) -> Option<&IoRateLimiter<C>> {
        self.read_rate_limiter.as_deref()
    }

    /// Bytes fully granted at `pri` since construction;
    /// [`IoPriority::Total`] sums all classes.
    pub fn total_bytes_through(&self, pri: IoPriority) -> u64 {
        let state = self.lock_state();
        match pri {
            IoPriority::Total => state.total_bytes_through.iter().sum(),
            scheduled => state.total_bytes_through[scheduled.index()],
        }
    }

    /// Requests admitted at `pri` since construction;
    /// [`IoPriority::Total`] sums all classes.
    pub fn total_requests(&self, pri: IoPriority) -> u64 {
        let state = self.lock_state();
        match pri {
            IoPriority::Total => state.total_requests.iter().sum(),
            scheduled => state.total_requests[scheduled.index()],
        }
    }

    /// Takes a consistent snapshot of counters, bucket levels and queue
    /// depth. Covers the local (write) side only; reach the read side via
    /// [`read_limiter`](IoRateLimiter::read_limiter).
    pub fn metrics(&self) -> IoLimiterMetrics {
        let state = self.lock_state();
        IoLimiterMetrics {
            total_requests: state.total_requests,
            total_bytes_through: state.total_bytes_through,
            calls_per_client: state.calls_per_client,
            total_calls: state.total_calls,
            available_bytes: state.available_bytes,
            queued_requests: state.queued_requests(),
            rate_bytes_per_sec: self.rate_bytes_per_sec.load(Ordering::Relaxed),
            refill_bytes_per_period: self.refill_bytes_per_period.load(Ordering::Relaxed),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C: SystemClock> Drop for IoRateLimiter<C> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<C: SystemClock> fmt::Debug for IoRateLimiter<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoRateLimiter")
            .field("mode", &self.mode)
            .field("rate_bytes_per_sec", &self.bytes_per_second())
            .field("refill_period_us", &self.refill_period_us)
            .field("single_burst_bytes", &self.single_burst_bytes())
            .field("read_split", &self.read_rate_limiter.is_some())
            .finish()
    }
}

/// Tokens per refill period at `rate_bytes_per_sec`, saturating instead of
/// overflowing when the product `rate * period` exceeds `i64::MAX`.
fn calculate_refill_bytes_per_period(rate_bytes_per_sec: i64, refill_period_us: i64) -> i64 {
    if i64::MAX / rate_bytes_per_sec < refill_period_us {
        i64::MAX / MICROS_PER_SECOND
    } else {
        rate_bytes_per_sec * refill_period_us / MICROS_PER_SECOND
    }
}
