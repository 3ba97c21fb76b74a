//! # Rate Limiter Benchmarks
//!
//! Performance benchmarks for the hot paths of the limiter: the bypass
//! check, the fast-path bucket draw, and contended multi-client access.
//!
//! Run with: `cargo bench`

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use iorate::{
    ClientId, ClientScope, ClientTag, IoPriority, IoRateLimiterBuilder, Mode, OpType,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// A limiter fast enough that benchmark iterations rarely block: huge
/// rate, 1 ms refill period.
fn unconstrained_limiter() -> iorate::IoRateLimiter {
    IoRateLimiterBuilder::new(64 << 30)
        .refill_period_us(1_000)
        .mode(Mode::AllIo)
        .seed(42)
        .build()
}

/// Benchmark the bypass path: Total priority never touches the buckets.
fn bench_bypass(c: &mut Criterion) {
    let limiter = unconstrained_limiter();
    let _scope = ClientScope::enter(ClientTag::Client(ClientId::new(0).unwrap()));

    c.bench_function("bypass_total_priority", |b| {
        b.iter(|| {
            std::hint::black_box(limiter.request_token(
                4096,
                0,
                IoPriority::Total,
                None,
                OpType::Write,
            ))
        });
    });
}

/// Benchmark the fast path for different request sizes.
fn bench_fast_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("fast_path");

    for bytes in [512_i64, 4096, 65_536] {
        group.throughput(Throughput::Bytes(bytes as u64));
        group.bench_with_input(BenchmarkId::from_parameter(bytes), &bytes, |b, &bytes| {
            let limiter = unconstrained_limiter();
            let _scope = ClientScope::enter(ClientTag::Client(ClientId::new(0).unwrap()));

            b.iter(|| {
                std::hint::black_box(limiter.request_token(
                    bytes,
                    0,
                    IoPriority::User,
                    None,
                    OpType::Write,
                ))
            });
        });
    }

    group.finish();
}

/// Benchmark aligned requests, the direct-I/O calling convention.
fn bench_aligned_requests(c: &mut Criterion) {
    let limiter = unconstrained_limiter();
    let _scope = ClientScope::enter(ClientTag::Client(ClientId::new(0).unwrap()));

    c.bench_function("aligned_4k", |b| {
        b.iter(|| {
            std::hint::black_box(limiter.request_token(
                10_000,
                4096,
                IoPriority::High,
                None,
                OpType::Write,
            ))
        });
    });
}

/// Benchmark concurrent access from threads tagged as distinct clients.
fn bench_concurrent_clients(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent_clients");

    for num_threads in [2_usize, 4] {
        group.throughput(Throughput::Elements(num_threads as u64 * 1000));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}_clients", num_threads)),
            &num_threads,
            |b, &num_threads| {
                let limiter = Arc::new(unconstrained_limiter());

                b.iter_custom(|iters| {
                    let mut total_duration = Duration::ZERO;

                    for _ in 0..iters {
                        let start = std::time::Instant::now();

                        let handles: Vec<_> = (0..num_threads)
                            .map(|client| {
                                let limiter = Arc::clone(&limiter);
                                thread::spawn(move || {
                                    let _scope = ClientScope::enter(ClientTag::Client(
                                        ClientId::new(client).unwrap(),
                                    ));
                                    for _ in 0..1000 {
                                        limiter.request_token(
                                            512,
                                            0,
                                            IoPriority::High,
                                            None,
                                            OpType::Write,
                                        );
                                    }
                                })
                            })
                            .collect();

                        for handle in handles {
                            handle.join().unwrap();
                        }

                        total_duration += start.elapsed();
                    }

                    total_duration
                });
            },
        );
    }

    group.finish();
}

/// Benchmark the metrics snapshot, taken under the request mutex.
fn bench_metrics_snapshot(c: &mut Criterion) {
    let limiter = unconstrained_limiter();
    let _scope = ClientScope::enter(ClientTag::Client(ClientId::new(0).unwrap()));
    limiter.request_token(4096, 0, IoPriority::User, None, OpType::Write);

    c.bench_function("metrics_snapshot", |b| {
        b.iter(|| std::hint::black_box(limiter.metrics()));
    });
}

criterion_group!(
    benches,
    bench_bypass,
    bench_fast_path,
    bench_aligned_requests,
    bench_concurrent_clients,
    bench_metrics_snapshot
);
criterion_main!(benches);
