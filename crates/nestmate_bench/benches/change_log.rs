//! Change log benchmarks.

use criterion::{
    black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput,
};
use nestmate_bench::generate_changes;
use nestmate_sync_engine::ChangeLog;
use nestmate_testkit::stress::stress_append_and_drain;
use std::sync::Arc;

/// Benchmark batch appends.
fn bench_append_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("append_batch");

    for size in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter_batched(
                || (ChangeLog::default(), generate_changes("u1", size, 50)),
                |(log, records)| {
                    black_box(log.append_batch(records).unwrap());
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

/// Benchmark draining a populated log.
fn bench_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("drain");

    for size in [100, 1000, 10_000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter_batched(
                || {
                    let log = ChangeLog::default();
                    log.append_batch(generate_changes("u1", size, 50)).unwrap();
                    log
                },
                |log| {
                    black_box(log.drain("u1"));
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

/// Benchmark snapshot encoding.
fn bench_snapshot(c: &mut Criterion) {
    let log = ChangeLog::default();
    log.append_batch(generate_changes("u1", 1000, 100)).unwrap();

    c.bench_function("snapshot_1000", |b| {
        b.iter(|| black_box(log.snapshot().unwrap()));
    });

    let bytes = log.snapshot().unwrap();
    c.bench_function("restore_1000", |b| {
        b.iter(|| black_box(ChangeLog::restore(black_box(&bytes), log.clock_skew_tolerance()).unwrap()));
    });
}

/// Benchmark concurrent appends racing drains.
fn bench_contended(c: &mut Criterion) {
    c.bench_function("append_drain_4x250", |b| {
        b.iter(|| {
            let log = Arc::new(ChangeLog::default());
            black_box(stress_append_and_drain(log, "u1", 4, 250));
        });
    });
}

criterion_group!(
    benches,
    bench_append_batch,
    bench_drain,
    bench_snapshot,
    bench_contended,
);
criterion_main!(benches);
