//! Sync session benchmarks.

use criterion::{
    black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput,
};
use nestmate_bench::{generate_changes, generate_snapshots, random_payload};
use nestmate_sync_protocol::{payload_digest, ConflictPolicy};
use nestmate_testkit::fixtures::{expense_snapshot, TestSync};

/// Benchmark a first session pulling remote snapshots.
fn bench_initial_pull(c: &mut Criterion) {
    let mut group = c.benchmark_group("initial_pull");

    for count in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            b.iter_batched(
                || {
                    let sync = TestSync::new();
                    for snapshot in generate_snapshots(count) {
                        sync.seed_remote("u1", snapshot);
                    }
                    sync
                },
                |sync| {
                    black_box(sync.run("u1").unwrap());
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

/// Benchmark pushing queued changes.
fn bench_push(c: &mut Criterion) {
    let mut group = c.benchmark_group("push");

    for count in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            b.iter_batched(
                || {
                    let sync = TestSync::new();
                    sync.queue(generate_changes("u1", count, count / 2));
                    sync
                },
                |sync| {
                    black_box(sync.run("u1").unwrap());
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

/// Benchmark sessions where every entity conflicts.
fn bench_conflicts(c: &mut Criterion) {
    let mut group = c.benchmark_group("conflicts");

    for policy in [ConflictPolicy::LastWriterWins, ConflictPolicy::FieldMerge] {
        group.bench_function(policy.as_str(), |b| {
            b.iter_batched(
                || {
                    let sync = TestSync::with_policy(policy);
                    for i in 0..100 {
                        sync.seed_remote("u1", expense_snapshot(&format!("e{i}"), 10, 1, 1));
                    }
                    sync.run("u1").unwrap();
                    for i in 0..100 {
                        sync.seed_remote("u1", expense_snapshot(&format!("e{i}"), 30, 2, 2));
                    }
                    sync.queue(generate_changes("u1", 100, 100));
                    sync
                },
                |sync| {
                    black_box(sync.run("u1").unwrap());
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

/// Benchmark payload digests used for change detection.
fn bench_digest(c: &mut Criterion) {
    let mut group = c.benchmark_group("payload_digest");

    for fields in [4, 32, 256].iter() {
        let payload = random_payload(*fields);
        group.bench_with_input(BenchmarkId::from_parameter(fields), &payload, |b, payload| {
            b.iter(|| black_box(payload_digest(black_box(payload)).unwrap()));
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_initial_pull,
    bench_push,
    bench_conflicts,
    bench_digest,
);
criterion_main!(benches);
