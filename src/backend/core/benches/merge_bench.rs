//! Benchmarks for the sorted-sequence merge algebra.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use lapsync_core::merge::{intersection, normalize_by, remove_adjacent_duplicates, union};

/// Two interleaved ascending sequences sharing every third element.
fn interleaved(n: usize) -> (Vec<u64>, Vec<u64>) {
    let a = (0..n as u64).map(|i| i * 2).collect();
    let b = (0..n as u64).map(|i| i * 3).collect();
    (a, b)
}

fn bench_union(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_union");
    for size in [10, 100, 1_000, 10_000] {
        let (a, b) = interleaved(size);
        group.throughput(Throughput::Elements((a.len() + b.len()) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |bench, _| {
            bench.iter(|| black_box(union(black_box(&a), black_box(&b)).unwrap()));
        });
    }
    group.finish();
}

fn bench_intersection(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_intersection");
    for size in [100, 10_000] {
        let (a, b) = interleaved(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |bench, _| {
            bench.iter(|| black_box(intersection(&a, &b).unwrap()));
        });
    }
    group.finish();
}

fn bench_dedup(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_dedup");
    for size in [100, 10_000] {
        let v: Vec<u64> = (0..size as u64).map(|i| i / 3).collect();
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &v, |bench, v| {
            bench.iter(|| black_box(remove_adjacent_duplicates(v).unwrap()));
        });
    }
    group.finish();
}

fn bench_normalize_remote(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_normalize_remote");
    for size in [100, 10_000] {
        let v: Vec<u64> = (0..size as u64).rev().map(|i| i % 997).collect();
        group.bench_with_input(BenchmarkId::from_parameter(size), &v, |bench, v| {
            bench.iter_batched(
                || v.clone(),
                |v| black_box(normalize_by(v, u64::cmp)),
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_union, bench_intersection, bench_dedup, bench_normalize_remote);
criterion_main!(benches);
