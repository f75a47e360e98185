//! Benchmarks for stopwatch replay and the replicated event log.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use lapsync_core::clock::{ClockOffset, ManualClock};
use lapsync_core::events::{Aggregate, Event, WatchModel, WatchValue};
use lapsync_core::transport::Multiplexer;

/// Alternating RUN/PAUSE, one second apart.
fn session(n: usize) -> Vec<Event> {
    (0..n)
        .map(|i| {
            let t = i as f64;
            if i % 2 == 0 { Event::run(t) } else { Event::pause(t) }
        })
        .collect()
}

fn bench_reducer(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay_reducer");
    for size in [10, 100, 1_000, 10_000] {
        let events = session(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &events, |b, events| {
            b.iter(|| black_box(WatchValue::default().replay(events.iter())));
        });
    }
    group.finish();
}

fn bench_add_event(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("replay_add_event");
    for size in [10, 100, 1_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &n| {
            b.iter_batched(
                || {
                    let _guard = rt.enter();
                    let clock = ClockOffset::new("bench", ManualClock::new(0.0));
                    let channel = Multiplexer::new().channel("watch0");
                    let watch = WatchModel::new(channel, clock).unwrap();
                    for event in session(n) {
                        watch.add_event(event).unwrap();
                    }
                    watch
                },
                |watch| black_box(watch.add_event(Event::run(n as f64 + 0.5)).unwrap()),
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_compacted_replay(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let _guard = rt.enter();
    let clock = ClockOffset::new("bench", ManualClock::new(0.0));
    let watch = WatchModel::new(Multiplexer::new().channel("watch0"), clock).unwrap();
    for event in session(10_000) {
        watch.add_event(event).unwrap();
    }

    let mut group = c.benchmark_group("replay_refresh");
    group.bench_function("full_log", |b| b.iter(|| black_box(watch.refresh())));
    watch.compact();
    group.bench_function("after_compact", |b| b.iter(|| black_box(watch.refresh())));
    group.finish();
}

criterion_group!(benches, bench_reducer, bench_add_event, bench_compacted_replay);
criterion_main!(benches);
