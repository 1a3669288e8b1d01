//! Order book store benchmarks: writer apply cost and reader latency.
//!
//! Run with: cargo bench -p mdcache-bench --bench store

use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use mdcache_bench::fixtures::FeedScenario;
use mdcache_bench::throughput::run_ingest;
use mdcache_book::{OrderBookStore, StoreConfig};
use mdcache_core::EventDecoder;
use std::hint::black_box;

fn seeded_store(scenario: &mut FeedScenario) -> OrderBookStore {
    let mut store = OrderBookStore::new(StoreConfig::default());
    store.apply_all(scenario.snapshots());
    store
}

fn benchmark_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_apply");

    for depth in [5usize, 20, 100] {
        let mut scenario = FeedScenario::new(4, depth, 5);
        let mut store = seeded_store(&mut scenario);

        group.throughput(Throughput::Elements(1024));
        group.bench_with_input(BenchmarkId::new("deltas", depth), &depth, |b, _| {
            b.iter_batched(
                || scenario.deltas(1024),
                |batch| black_box(store.apply_all(batch)),
                BatchSize::SmallInput,
            )
        });
    }

    let mut scenario = FeedScenario::new(1, 20, 9);
    let mut store = seeded_store(&mut scenario);
    group.throughput(Throughput::Elements(1));
    group.bench_function("snapshot_20_levels", |b| {
        b.iter_batched(
            || scenario.snapshots(),
            |batch| black_box(store.apply_all(batch)),
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

fn benchmark_read(c: &mut Criterion) {
    let mut scenario = FeedScenario::new(16, 20, 13);
    let mut store = seeded_store(&mut scenario);
    store.apply_all(scenario.deltas(4096));
    let reader = store.reader();
    let id = scenario.instruments()[0].clone();

    let mut group = c.benchmark_group("store_read");
    group.throughput(Throughput::Elements(1));

    group.bench_function("best_bid_ask", |b| {
        b.iter(|| black_box(reader.best_bid_ask(black_box(&id))))
    });
    group.bench_function("full_book", |b| {
        b.iter(|| black_box(reader.full_book(black_box(&id))))
    });
    group.bench_function("mid_price", |b| {
        b.iter(|| black_box(reader.mid_price(black_box(&id))))
    });
    group.bench_function("recent_events_100", |b| {
        b.iter(|| black_box(reader.recent_events(100)))
    });
    group.bench_function("statistics", |b| b.iter(|| black_box(reader.statistics())));

    group.finish();
}

fn benchmark_ingest(c: &mut Criterion) {
    let mut scenario = FeedScenario::new(8, 20, 17);
    let mut frames = vec![scenario.snapshot_frame()];
    frames.extend(scenario.delta_frames(4096));
    let bytes: usize = frames.iter().map(Vec::len).sum();

    let mut group = c.benchmark_group("ingest");
    group.throughput(Throughput::Bytes(bytes as u64));
    group.bench_function("decode_and_apply_4096_frames", |b| {
        b.iter_batched(
            || OrderBookStore::new(StoreConfig::default()),
            |mut store| black_box(run_ingest(&frames, &EventDecoder::new(), &mut store)),
            BatchSize::LargeInput,
        )
    });
    group.finish();
}

criterion_group!(benches, benchmark_apply, benchmark_read, benchmark_ingest);
criterion_main!(benches);
