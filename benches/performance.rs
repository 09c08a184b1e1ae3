//! Performance benchmarks for the record store and live window.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fleetwatch::{
    decode_inbound, JsonCodec, LiveWindow, Record, RecordStore, StoreConfig, TimestampNs,
    WindowFilter,
};
use serde_json::json;
use std::time::Duration;
use tempfile::TempDir;

fn create_store(dir: &TempDir) -> RecordStore {
    RecordStore::open(StoreConfig {
        path: dir.path().join("events.csv"),
        flush_threshold: usize::MAX,
        flush_interval: Duration::from_secs(3600),
        read_only: false,
    })
    .unwrap()
}

fn event(i: usize) -> Record {
    Record::new(
        format!("msg-{i}"),
        TimestampNs(i as i64 * 1_000),
        "gridworks.event.problem",
        "hw1.isone.scada",
        json!({"Summary": format!("problem {i}"), "ProblemType": "warning"}),
    )
}

/// Benchmark a flush of the live buffer into tables of varying size
fn bench_flush(c: &mut Criterion) {
    let mut group = c.benchmark_group("flush");
    group.sample_size(20);

    for table_size in [100, 1_000, 10_000] {
        group.bench_with_input(
            BenchmarkId::new("table_size", table_size),
            &table_size,
            |b, &size| {
                let dir = TempDir::new().unwrap();
                let mut store = create_store(&dir);
                let history: Vec<Record> = (0..size).map(event).collect();
                store.merge_partition("history", &history).unwrap();

                let mut next = size;
                b.iter(|| {
                    for _ in 0..100 {
                        store.append_live(event(next));
                        next += 1;
                    }
                    black_box(store.flush().unwrap());
                });
            },
        );
    }

    group.finish();
}

/// Benchmark merging a partition that is already fully known
fn bench_redundant_merge(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let mut store = create_store(&dir);
    let partition: Vec<Record> = (0..5_000).map(event).collect();
    store.merge_partition("p1", &partition).unwrap();

    c.bench_function("redundant_merge_5000", |b| {
        b.iter(|| black_box(store.merge_partition("p1", &partition).unwrap()));
    });
}

/// Benchmark window admission at varying capacities
fn bench_window(c: &mut Criterion) {
    let mut group = c.benchmark_group("window_consider");
    let records: Vec<Record> = (0..10_000).map(event).collect();

    for capacity in [45, 500, 5_000] {
        group.bench_with_input(
            BenchmarkId::new("capacity", capacity),
            &capacity,
            |b, &capacity| {
                b.iter(|| {
                    let mut window = LiveWindow::new(capacity, WindowFilter::default());
                    black_box(window.consider_all(&records));
                });
            },
        );
    }

    group.finish();
}

/// Benchmark payload decoding
fn bench_decode(c: &mut Criterion) {
    let payload = serde_json::to_vec(&json!({
        "MessageId": "m1",
        "TimeNS": 1_700_000_000_000_000_000i64,
        "TypeName": "gridworks.event.problem",
        "Src": "hw1.isone.scada",
        "Summary": "pump failed",
        "ProblemType": "error",
    }))
    .unwrap();

    c.bench_function("decode_event", |b| {
        b.iter(|| black_box(decode_inbound(&JsonCodec, black_box(&payload))));
    });
}

criterion_group!(benches, bench_flush, bench_redundant_merge, bench_window, bench_decode);

criterion_main!(benches);
