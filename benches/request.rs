//! Request-path benchmarks for the stream cache.
//!
//! Run with: `cargo bench --bench request`
//!
//! Measures hit latency (read lock plus handle attach), miss latency
//! (admission, replacement and multiplexer start) and read throughput of
//! materialized values.

use std::hint::black_box;
use std::time::{Duration, Instant};

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use streamcache::prelude::*;

const KEYS: u64 = 1_024;
const ROWS: u64 = 64;

fn source(_: &str) -> Result<Box<dyn BackendStream<u64>>, BackendError> {
    let rows: Vec<Result<u64, BackendError>> = (0..ROWS).map(Ok).collect();
    Ok(Box::new(IterStream::new(rows)))
}

fn store(entries: u64) -> CacheStore<u64> {
    CacheBuilder::new()
        .entry_size(1u64)
        .and_then(|b| b.size(entries))
        .expect("valid bench config")
        .timeout(Duration::ZERO)
        .build(source)
        .expect("non-empty budget")
}

// ============================================================================
// Request latency
// ============================================================================

fn bench_request(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_ns");
    group.throughput(Throughput::Elements(KEYS));

    group.bench_function("hit", |b| {
        let store = store(KEYS);
        for i in 0..KEYS {
            let _ = store.request(&format!("q{i}"), false);
        }
        let keys: Vec<String> = (0..KEYS).map(|i| format!("q{i}")).collect();
        b.iter(|| {
            for key in &keys {
                black_box(store.request(key, false));
            }
        })
    });

    group.bench_function("miss", |b| {
        b.iter_custom(|iters| {
            let store = store(KEYS / 4);
            let start = Instant::now();
            for n in 0..iters {
                for i in 0..KEYS {
                    black_box(store.request(&format!("m{n}-{i}"), false));
                }
            }
            start.elapsed()
        })
    });

    group.finish();
}

// ============================================================================
// Read throughput
// ============================================================================

fn bench_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("read");
    group.throughput(Throughput::Elements(ROWS));

    group.bench_function("materialized_prefix", |b| {
        let store = store(16);
        let mut warm = store.request("q", false);
        while warm.materialize().is_some() {}
        let mut handle = store.request("q", false);
        b.iter(|| {
            handle.reset().expect("open handle");
            while let Some(v) = handle.materialize() {
                black_box(v);
            }
        })
    });

    group.finish();
}

criterion_group!(benches, bench_request, bench_read);
criterion_main!(benches);
