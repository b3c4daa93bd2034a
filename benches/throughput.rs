//! Throughput Benchmark for EmberKV
//!
//! Measures the store under various workloads. Journals land in a temp
//! directory so runs do not interfere with each other.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use emberkv::storage::Store;
use std::sync::Arc;
use std::time::Duration;

fn bench_store(name: &str) -> (tempfile::TempDir, Arc<Store>) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open(dir.path().join(format!("{name}.log"))));
    (dir, store)
}

/// Benchmark SET operations
fn bench_set(c: &mut Criterion) {
    let (_dir, store) = bench_store("set");

    let mut group = c.benchmark_group("set");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set_small", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = Bytes::from(format!("key:{}", i));
            store.set(key, Bytes::from("small_value"), 0);
            i += 1;
        });
    });

    group.bench_function("set_medium", |b| {
        let mut i = 0u64;
        let value = Bytes::from("x".repeat(1024)); // 1KB value
        b.iter(|| {
            let key = Bytes::from(format!("key:{}", i));
            store.set(key, value.clone(), 0);
            i += 1;
        });
    });

    group.bench_function("set_with_ttl", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = Bytes::from(format!("ttl:{}", i));
            store.set(key, Bytes::from("value"), 3600);
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark GET operations
fn bench_get(c: &mut Criterion) {
    let (_dir, store) = bench_store("get");

    for i in 0..100_000 {
        store.set(
            Bytes::from(format!("key:{}", i)),
            Bytes::from(format!("value:{}", i)),
            0,
        );
    }

    let mut group = c.benchmark_group("get");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_existing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = Bytes::from(format!("key:{}", i % 100_000));
            black_box(store.get(&key));
            i += 1;
        });
    });

    group.bench_function("get_missing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = Bytes::from(format!("missing:{}", i));
            black_box(store.get(&key));
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark MGET across shards
fn bench_mget(c: &mut Criterion) {
    let (_dir, store) = bench_store("mget");

    for i in 0..10_000 {
        store.set(
            Bytes::from(format!("key:{}", i)),
            Bytes::from("value"),
            0,
        );
    }

    let keys: Vec<Bytes> = (0..16).map(|i| Bytes::from(format!("key:{}", i * 100))).collect();

    let mut group = c.benchmark_group("mget");
    group.throughput(Throughput::Elements(16));

    group.bench_function("mget_16_keys", |b| {
        b.iter(|| {
            black_box(store.mget(&keys));
        });
    });

    group.finish();
}

/// Benchmark mixed workload (80% reads, 20% writes)
fn bench_mixed(c: &mut Criterion) {
    let (_dir, store) = bench_store("mixed");

    for i in 0..10_000 {
        store.set(
            Bytes::from(format!("key:{}", i)),
            Bytes::from(format!("value:{}", i)),
            0,
        );
    }

    let mut group = c.benchmark_group("mixed");
    group.throughput(Throughput::Elements(1));

    group.bench_function("80_read_20_write", |b| {
        let mut i = 0u64;
        b.iter(|| {
            if i % 5 == 0 {
                let key = Bytes::from(format!("new:{}", i));
                store.set(key, Bytes::from("value"), 0);
            } else {
                let key = Bytes::from(format!("key:{}", i % 10_000));
                black_box(store.get(&key));
            }
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark concurrent access
fn bench_concurrent(c: &mut Criterion) {
    use std::thread;

    let mut group = c.benchmark_group("concurrent");
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("4_threads_mixed", |b| {
        b.iter(|| {
            let (_dir, store) = bench_store("concurrent");
            let handles: Vec<_> = (0..4)
                .map(|t| {
                    let store = Arc::clone(&store);
                    thread::spawn(move || {
                        for i in 0..10_000 {
                            let key = Bytes::from(format!("key:{}:{}", t, i));
                            store.set(key.clone(), Bytes::from("value"), 0);
                            store.get(&key);
                        }
                    })
                })
                .collect();

            for handle in handles {
                handle.join().unwrap();
            }

            black_box(store.len());
        });
    });

    group.finish();
}

/// Benchmark compaction over a churned journal
fn bench_compaction(c: &mut Criterion) {
    let mut group = c.benchmark_group("compaction");
    group.sample_size(10);

    group.bench_function("compact_10k_churn", |b| {
        b.iter(|| {
            let (_dir, store) = bench_store("compact");
            for i in 0..10_000 {
                store.set(Bytes::from("churn"), Bytes::from(format!("v{}", i)), 0);
            }
            store.flush_journal();
            store.compact();
            black_box(store.journal_size());
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_set,
    bench_get,
    bench_mget,
    bench_mixed,
    bench_concurrent,
    bench_compaction,
);

criterion_main!(benches);
