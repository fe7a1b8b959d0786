//! Allocation Benchmark for shortpool
//!
//! Measures allocation, eviction and lookup on a single tier, plus
//! allocation under thread contention.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use shortpool::storage::{Alphabet, ExpiryPool, LinkKind, LinkRequest};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::time::Instant;

const TTL: Duration = Duration::from_secs(3600);

fn request() -> LinkRequest {
    LinkRequest::new(LinkKind::Url, "https://example.com/some/long/path")
}

fn pool(key_len: usize) -> ExpiryPool {
    ExpiryPool::new(&Alphabet::default(), key_len, TTL).unwrap()
}

/// Benchmark pool construction (full key space enumeration)
fn bench_init(c: &mut Criterion) {
    let mut group = c.benchmark_group("init");
    group.sample_size(10);

    group.bench_function("len_2", |b| b.iter(|| black_box(pool(2))));
    group.bench_function("len_3", |b| b.iter(|| black_box(pool(3))));

    group.finish();
}

/// Benchmark allocation and eviction
fn bench_allocate(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate");
    group.throughput(Throughput::Elements(1000));

    group.bench_function("allocate_1000_len_3", |b| {
        b.iter_batched(
            || pool(3),
            |pool| {
                let at = Instant::now() + TTL;
                for _ in 0..1000 {
                    black_box(pool.allocate(request().expires_at(at)).unwrap());
                }
                pool
            },
            BatchSize::LargeInput,
        );
    });

    group.bench_function("allocate_evict_1000_len_3", |b| {
        let pool = pool(3);
        b.iter(|| {
            let at = Instant::now() + TTL;
            for _ in 0..1000 {
                pool.allocate(request().expires_at(at)).unwrap();
            }
            black_box(pool.evict_expired(at));
        });
    });

    group.finish();
}

/// Benchmark lookups
fn bench_get(c: &mut Criterion) {
    let pool = pool(3);
    let at = Instant::now() + TTL;
    let keys: Vec<String> = (0..10_000)
        .map(|_| pool.allocate(request().expires_at(at)).unwrap())
        .collect();

    let mut group = c.benchmark_group("get");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_existing", |b| {
        let mut i = 0usize;
        b.iter(|| {
            black_box(pool.get(&keys[i % keys.len()]));
            i += 1;
        });
    });

    group.bench_function("get_missing", |b| {
        b.iter(|| black_box(pool.get("!!!")));
    });

    group.finish();
}

/// Benchmark contended allocation across threads
fn bench_concurrent(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent");
    group.sample_size(10);

    for threads in [2, 4, 8] {
        group.bench_function(format!("allocate_{threads}_threads"), |b| {
            b.iter_batched(
                || Arc::new(pool(3)),
                |pool| {
                    let at = Instant::now() + TTL;
                    let handles: Vec<_> = (0..threads)
                        .map(|_| {
                            let pool = Arc::clone(&pool);
                            thread::spawn(move || {
                                for _ in 0..1000 {
                                    pool.allocate(request().expires_at(at)).unwrap();
                                }
                            })
                        })
                        .collect();
                    for handle in handles {
                        handle.join().unwrap();
                    }
                    pool
                },
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_init, bench_allocate, bench_get, bench_concurrent);
criterion_main!(benches);
