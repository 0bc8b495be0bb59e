// Cache performance benchmarks.
// Exercises the hot get/put path, eviction under overflow, and
// concurrent multi-threaded access patterns.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use tlfu_cache::Cache;

fn populated_cache(max_weight: u64, num_keys: u64) -> Cache<u64, u64> {
    let cache = Cache::builder().maximum_weight(max_weight).build().unwrap();
    for k in 0..num_keys {
        cache.put(k, k).unwrap();
    }
    cache
}

fn bench_get_if_present_hit(c: &mut Criterion) {
    let cache = populated_cache(10_000, 5_000);

    c.bench_function("get_if_present_hit", |b| {
        b.iter(|| {
            for key in 0..1_000u64 {
                black_box(cache.get_if_present(black_box(&key)));
            }
        });
    });
}

fn bench_get_if_present_miss(c: &mut Criterion) {
    let cache = populated_cache(10_000, 5_000);

    c.bench_function("get_if_present_miss", |b| {
        b.iter(|| {
            for key in 100_000..101_000u64 {
                black_box(cache.get_if_present(black_box(&key)));
            }
        });
    });
}

fn bench_put_under_overflow(c: &mut Criterion) {
    let mut group = c.benchmark_group("put_under_overflow");

    for max_weight in [100u64, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(max_weight), &max_weight, |b, &max_weight| {
            let cache: Cache<u64, u64> = Cache::builder().maximum_weight(max_weight).build().unwrap();
            let mut next = 0u64;
            b.iter(|| {
                cache.put(black_box(next), black_box(next)).unwrap();
                next += 1;
            });
        });
    }

    group.finish();
}

fn bench_concurrent_mixed_workload(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent_mixed_workload");

    for num_threads in [1usize, 2, 4, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(num_threads), &num_threads, |b, &num_threads| {
            let cache: Cache<u64, u64> = Cache::builder().maximum_weight(10_000).build().unwrap();
            let cache = Arc::new(cache);
            for k in 0..5_000u64 {
                cache.put(k, k).unwrap();
            }

            b.iter(|| {
                let handles: Vec<_> = (0..num_threads)
                    .map(|t| {
                        let cache = cache.clone();
                        std::thread::spawn(move || {
                            for i in 0..200u64 {
                                let key = (t as u64 * 200 + i) % 5_000;
                                if i % 10 == 0 {
                                    cache.put(key, key).unwrap();
                                } else {
                                    black_box(cache.get_if_present(&key));
                                }
                            }
                        })
                    })
                    .collect();
                for h in handles {
                    h.join().unwrap();
                }
            });
        });
    }

    group.finish();
}

fn bench_clean_up_after_burst(c: &mut Criterion) {
    c.bench_function("clean_up_after_burst", |b| {
        b.iter(|| {
            let cache: Cache<u64, u64> = Cache::builder().maximum_weight(1_000).build().unwrap();
            for k in 0..5_000u64 {
                cache.put(k, k).unwrap();
            }
            cache.clean_up();
            black_box(cache.weighted_size());
        });
    });
}

criterion_group!(
    benches,
    bench_get_if_present_hit,
    bench_get_if_present_miss,
    bench_put_under_overflow,
    bench_concurrent_mixed_workload,
    bench_clean_up_after_burst
);
criterion_main!(benches);
