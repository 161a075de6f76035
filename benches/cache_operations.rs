//! Benchmarks for the cache hot paths
//!
//! Self-contained: runs against the in-process LRU and the memory L2
//! backend, so no external services are needed.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use urlscan_core::backends::{BoundedLruCache, MemoryCache};
use urlscan_core::{CacheConfig, L2CacheBackend, MultiLayerCache, StatsRegistry};

fn setup_cache() -> (MultiLayerCache, Arc<MemoryCache>, Runtime) {
    let rt = Runtime::new().unwrap_or_else(|_| panic!("Failed to create runtime"));
    let l2 = Arc::new(MemoryCache::new());
    let cache = MultiLayerCache::new(
        Arc::clone(&l2) as _,
        CacheConfig::default(),
        Arc::new(StatsRegistry::new()),
    );
    (cache, l2, rt)
}

/// Generate test data of specified size
fn test_data(size_bytes: usize) -> serde_json::Value {
    let data_string = "x".repeat(size_bytes);
    json!({
        "data": data_string,
        "size": size_bytes,
    })
}

/// Benchmark the raw L1 structure: insert with eviction pressure
fn bench_l1_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("l1_set");

    for capacity in &[100usize, 1000, 10_000] {
        let l1 = BoundedLruCache::new(*capacity, Arc::new(StatsRegistry::new()));
        let data = test_data(256);
        let mut i = 0u64;

        group.bench_with_input(BenchmarkId::from_parameter(capacity), capacity, |b, _| {
            b.iter(|| {
                i += 1;
                // keys cycle past capacity so every insert evicts
                l1.set(&format!("bench:l1:{i}"), black_box(data.clone()), None);
            });
        });
    }

    group.finish();
}

/// Benchmark raw L1 hits (recency-list update included)
fn bench_l1_get(c: &mut Criterion) {
    let l1 = BoundedLruCache::new(1000, Arc::new(StatsRegistry::new()));
    for i in 0..100 {
        l1.set(&format!("bench:hit:{i}"), test_data(256), None);
    }

    let mut i = 0u32;
    c.bench_function("l1_get_hit", |b| {
        b.iter(|| {
            i = i.wrapping_add(1);
            black_box(l1.get(&format!("bench:hit:{}", i % 100)));
        });
    });
}

/// Benchmark the multi-layer fast path (L1 hit)
fn bench_manager_l1_hit(c: &mut Criterion) {
    let (cache, _l2, rt) = setup_cache();

    rt.block_on(async {
        for i in 0..100 {
            cache
                .set(&format!("bench:mgr:{i}"), test_data(1024), None)
                .await;
        }
    });

    let mut i = 0u32;
    c.bench_function("manager_l1_hit", |b| {
        b.iter(|| {
            rt.block_on(async {
                i = i.wrapping_add(1);
                black_box(cache.get(&format!("bench:mgr:{}", i % 100)).await);
            });
        });
    });
}

/// Benchmark the L2 fallback with promotion (L1 miss every time)
fn bench_manager_l2_promotion(c: &mut Criterion) {
    let (cache, l2, rt) = setup_cache();

    rt.block_on(async {
        for i in 0..100 {
            l2.set_with_ttl(
                &format!("bench:promo:{i}"),
                &test_data(1024),
                Duration::from_secs(300),
            )
            .await
            .unwrap_or_else(|_| panic!("Failed to seed L2"));
        }
    });

    let mut i = 0u32;
    c.bench_function("manager_l2_promotion", |b| {
        b.iter(|| {
            rt.block_on(async {
                i = i.wrapping_add(1);
                let key = format!("bench:promo:{}", i % 100);
                // evict from L1 so every lookup exercises the promote path
                cache.remove(&key).await;
                l2.set_with_ttl(&key, &test_data(1024), Duration::from_secs(300))
                    .await
                    .unwrap_or_else(|_| panic!("Failed to seed L2"));
                black_box(cache.get(&key).await);
            });
        });
    });
}

/// Benchmark the double-miss path
fn bench_manager_miss(c: &mut Criterion) {
    let (cache, _l2, rt) = setup_cache();

    let mut i = 0u64;
    c.bench_function("manager_miss", |b| {
        b.iter(|| {
            rt.block_on(async {
                i += 1;
                black_box(cache.get(&format!("bench:miss:{i}")).await);
            });
        });
    });
}

criterion_group!(
    benches,
    bench_l1_set,
    bench_l1_get,
    bench_manager_l1_hit,
    bench_manager_l2_promotion,
    bench_manager_miss
);
criterion_main!(benches);
