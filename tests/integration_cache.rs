//! Multi-layer cache integration tests
//!
//! Exercise the L1/L2 orchestration against an in-process L2 with a
//! switchable outage: promotion, TTL expiry, write-through, degraded mode.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use urlscan_core::{CacheConfig, L2CacheBackend, MultiLayerCache, StatsRegistry};

fn cache_over(
    l2: Arc<FlakyL2>,
    l1_capacity: usize,
) -> (MultiLayerCache, Arc<StatsRegistry>) {
    init_tracing();
    let registry = Arc::new(StatsRegistry::new());
    let config = CacheConfig {
        l1_capacity,
        default_ttl: Duration::from_secs(3600),
    };
    (
        MultiLayerCache::new(l2, config, Arc::clone(&registry)),
        registry,
    )
}

#[tokio::test]
async fn set_and_get_round_trip() {
    let l2 = Arc::new(FlakyL2::new());
    let (cache, _) = cache_over(Arc::clone(&l2), 100);
    let key = test_key("round_trip");
    let value = serde_json::to_value(verdict(true)).unwrap();

    cache.set(&key, value.clone(), None).await;

    assert_eq!(cache.get(&key).await, Some(value.clone()));
    // write-through reached L2 as well
    assert_eq!(l2.inner.get(&key).await.unwrap(), Some(value));
}

#[tokio::test]
async fn l2_hit_promotes_into_l1() {
    let l2 = Arc::new(FlakyL2::new());
    let (cache, _) = cache_over(Arc::clone(&l2), 100);
    let key = test_key("promote");
    let value = serde_json::json!({"is_phishing": false});

    // Seed only the distributed tier
    l2.inner
        .set_with_ttl(&key, &value, Duration::from_secs(300))
        .await
        .unwrap();

    // First lookup is served by L2 and promoted
    assert_eq!(cache.get(&key).await, Some(value.clone()));
    let stats = cache.stats();
    assert_eq!(stats.l2_hits_total, 1);
    assert_eq!(stats.l1_hits_total, 0);
    assert_eq!(stats.promotions_total, 1);

    // Second lookup is the L1 fast path
    assert_eq!(cache.get(&key).await, Some(value));
    let stats = cache.stats();
    assert_eq!(stats.l1_hits_total, 1);
    assert_eq!(stats.l2_hits_total, 1);
}

#[tokio::test(start_paused = true)]
async fn ttl_expiry_is_honored_by_both_layers() {
    let l2 = Arc::new(FlakyL2::new());
    let (cache, _) = cache_over(Arc::clone(&l2), 100);
    let key = test_key("ttl");

    cache
        .set(&key, serde_json::json!("v"), Some(Duration::from_secs(5)))
        .await;
    assert!(cache.get(&key).await.is_some());

    tokio::time::advance(Duration::from_secs(6)).await;

    assert_eq!(cache.get(&key).await, None);
    // the stale L1 copy was evicted, not just skipped
    let stats = cache.stats();
    assert_eq!(stats.expirations_total, 1);
    assert_eq!(stats.l1_size, 0);
    // and the L2 copy is gone too
    assert_eq!(l2.inner.get(&key).await.unwrap(), None);
}

#[tokio::test]
async fn repeated_set_keeps_a_single_entry() {
    let l2 = Arc::new(FlakyL2::new());
    let (cache, _) = cache_over(l2, 100);
    let key = test_key("idempotent");

    for _ in 0..5 {
        cache.set(&key, serde_json::json!({"v": 1}), None).await;
    }

    assert_eq!(cache.stats().l1_size, 1);
}

#[tokio::test]
async fn degraded_mode_serves_from_l1_only() {
    let l2 = Arc::new(FlakyL2::new());
    let (cache, registry) = cache_over(Arc::clone(&l2), 100);
    let key = test_key("degraded");
    let value = serde_json::json!({"is_phishing": true});

    l2.set_unavailable(true);

    // set succeeds on L1 alone and records the L2 write failure
    cache.set(&key, value.clone(), None).await;
    assert!(registry.cache_degraded());
    let stats = cache.stats();
    assert!(stats.degraded);
    assert_eq!(stats.l2_write_failures_total, 1);

    // get of the locally cached key still succeeds
    assert_eq!(cache.get(&key).await, Some(value));

    // get of an unknown key is a plain miss, not an error
    assert_eq!(cache.get(&test_key("unknown")).await, None);
    assert!(cache.stats().l2_errors_total >= 1);

    // L2 back up: the next successful round trip clears the flag
    l2.set_unavailable(false);
    let _ = cache.get(&test_key("other")).await;
    assert!(!registry.cache_degraded());
}

#[tokio::test]
async fn l1_evicts_least_recently_used_when_l2_is_down() {
    // With the distributed tier down, the cache is exactly the bounded LRU:
    // the capacity-2 eviction order is observable end to end
    let l2 = Arc::new(FlakyL2::new());
    let (cache, _) = cache_over(Arc::clone(&l2), 2);
    l2.set_unavailable(true);

    cache.set("a", serde_json::json!(1), None).await;
    cache.set("b", serde_json::json!(2), None).await;
    assert_eq!(cache.get("a").await, Some(serde_json::json!(1)));
    cache.set("c", serde_json::json!(3), None).await;

    assert_eq!(cache.get("b").await, None);
    assert_eq!(cache.get("a").await, Some(serde_json::json!(1)));
    assert_eq!(cache.get("c").await, Some(serde_json::json!(3)));
    assert_eq!(cache.stats().evictions_total, 1);
}

#[tokio::test]
async fn remove_and_clear_reach_both_layers() {
    let l2 = Arc::new(FlakyL2::new());
    let (cache, _) = cache_over(Arc::clone(&l2), 100);
    let key = test_key("remove");

    cache.set(&key, serde_json::json!(1), None).await;
    cache.remove(&key).await;
    assert_eq!(cache.get(&key).await, None);
    assert_eq!(l2.inner.get(&key).await.unwrap(), None);

    cache.set("x", serde_json::json!(1), None).await;
    cache.set("y", serde_json::json!(2), None).await;
    cache.clear().await;
    assert_eq!(cache.stats().l1_size, 0);
    assert!(l2.inner.is_empty());
}

#[tokio::test]
async fn hit_rate_combines_both_layers() {
    let l2 = Arc::new(FlakyL2::new());
    let (cache, _) = cache_over(Arc::clone(&l2), 100);

    cache.set("k1", serde_json::json!(1), None).await;
    let _ = cache.get("k1").await; // L1 hit
    let _ = cache.get("k1").await; // L1 hit

    // L2-only entry: one L2 hit
    l2.inner
        .set_with_ttl("k2", &serde_json::json!(2), Duration::from_secs(60))
        .await
        .unwrap();
    let _ = cache.get("k2").await;

    let _ = cache.get("missing").await; // miss

    let stats = cache.stats();
    assert_eq!(stats.requests_total, 4);
    assert_eq!(stats.l1_hits_total, 2);
    assert_eq!(stats.l2_hits_total, 1);
    assert_eq!(stats.misses_total, 1);
    assert!((stats.cache_hit_rate - 0.75).abs() < f64::EPSILON);
}
