//! Integration tests for the tiered cache: coherence, single-flight and
//! tenant-scoped invalidation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use waypoint_core::cache::{CacheConfig, CacheKey, KeyKind, TieredCache, TtlClass};
use waypoint_core::prelude::{TenantId, UserId, WaypointError};

fn tenant(id: &str) -> TenantId {
    TenantId::new(id)
}

async fn counted(cache: &TieredCache, key: &CacheKey, counter: &Arc<AtomicUsize>, delay: Duration) -> u64 {
    let counter = counter.clone();
    cache
        .get_or_compute(key, move || async move {
            tokio::time::sleep(delay).await;
            Ok(counter.fetch_add(1, Ordering::SeqCst) as u64)
        })
        .await
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_single_flight_across_tasks() {
    let cache = TieredCache::new(CacheConfig::default());
    let key = CacheKey::entitlement(&tenant("t1"));
    let computes = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..50 {
        let (cache, key, computes) = (cache.clone(), key.clone(), computes.clone());
        handles.push(tokio::spawn(async move {
            counted(&cache, &key, &computes, Duration::from_millis(100)).await
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap(), 0);
    }
    assert_eq!(computes.load(Ordering::SeqCst), 1);
    assert_eq!(cache.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_never_served_past_ttl_without_refresh() {
    let cache = TieredCache::new(CacheConfig::default());
    let key = CacheKey::entitlement(&tenant("t1"));
    let computes = Arc::new(AtomicUsize::new(0));

    assert_eq!(counted(&cache, &key, &computes, Duration::ZERO).await, 0);

    // Medium class: stale after five minutes, a refresh starts on first read.
    tokio::time::advance(TtlClass::Medium.default_ttl() + Duration::from_secs(1)).await;
    assert_eq!(counted(&cache, &key, &computes, Duration::from_millis(10)).await, 0);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(computes.load(Ordering::SeqCst), 2);

    assert_eq!(counted(&cache, &key, &computes, Duration::ZERO).await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalidation_is_tenant_scoped() {
    let cache = TieredCache::new(CacheConfig::default());
    let computes = Arc::new(AtomicUsize::new(0));

    let keys = [
        CacheKey::entitlement(&tenant("t1")),
        CacheKey::permissions(&tenant("t1"), &UserId::new("u1")),
        CacheKey::navigation(&tenant("t1"), "abc"),
        CacheKey::entitlement(&tenant("t10")),
        CacheKey::permissions(&tenant("t2"), &UserId::new("u1")),
    ];
    for key in &keys {
        counted(&cache, key, &computes, Duration::ZERO).await;
    }

    let removed = cache.invalidate_tenant(&tenant("t1")).await.unwrap();
    assert_eq!(removed, 3);

    let before = computes.load(Ordering::SeqCst);
    for key in &keys[3..] {
        counted(&cache, key, &computes, Duration::ZERO).await;
    }
    assert_eq!(computes.load(Ordering::SeqCst), before);

    counted(&cache, &keys[0], &computes, Duration::ZERO).await;
    assert_eq!(computes.load(Ordering::SeqCst), before + 1);
}

#[tokio::test(start_paused = true)]
async fn test_kind_pattern_invalidation() {
    let cache = TieredCache::new(CacheConfig::default());
    let computes = Arc::new(AtomicUsize::new(0));
    let t1 = tenant("t1");

    counted(&cache, &CacheKey::navigation(&t1, "a"), &computes, Duration::ZERO).await;
    counted(&cache, &CacheKey::navigation(&t1, "b"), &computes, Duration::ZERO).await;
    counted(&cache, &CacheKey::entitlement(&t1), &computes, Duration::ZERO).await;

    let removed = cache
        .invalidate(&CacheKey::kind_pattern(&t1, KeyKind::Navigation))
        .await
        .unwrap();
    assert_eq!(removed, 2);
    assert_eq!(cache.stats().await.unwrap().entries, 1);
}

#[tokio::test(start_paused = true)]
async fn test_failures_reach_every_waiter_and_are_not_cached() {
    let cache = TieredCache::new(CacheConfig::default());
    let key = CacheKey::entitlement(&tenant("t1"));
    let attempts = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..5 {
        let (cache, key, attempts) = (cache.clone(), key.clone(), attempts.clone());
        handles.push(tokio::spawn(async move {
            cache
                .get_or_compute::<u64, _, _>(&key, move || async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Err(WaypointError::store_unavailable("directory down"))
                })
                .await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_err());
    }
    assert_eq!(attempts.load(Ordering::SeqCst), 1);

    let value: u64 = cache.get_or_compute(&key, || async { Ok(7) }).await.unwrap();
    assert_eq!(value, 7);
}
