//! CRL cache integration tests — scenarios S3/S4 and properties P4-P9.

use std::time::{Duration, SystemTime};

use chainresolve::{CrlCache, CrlCacheConfig};

fn far_future() -> SystemTime {
    SystemTime::now() + Duration::from_secs(48 * 60 * 60)
}

#[test]
fn s3_lru_eviction_scenario() {
    let cache = CrlCache::new(CrlCacheConfig { max_size: 2, ..Default::default() });
    cache.set("a", vec![1], far_future()).unwrap();
    cache.set("b", vec![2], far_future()).unwrap();
    assert!(cache.get("a").is_some());
    cache.set("c", vec![3], far_future()).unwrap();

    assert!(cache.get("a").is_some());
    assert!(cache.get("b").is_none());
    assert!(cache.get("c").is_some());
    assert_eq!(cache.get_metrics().evictions, 1);
}

#[test]
fn s4_freshness_rejects_stale_entries() {
    let cache = CrlCache::new(CrlCacheConfig::default());
    let past = SystemTime::now() - Duration::from_secs(2 * 60 * 60);
    cache.set("x", vec![1, 2, 3], past).unwrap();
    assert_eq!(cache.get("x"), None);
}

#[test]
fn p7_validation_rejects_bad_input_without_mutation() {
    let cache = CrlCache::new(CrlCacheConfig::default());
    assert!(cache.set("", vec![1], far_future()).is_err());
    assert!(cache.set("url", vec![], far_future()).is_err());
    let far_out_of_bounds = SystemTime::now() + Duration::from_secs(400 * 24 * 60 * 60);
    assert!(cache.set("url", vec![1], far_out_of_bounds).is_err());
    assert_eq!(cache.get_metrics().size, 0);
}

#[test]
fn p8_metrics_are_monotonic_without_clear() {
    let cache = CrlCache::new(CrlCacheConfig::default());
    cache.set("a", vec![1], far_future()).unwrap();
    let before = cache.get_metrics();
    cache.get("a");
    cache.get("missing");
    let after = cache.get_metrics();
    assert!(after.hits >= before.hits);
    assert!(after.misses >= before.misses);
}

#[tokio::test]
async fn p9_cleanup_singleton_under_concurrent_starts() {
    let cache = CrlCache::new(CrlCacheConfig {
        max_size: 10,
        cleanup_interval: Duration::from_millis(50),
    });

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache.start_cleanup();
            })
        })
        .collect();

    for h in handles {
        h.await.unwrap();
    }

    tokio::time::sleep(Duration::from_millis(150)).await;
    cache.stop_cleanup();
}

#[test]
fn set_config_prunes_immediately_to_new_max_size() {
    let cache = CrlCache::new(CrlCacheConfig { max_size: 10, ..Default::default() });
    for i in 0..5 {
        cache.set(&i.to_string(), vec![1], far_future()).unwrap();
    }
    cache.set_config(CrlCacheConfig { max_size: 1, ..Default::default() });
    assert_eq!(cache.get_metrics().size, 1);
}
