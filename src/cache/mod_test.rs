use std::time::Duration;

use serde_json::json;

use super::*;

#[test]
fn test_get_counts_hits_and_misses() {
    let manager = CacheManager::default();
    manager.set(CacheKind::Query, "db:abc:10", json!([{"id": 1}]), None);

    assert_eq!(manager.get(CacheKind::Query, "db:abc:10"), Some(json!([{"id": 1}])));
    assert_eq!(manager.get(CacheKind::Query, "db:other:10"), None);
    assert_eq!(manager.get(CacheKind::Schema, "db"), None);

    let stats = manager.stats();
    assert_eq!(stats.query_hits, 1);
    assert_eq!(stats.query_misses, 1);
    assert_eq!(stats.schema_misses, 1);
    assert_eq!(stats.total_requests, 3);
    assert_eq!(stats.hit_rate_percent, 33.33);
    assert_eq!(stats.cache_sizes.query, 1);
}

#[test]
fn test_empty_stats_have_zero_hit_rate() {
    let stats = CacheManager::default().stats();
    assert_eq!(stats.total_requests, 0);
    assert_eq!(stats.hit_rate_percent, 0.0);
}

#[test]
fn test_caches_are_independent() {
    let manager = CacheManager::default();
    manager.set(CacheKind::Schema, "db", json!({"tables": {}}), None);

    assert!(manager.get(CacheKind::Query, "db").is_none());
    assert!(manager.get(CacheKind::Schema, "db").is_some());

    manager.clear(Some(CacheKind::Query));
    assert!(manager.get(CacheKind::Schema, "db").is_some());

    manager.clear(None);
    assert!(manager.get(CacheKind::Schema, "db").is_none());
}

#[test]
fn test_invalidate_prefix() {
    let manager = CacheManager::default();
    manager.set(CacheKind::Query, "db:1:10", json!(1), None);
    manager.set(CacheKind::Query, "db:2:10", json!(2), None);
    manager.set(CacheKind::Query, "dbx:1:10", json!(3), None);

    assert_eq!(manager.invalidate_prefix(CacheKind::Query, "db:"), 2);
    assert_eq!(manager.stats().cache_sizes.query, 1);
}

#[test]
fn test_reset_stats() {
    let manager = CacheManager::default();
    manager.get(CacheKind::Metadata, "x");
    manager.reset_stats();
    assert_eq!(manager.stats().metadata_misses, 0);
}

#[tokio::test(start_paused = true)]
async fn test_explicit_ttl_is_honoured() {
    let manager = CacheManager::default();
    manager.set(CacheKind::Query, "k", json!(1), Some(Duration::from_secs(1)));

    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(manager.get(CacheKind::Query, "k").is_none());
}

#[test]
fn test_config_sizes_apply() {
    let manager = CacheManager::new(&CacheConfig {
        query_cache_size: 1,
        ..Default::default()
    });
    manager.set(CacheKind::Query, "a", json!(1), None);
    manager.set(CacheKind::Query, "b", json!(2), None);
    assert_eq!(manager.stats().cache_sizes.query, 1);
}
