//! Shared conformance suite for cache backends, plus a minimal in-process
//! reference backend for tests that only need the contract.
//!
//! Call [`run_cache_conformance_tests`] from a backend's test module with a
//! fresh instance.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;

use crate::backend::{CacheBackend, DEFAULT_REGION};

/// Run the cache semantics every backend must provide.
pub async fn run_cache_conformance_tests(cache: &dyn CacheBackend) {
    test_get_missing(cache).await;
    test_set_and_get(cache).await;
    test_exists_and_delete(cache).await;
    test_clear_region(cache).await;
    test_region_isolation(cache).await;
    test_items_snapshot(cache).await;
}

async fn test_get_missing(cache: &dyn CacheBackend) {
    assert!(
        cache.get(DEFAULT_REGION, "missing").await.is_none(),
        "get on a missing key should return None"
    );
}

async fn test_set_and_get(cache: &dyn CacheBackend) {
    cache
        .set(DEFAULT_REGION, "greeting", serde_json::json!("hello"), None)
        .await;
    assert_eq!(
        cache.get(DEFAULT_REGION, "greeting").await,
        Some(serde_json::json!("hello"))
    );

    // Overwrite replaces the value.
    cache
        .set(DEFAULT_REGION, "greeting", serde_json::json!("bye"), None)
        .await;
    assert_eq!(
        cache.get(DEFAULT_REGION, "greeting").await,
        Some(serde_json::json!("bye"))
    );
}

async fn test_exists_and_delete(cache: &dyn CacheBackend) {
    cache
        .set(DEFAULT_REGION, "doomed", serde_json::json!(1), None)
        .await;
    assert!(cache.exists(DEFAULT_REGION, "doomed").await);

    cache.delete(DEFAULT_REGION, "doomed").await;
    assert!(!cache.exists(DEFAULT_REGION, "doomed").await);
    assert!(cache.get(DEFAULT_REGION, "doomed").await.is_none());
}

async fn test_clear_region(cache: &dyn CacheBackend) {
    cache
        .set("clearable", "a", serde_json::json!(1), None)
        .await;
    cache
        .set("clearable", "b", serde_json::json!(2), None)
        .await;

    cache.clear("clearable").await;
    assert!(cache.get("clearable", "a").await.is_none());
    assert!(cache.get("clearable", "b").await.is_none());
    assert!(cache.items("clearable").await.is_empty());
}

async fn test_region_isolation(cache: &dyn CacheBackend) {
    cache.set("left", "k", serde_json::json!("l"), None).await;
    cache.set("right", "k", serde_json::json!("r"), None).await;

    cache.clear("left").await;
    assert!(cache.get("left", "k").await.is_none());
    assert_eq!(cache.get("right", "k").await, Some(serde_json::json!("r")));
}

async fn test_items_snapshot(cache: &dyn CacheBackend) {
    cache.clear("snap").await;
    for i in 0..5 {
        cache
            .set("snap", &format!("k{i}"), serde_json::json!(i), None)
            .await;
    }

    let snapshot = cache.items("snap").await;
    assert_eq!(snapshot.len(), 5);

    // Mutating after the snapshot is taken must not disturb it.
    cache.delete("snap", "k0").await;
    assert_eq!(snapshot.len(), 5);

    let live = cache.items("snap").await;
    assert_eq!(live.len(), 4);
}

/// Minimal region cache over a locked map. Ignores TTLs; intended for tests
/// of cache consumers, not as a production backend.
#[derive(Debug, Default)]
pub struct MapCache {
    data: RwLock<HashMap<(String, String), serde_json::Value>>,
}

impl MapCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for MapCache {
    async fn set(&self, region: &str, key: &str, value: serde_json::Value, _ttl: Option<Duration>) {
        self.data
            .write()
            .expect("map cache lock poisoned")
            .insert((region.to_owned(), key.to_owned()), value);
    }

    async fn get(&self, region: &str, key: &str) -> Option<serde_json::Value> {
        self.data
            .read()
            .expect("map cache lock poisoned")
            .get(&(region.to_owned(), key.to_owned()))
            .cloned()
    }

    async fn exists(&self, region: &str, key: &str) -> bool {
        self.get(region, key).await.is_some()
    }

    async fn delete(&self, region: &str, key: &str) {
        self.data
            .write()
            .expect("map cache lock poisoned")
            .remove(&(region.to_owned(), key.to_owned()));
    }

    async fn clear(&self, region: &str) {
        self.data
            .write()
            .expect("map cache lock poisoned")
            .retain(|(r, _), _| r != region);
    }

    async fn items(&self, region: &str) -> Vec<(String, serde_json::Value)> {
        self.data
            .read()
            .expect("map cache lock poisoned")
            .iter()
            .filter(|((r, _), _)| r == region)
            .map(|((_, k), v)| (k.clone(), v.clone()))
            .collect()
    }

    async fn close(&self) {}
}
