use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use fluxgate_cache::CacheBackend;

/// Eviction policy for one region, chosen at region creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionPolicy {
    /// Time-bounded: entries expire `ttl` after insertion unless the write
    /// carries its own TTL.
    Ttl { default_ttl: Option<Duration> },
    /// Size-bounded: once `max_entries` live entries exist, the least
    /// recently used are evicted.
    Lru { max_entries: u64 },
}

/// A single entry in a TTL region.
#[derive(Debug, Clone)]
struct Entry {
    value: serde_json::Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|deadline| Instant::now() >= deadline)
    }
}

enum Region {
    /// Lazily-evicting TTL map.
    Ttl {
        default_ttl: Option<Duration>,
        data: DashMap<String, Entry>,
    },
    /// Size-bounded cache; recency tracking is handled by the cache itself.
    Lru(moka::sync::Cache<String, serde_json::Value>),
}

impl Region {
    fn new(policy: RegionPolicy) -> Self {
        match policy {
            RegionPolicy::Ttl { default_ttl } => Self::Ttl {
                default_ttl,
                data: DashMap::new(),
            },
            RegionPolicy::Lru { max_entries } => Self::Lru(
                moka::sync::Cache::builder()
                    .max_capacity(max_entries)
                    .build(),
            ),
        }
    }
}

/// In-memory [`CacheBackend`] with named regions.
///
/// Regions named in the construction map use their configured policy; any
/// other region is created on first touch with the default policy.
pub struct MemoryCache {
    regions: DashMap<String, Arc<Region>>,
    policies: HashMap<String, RegionPolicy>,
    default_policy: RegionPolicy,
}

impl MemoryCache {
    #[must_use]
    pub fn new(policies: HashMap<String, RegionPolicy>, default_policy: RegionPolicy) -> Self {
        Self {
            regions: DashMap::new(),
            policies,
            default_policy,
        }
    }

    /// A cache whose every region is TTL-bounded by `default_ttl`.
    #[must_use]
    pub fn with_ttl(default_ttl: Option<Duration>) -> Self {
        Self::new(HashMap::new(), RegionPolicy::Ttl { default_ttl })
    }

    /// Flush pending eviction work for a size-bounded region so entry counts
    /// are exact. TTL regions evict lazily and need no maintenance.
    pub fn maintain(&self, region: &str) {
        if let Region::Lru(cache) = &*self.region(region) {
            cache.run_pending_tasks();
        }
    }

    fn region(&self, name: &str) -> Arc<Region> {
        if let Some(region) = self.regions.get(name) {
            return Arc::clone(&region);
        }
        let policy = self
            .policies
            .get(name)
            .copied()
            .unwrap_or(self.default_policy);
        self.regions
            .entry(name.to_owned())
            .or_insert_with(|| Arc::new(Region::new(policy)))
            .clone()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::with_ttl(None)
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn set(&self, region: &str, key: &str, value: serde_json::Value, ttl: Option<Duration>) {
        match &*self.region(region) {
            Region::Ttl { default_ttl, data } => {
                let expires_at = ttl.or(*default_ttl).map(|d| Instant::now() + d);
                data.insert(key.to_owned(), Entry { value, expires_at });
            }
            Region::Lru(cache) => cache.insert(key.to_owned(), value),
        }
    }

    async fn get(&self, region: &str, key: &str) -> Option<serde_json::Value> {
        match &*self.region(region) {
            Region::Ttl { data, .. } => {
                // Lazy eviction: drop the entry once its deadline passed.
                if let Some(entry) = data.get(key) {
                    if entry.is_expired() {
                        drop(entry);
                        data.remove(key);
                        return None;
                    }
                    return Some(entry.value.clone());
                }
                None
            }
            Region::Lru(cache) => cache.get(key),
        }
    }

    async fn exists(&self, region: &str, key: &str) -> bool {
        self.get(region, key).await.is_some()
    }

    async fn delete(&self, region: &str, key: &str) {
        match &*self.region(region) {
            Region::Ttl { data, .. } => {
                data.remove(key);
            }
            Region::Lru(cache) => cache.invalidate(key),
        }
    }

    async fn clear(&self, region: &str) {
        match &*self.region(region) {
            Region::Ttl { data, .. } => data.clear(),
            Region::Lru(cache) => cache.invalidate_all(),
        }
    }

    async fn items(&self, region: &str) -> Vec<(String, serde_json::Value)> {
        match &*self.region(region) {
            Region::Ttl { data, .. } => data
                .iter()
                .filter(|entry| !entry.value().is_expired())
                .map(|entry| (entry.key().clone(), entry.value().value.clone()))
                .collect(),
            Region::Lru(cache) => cache
                .iter()
                .map(|(k, v)| (k.as_ref().clone(), v))
                .collect(),
        }
    }

    async fn close(&self) {
        self.regions.clear();
    }
}

#[cfg(test)]
mod tests {
    use fluxgate_cache::testing::run_cache_conformance_tests;

    use super::*;

    #[tokio::test]
    async fn conformance() {
        let cache = MemoryCache::default();
        run_cache_conformance_tests(&cache).await;
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_expiry_via_get() {
        let cache = MemoryCache::default();
        cache
            .set(
                "DEFAULT",
                "short-lived",
                serde_json::json!(1),
                Some(Duration::from_secs(5)),
            )
            .await;

        assert!(cache.get("DEFAULT", "short-lived").await.is_some());

        tokio::time::advance(Duration::from_secs(6)).await;

        assert!(
            cache.get("DEFAULT", "short-lived").await.is_none(),
            "value should be expired"
        );
        assert!(!cache.exists("DEFAULT", "short-lived").await);
    }

    #[tokio::test(start_paused = true)]
    async fn region_default_ttl_applies() {
        let mut policies = HashMap::new();
        policies.insert(
            "short".to_owned(),
            RegionPolicy::Ttl {
                default_ttl: Some(Duration::from_secs(2)),
            },
        );
        let cache = MemoryCache::new(policies, RegionPolicy::Ttl { default_ttl: None });

        cache.set("short", "k", serde_json::json!("v"), None).await;
        cache.set("DEFAULT", "k", serde_json::json!("v"), None).await;

        tokio::time::advance(Duration::from_secs(3)).await;

        assert!(cache.get("short", "k").await.is_none());
        assert!(cache.get("DEFAULT", "k").await.is_some(), "no-TTL region keeps values");
    }

    #[tokio::test(start_paused = true)]
    async fn per_entry_ttl_overrides_region_default() {
        let mut policies = HashMap::new();
        policies.insert(
            "r".to_owned(),
            RegionPolicy::Ttl {
                default_ttl: Some(Duration::from_secs(100)),
            },
        );
        let cache = MemoryCache::new(policies, RegionPolicy::Ttl { default_ttl: None });

        cache
            .set("r", "k", serde_json::json!(1), Some(Duration::from_secs(1)))
            .await;
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("r", "k").await.is_none());
    }

    #[tokio::test]
    async fn ttl_items_skip_expired() {
        let cache = MemoryCache::default();
        cache.set("r", "live", serde_json::json!(1), None).await;
        cache
            .set("r", "dead", serde_json::json!(2), Some(Duration::ZERO))
            .await;

        let items = cache.items("r").await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].0, "live");
    }

    #[tokio::test]
    async fn lru_region_bounds_size() {
        let mut policies = HashMap::new();
        policies.insert("bounded".to_owned(), RegionPolicy::Lru { max_entries: 4 });
        let cache = MemoryCache::new(policies, RegionPolicy::Ttl { default_ttl: None });

        for i in 0..32 {
            cache
                .set("bounded", &format!("k{i}"), serde_json::json!(i), None)
                .await;
        }
        cache.maintain("bounded");
        let items = cache.items("bounded").await;
        assert!(
            items.len() <= 4,
            "bounded region held {} entries",
            items.len()
        );
        cache.clear("bounded").await;
        assert!(cache.items("bounded").await.is_empty());
    }
}
