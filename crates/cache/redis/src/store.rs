use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;
use tracing::warn;

use fluxgate_cache::{CacheBackend, CacheError};

use crate::config::RedisCacheConfig;

/// Redis-backed [`CacheBackend`].
///
/// Runtime failures never propagate: reads demote to cache misses and writes
/// to warnings, so a flaky Redis cannot take a caller down.
pub struct RedisCache {
    pool: Pool,
    prefix: String,
    default_ttl: Option<Duration>,
}

impl RedisCache {
    /// Create a new `RedisCache` from the provided configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Connection`] if the pool cannot be created.
    pub fn new(config: &RedisCacheConfig) -> Result<Self, CacheError> {
        let cfg = Config::from_url(&config.url);
        let pool = cfg
            .builder()
            .map(|b| {
                b.max_size(config.pool_size)
                    .wait_timeout(Some(config.connection_timeout))
                    .runtime(Runtime::Tokio1)
                    .build()
            })
            .map_err(|e| CacheError::Connection(e.to_string()))?
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        Ok(Self {
            pool,
            prefix: config.prefix.clone(),
            default_ttl: config.default_ttl,
        })
    }

    /// Render the full Redis key: `{prefix}:{region}:{key}`.
    fn render_key(&self, region: &str, key: &str) -> String {
        format!("{}:{}:{}", self.prefix, region, key)
    }

    /// Pattern covering every key of a region.
    fn region_pattern(&self, region: &str) -> String {
        format!("{}:{}:*", self.prefix, region)
    }

    async fn conn(&self) -> Option<deadpool_redis::Connection> {
        match self.pool.get().await {
            Ok(conn) => Some(conn),
            Err(e) => {
                warn!(error = %e, "redis cache connection unavailable");
                None
            }
        }
    }

    /// Collect every key of a region with a cursor scan.
    async fn scan_region_keys(&self, region: &str) -> Vec<String> {
        let Some(mut conn) = self.conn().await else {
            return Vec::new();
        };
        let pattern = self.region_pattern(region);
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let reply: Result<(u64, Vec<String>), _> = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await;
            match reply {
                Ok((next, batch)) => {
                    keys.extend(batch);
                    if next == 0 {
                        break;
                    }
                    cursor = next;
                }
                Err(e) => {
                    warn!(region, error = %e, "redis cache scan failed");
                    break;
                }
            }
        }
        keys
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn set(&self, region: &str, key: &str, value: serde_json::Value, ttl: Option<Duration>) {
        let Some(mut conn) = self.conn().await else {
            return;
        };
        let redis_key = self.render_key(region, key);
        let payload = value.to_string();

        let result: Result<(), _> = match ttl.or(self.default_ttl) {
            Some(d) if !d.is_zero() => {
                let ms = u64::try_from(d.as_millis()).unwrap_or(u64::MAX);
                conn.pset_ex(&redis_key, payload, ms).await
            }
            _ => conn.set(&redis_key, payload).await,
        };
        if let Err(e) = result {
            warn!(region, key, error = %e, "redis cache set failed");
        }
    }

    async fn get(&self, region: &str, key: &str) -> Option<serde_json::Value> {
        let mut conn = self.conn().await?;
        let redis_key = self.render_key(region, key);

        let raw: Option<String> = match conn.get(&redis_key).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(region, key, error = %e, "redis cache get failed");
                return None;
            }
        };
        let raw = raw?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(region, key, error = %e, "redis cache entry is not valid JSON");
                None
            }
        }
    }

    async fn exists(&self, region: &str, key: &str) -> bool {
        let Some(mut conn) = self.conn().await else {
            return false;
        };
        let redis_key = self.render_key(region, key);
        match conn.exists(&redis_key).await {
            Ok(exists) => exists,
            Err(e) => {
                warn!(region, key, error = %e, "redis cache exists failed");
                false
            }
        }
    }

    async fn delete(&self, region: &str, key: &str) {
        let Some(mut conn) = self.conn().await else {
            return;
        };
        let redis_key = self.render_key(region, key);
        if let Err(e) = conn.del::<_, ()>(&redis_key).await {
            warn!(region, key, error = %e, "redis cache delete failed");
        }
    }

    async fn clear(&self, region: &str) {
        let keys = self.scan_region_keys(region).await;
        if keys.is_empty() {
            return;
        }
        let Some(mut conn) = self.conn().await else {
            return;
        };
        for batch in keys.chunks(100) {
            if let Err(e) = conn.del::<_, ()>(batch).await {
                warn!(region, error = %e, "redis cache clear failed");
                return;
            }
        }
    }

    async fn items(&self, region: &str) -> Vec<(String, serde_json::Value)> {
        let keys = self.scan_region_keys(region).await;
        if keys.is_empty() {
            return Vec::new();
        }
        let Some(mut conn) = self.conn().await else {
            return Vec::new();
        };

        let values: Vec<Option<String>> = match redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await
        {
            Ok(values) => values,
            Err(e) => {
                warn!(region, error = %e, "redis cache items failed");
                return Vec::new();
            }
        };

        let strip = format!("{}:{}:", self.prefix, region);
        keys.into_iter()
            .zip(values)
            .filter_map(|(full_key, raw)| {
                let raw = raw?;
                let value = serde_json::from_str(&raw).ok()?;
                let key = full_key.strip_prefix(&strip)?.to_owned();
                Some((key, value))
            })
            .collect()
    }

    async fn close(&self) {
        self.pool.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> RedisCache {
        RedisCache::new(&RedisCacheConfig::default()).expect("pool construction is offline")
    }

    #[test]
    fn key_rendering() {
        let cache = cache();
        assert_eq!(
            cache.render_key("addon_data", "WallpaperAddon"),
            "fluxgate:addon_data:WallpaperAddon"
        );
        assert_eq!(cache.region_pattern("addon_data"), "fluxgate:addon_data:*");
    }

    // Live-server conformance; run against a local Redis:
    //   REDIS_CACHE_TEST_URL=redis://127.0.0.1:6379 cargo test -- --ignored
    #[tokio::test]
    #[ignore = "requires a running Redis instance"]
    async fn conformance_against_live_redis() {
        let url = std::env::var("REDIS_CACHE_TEST_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_owned());
        let cache = RedisCache::new(&RedisCacheConfig {
            url,
            prefix: format!("fluxgate-test-{}", std::process::id()),
            ..RedisCacheConfig::default()
        })
        .unwrap();

        fluxgate_cache::testing::run_cache_conformance_tests(&cache).await;

        cache.clear("DEFAULT").await;
        cache.clear("snap").await;
        cache.close().await;
    }
}
