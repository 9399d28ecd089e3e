use std::time::Duration;

use async_trait::async_trait;

/// Region used when the caller does not name one.
pub const DEFAULT_REGION: &str = "DEFAULT";

/// A key/value cache partitioned into named regions.
///
/// Implementations must be `Send + Sync` and safe for concurrent access.
/// Read-side failures on external backends are demoted to warnings and
/// reported as cache misses; a flaky cache must never take a caller down.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Insert a value. `ttl` overrides the region's default expiry where the
    /// backend supports per-entry lifetimes.
    async fn set(&self, region: &str, key: &str, value: serde_json::Value, ttl: Option<Duration>);

    /// Fetch a value. Returns `None` when missing, expired, or on backend
    /// failure.
    async fn get(&self, region: &str, key: &str) -> Option<serde_json::Value>;

    /// Whether a live entry exists for the key.
    async fn exists(&self, region: &str, key: &str) -> bool;

    /// Remove a single entry.
    async fn delete(&self, region: &str, key: &str);

    /// Remove every entry in the region.
    async fn clear(&self, region: &str);

    /// Snapshot of the region's live entries. The snapshot tolerates
    /// concurrent modification: it reflects some consistent point in time and
    /// is safe to iterate while writers proceed.
    async fn items(&self, region: &str) -> Vec<(String, serde_json::Value)>;

    /// Release backend resources. Further calls after `close` are undefined
    /// but must not panic.
    async fn close(&self);
}
