//! Memoization over a cache backend, with a scoped "fresh" bypass.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::backend::CacheBackend;

tokio::task_local! {
    static FRESH: bool;
}

/// Run `fut` with the fresh flag set: cached callers inside the scope bypass
/// the cache read but still write the freshly computed result. Used by
/// force-refresh code paths.
pub async fn fresh<F: Future>(fut: F) -> F::Output {
    FRESH.scope(true, fut).await
}

/// Whether the current task is inside a [`fresh`] scope.
#[must_use]
pub fn is_fresh() -> bool {
    FRESH.try_with(|v| *v).unwrap_or(false)
}

/// Build a memoization key from the call site identity and its arguments,
/// ignoring any receiver. Conventionally the first part is the function
/// path and the rest are the bound argument values.
#[must_use]
pub fn memo_key(parts: &[&str]) -> String {
    parts.join(":")
}

/// Compute-through cache: return the cached value for `key` when present,
/// otherwise run `compute`, store its result, and return it.
///
/// Inside a [`fresh`] scope the cached value is ignored but the new result is
/// still written. With `skip_empty`, null and empty results are returned
/// without being cached, so transient misses are retried next call.
pub async fn remember<T, F, Fut>(
    cache: &dyn CacheBackend,
    region: &str,
    key: &str,
    ttl: Option<Duration>,
    skip_empty: bool,
    compute: F,
) -> T
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    if !is_fresh() {
        if let Some(raw) = cache.get(region, key).await
            && let Ok(value) = serde_json::from_value::<T>(raw)
        {
            return value;
        }
    }

    let value = compute().await;

    match serde_json::to_value(&value) {
        Ok(raw) => {
            if !(skip_empty && is_empty_value(&raw)) {
                cache.set(region, key, raw, ttl).await;
            }
        }
        Err(err) => {
            tracing::warn!(region, key, error = %err, "computed value is not cacheable");
        }
    }

    value
}

fn is_empty_value(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => true,
        serde_json::Value::String(s) => s.is_empty(),
        serde_json::Value::Array(a) => a.is_empty(),
        serde_json::Value::Object(o) => o.is_empty(),
        _ => false,
    }
}
