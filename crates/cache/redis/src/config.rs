use std::time::Duration;

use serde::Deserialize;

/// Configuration for the Redis cache backend.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisCacheConfig {
    /// Redis connection URL (e.g. `redis://127.0.0.1:6379`). Use the
    /// `rediss://` scheme for TLS connections.
    #[serde(default = "default_url")]
    pub url: String,

    /// Key prefix applied to every cache key to avoid collisions with other
    /// users of the same server.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Number of connections in the `deadpool-redis` pool.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Timeout for acquiring a pooled connection.
    #[serde(default = "default_connection_timeout", with = "serde_secs")]
    pub connection_timeout: Duration,

    /// Default per-entry lifetime, applied when a write carries no TTL of its
    /// own. `None` stores without expiry.
    #[serde(default, with = "serde_opt_secs")]
    pub default_ttl: Option<Duration>,
}

fn default_url() -> String {
    String::from("redis://127.0.0.1:6379")
}

fn default_prefix() -> String {
    String::from("fluxgate")
}

fn default_pool_size() -> usize {
    10
}

fn default_connection_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for RedisCacheConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            prefix: default_prefix(),
            pool_size: default_pool_size(),
            connection_timeout: default_connection_timeout(),
            default_ttl: None,
        }
    }
}

mod serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

mod serde_opt_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
