use thiserror::Error;

/// Errors raised while constructing or operating a cache backend.
///
/// Runtime read/write failures on external backends are demoted to warnings
/// inside the backend (callers see defaults, not errors); this type surfaces
/// only where the caller can act on it, such as backend construction.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache connection error: {0}")]
    Connection(String),

    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("cache serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
