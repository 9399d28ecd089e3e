use thiserror::Error;

/// Failure reported by a hook function. Dispatch logs it with the owning
/// addon id and event; it never aborts the chain or reaches the proxy
/// engine.
#[derive(Debug, Error)]
pub enum HookError {
    #[error("{0}")]
    Failed(String),
}

impl From<String> for HookError {
    fn from(msg: String) -> Self {
        Self::Failed(msg)
    }
}

impl From<&str> for HookError {
    fn from(msg: &str) -> Self {
        Self::Failed(msg.to_owned())
    }
}
