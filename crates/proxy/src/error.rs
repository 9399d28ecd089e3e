use thiserror::Error;

/// Errors surfaced by the proxy master and engine boundary.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// `start` was called while the proxy is already running.
    #[error("proxy is already running")]
    AlreadyRunning,

    /// The engine failed to start or crashed while serving.
    #[error("proxy engine error: {0}")]
    Engine(String),
}
