use thiserror::Error;

/// Errors raised by module initialization and dispatched module methods.
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("module init error: {0}")]
    Init(String),

    #[error("{0}")]
    Execution(String),
}

impl From<String> for ModuleError {
    fn from(msg: String) -> Self {
        Self::Execution(msg)
    }
}

impl From<&str> for ModuleError {
    fn from(msg: &str) -> Self {
        Self::Execution(msg.to_owned())
    }
}
