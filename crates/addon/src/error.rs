use thiserror::Error;

/// Errors raised during addon lifecycle operations.
#[derive(Debug, Error)]
pub enum AddonError {
    #[error("addon init error: {0}")]
    Init(String),

    #[error("unknown addon: {0}")]
    Unknown(String),

    #[error("{0}")]
    Other(String),
}

impl From<String> for AddonError {
    fn from(msg: String) -> Self {
        Self::Other(msg)
    }
}

impl From<&str> for AddonError {
    fn from(msg: &str) -> Self {
        Self::Other(msg.to_owned())
    }
}
