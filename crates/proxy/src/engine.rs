use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::ProxyError;
use crate::handler::HandlerRegistry;
use crate::options::ProxyOptions;

/// The MITM proxy engine boundary.
///
/// The core does not implement the proxy protocol; an engine accepts
/// connections, classifies them into flows, and drives each flow's
/// lifecycle through `handlers.dispatch(...)` — request phase before
/// forwarding, response phase after receiving, the error event on
/// connection failure. `run` returns when `shutdown` is cancelled or the
/// engine fails.
#[async_trait]
pub trait ProxyEngine: Send + Sync {
    async fn run(
        &self,
        options: ProxyOptions,
        handlers: Arc<HandlerRegistry>,
        shutdown: CancellationToken,
    ) -> Result<(), ProxyError>;
}
