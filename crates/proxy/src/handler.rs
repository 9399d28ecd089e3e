use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use fluxgate_core::Flow;
use fluxgate_hooks::{AsyncHookChain, HookChain, HookEvent};

/// Per-flow callback surface the engine drives. Any method may be left at
/// its default no-op.
#[async_trait]
pub trait FlowHandler: Send + Sync {
    /// Stable name used for runtime detachment.
    fn name(&self) -> &str;

    async fn requestheaders(&self, flow: &mut Flow) {
        let _ = flow;
    }

    async fn request(&self, flow: &mut Flow) {
        let _ = flow;
    }

    async fn responseheaders(&self, flow: &mut Flow) {
        let _ = flow;
    }

    async fn response(&self, flow: &mut Flow) {
        let _ = flow;
    }

    async fn error(&self, flow: &mut Flow) {
        let _ = flow;
    }
}

/// Handlers currently attached to the running proxy, in registration order.
/// Shared between the master (which mutates it) and the engine (which
/// dispatches through it).
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Mutex<Vec<Arc<dyn FlowHandler>>>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, handler: Arc<dyn FlowHandler>) {
        self.handlers
            .lock()
            .expect("handler registry poisoned")
            .push(handler);
    }

    pub fn remove(&self, name: &str) {
        self.handlers
            .lock()
            .expect("handler registry poisoned")
            .retain(|h| h.name() != name);
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.handlers
            .lock()
            .expect("handler registry poisoned")
            .iter()
            .map(|h| h.name().to_owned())
            .collect()
    }

    fn snapshot(&self) -> Vec<Arc<dyn FlowHandler>> {
        self.handlers
            .lock()
            .expect("handler registry poisoned")
            .clone()
    }

    /// Drive one flow callback through every attached handler in order.
    pub async fn dispatch(&self, event: HookEvent, flow: &mut Flow) {
        for handler in self.snapshot() {
            match event {
                HookEvent::RequestHeaders => handler.requestheaders(flow).await,
                HookEvent::Request => handler.request(flow).await,
                HookEvent::ResponseHeaders => handler.responseheaders(flow).await,
                HookEvent::Response => handler.response(flow).await,
                HookEvent::Error => handler.error(flow).await,
            }
        }
    }
}

/// Adapter registering the synchronous hook chain as a proxy handler. The
/// chain blocks, so dispatch steps off the async runtime for its duration.
pub struct SyncChainHandler {
    chain: Arc<HookChain>,
}

impl SyncChainHandler {
    #[must_use]
    pub fn new(chain: Arc<HookChain>) -> Self {
        Self { chain }
    }
}

#[async_trait]
impl FlowHandler for SyncChainHandler {
    fn name(&self) -> &str {
        "hook-chain"
    }

    async fn requestheaders(&self, flow: &mut Flow) {
        tokio::task::block_in_place(|| self.chain.request_headers(flow));
    }

    async fn request(&self, flow: &mut Flow) {
        tokio::task::block_in_place(|| self.chain.request(flow));
    }

    async fn responseheaders(&self, flow: &mut Flow) {
        tokio::task::block_in_place(|| self.chain.response_headers(flow));
    }

    async fn response(&self, flow: &mut Flow) {
        tokio::task::block_in_place(|| self.chain.response(flow));
    }

    async fn error(&self, flow: &mut Flow) {
        tokio::task::block_in_place(|| self.chain.error(flow));
    }
}

/// Adapter registering the asynchronous hook chain as a proxy handler.
pub struct AsyncChainHandler {
    chain: Arc<AsyncHookChain>,
}

impl AsyncChainHandler {
    #[must_use]
    pub fn new(chain: Arc<AsyncHookChain>) -> Self {
        Self { chain }
    }
}

#[async_trait]
impl FlowHandler for AsyncChainHandler {
    fn name(&self) -> &str {
        "async-hook-chain"
    }

    async fn requestheaders(&self, flow: &mut Flow) {
        self.chain.request_headers(flow).await;
    }

    async fn request(&self, flow: &mut Flow) {
        self.chain.request(flow).await;
    }

    async fn responseheaders(&self, flow: &mut Flow) {
        self.chain.response_headers(flow).await;
    }

    async fn response(&self, flow: &mut Flow) {
        self.chain.response(flow).await;
    }

    async fn error(&self, flow: &mut Flow) {
        self.chain.error(flow).await;
    }
}
