use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::event::{BroadcastEvent, ChainEvent};

/// Error type subscribers report; the dispatcher isolates it, logs it, and
/// turns it into a `SystemError` broadcast.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Identity of a subscriber: the owning type's path plus the method name.
///
/// Disabling the owner disables every one of its handlers at once; disabling
/// the full identity targets a single handler. Both survive re-registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandlerId {
    owner: String,
    method: String,
}

impl HandlerId {
    #[must_use]
    pub fn new(owner: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            method: method.into(),
        }
    }

    /// Identity derived from a concrete owner type, mirroring module path +
    /// qualified name.
    #[must_use]
    pub fn of<T: ?Sized>(method: impl Into<String>) -> Self {
        Self {
            owner: std::any::type_name::<T>().to_owned(),
            method: method.into(),
        }
    }

    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }
}

impl std::fmt::Display for HandlerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.owner, self.method)
    }
}

/// A broadcast subscriber body. Sync handlers run on the blocking pool, async
/// handlers on the runtime.
#[derive(Clone)]
pub enum BroadcastHandler {
    Sync(Arc<dyn Fn(BroadcastEvent) -> Result<(), HandlerError> + Send + Sync>),
    Async(
        Arc<
            dyn Fn(BroadcastEvent) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send>>
                + Send
                + Sync,
        >,
    ),
}

/// A chain subscriber body. Receives the event by mutable reference so it can
/// transform the payload for downstream subscribers.
#[derive(Clone)]
pub enum ChainHandler {
    Sync(Arc<dyn Fn(&mut ChainEvent) -> Result<(), HandlerError> + Send + Sync>),
    Async(
        Arc<
            dyn for<'a> Fn(
                    &'a mut ChainEvent,
                ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + 'a>>
                + Send
                + Sync,
        >,
    ),
}

/// Wrap a synchronous closure into a [`BroadcastHandler`].
pub fn broadcast_handler<F>(f: F) -> BroadcastHandler
where
    F: Fn(BroadcastEvent) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    BroadcastHandler::Sync(Arc::new(f))
}

/// Wrap an async closure into a [`BroadcastHandler`].
pub fn broadcast_handler_async<F, Fut>(f: F) -> BroadcastHandler
where
    F: Fn(BroadcastEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    BroadcastHandler::Async(Arc::new(move |event| Box::pin(f(event))))
}

/// Wrap a synchronous closure into a [`ChainHandler`].
pub fn chain_handler<F>(f: F) -> ChainHandler
where
    F: Fn(&mut ChainEvent) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    ChainHandler::Sync(Arc::new(f))
}

/// Wrap an async closure into a [`ChainHandler`].
pub fn chain_handler_async<F>(f: F) -> ChainHandler
where
    F: for<'a> Fn(
            &'a mut ChainEvent,
        ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + 'a>>
        + Send
        + Sync
        + 'static,
{
    ChainHandler::Async(Arc::new(f))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SomeAddon;

    #[test]
    fn identity_from_type() {
        let id = HandlerId::of::<SomeAddon>("on_config_changed");
        assert!(id.owner().ends_with("SomeAddon"));
        assert_eq!(id.method(), "on_config_changed");
        assert!(id.to_string().ends_with("SomeAddon.on_config_changed"));
    }

    #[test]
    fn identities_compare_by_owner_and_method() {
        let a = HandlerId::new("mod::Addon", "handle");
        let b = HandlerId::new("mod::Addon", "handle");
        let c = HandlerId::new("mod::Addon", "other");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
