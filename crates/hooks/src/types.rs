use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use fluxgate_core::Flow;
use fluxgate_rules::RuleNode;
use serde::{Deserialize, Serialize};

use crate::error::HookError;

/// The five per-flow callback points the proxy engine exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookEvent {
    RequestHeaders,
    Request,
    ResponseHeaders,
    Response,
    Error,
}

impl HookEvent {
    pub const ALL: [Self; 5] = [
        Self::RequestHeaders,
        Self::Request,
        Self::ResponseHeaders,
        Self::Response,
        Self::Error,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RequestHeaders => "requestheaders",
            Self::Request => "request",
            Self::ResponseHeaders => "responseheaders",
            Self::Response => "response",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for HookEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What dispatch does when a hook carries a rule the flow does not match.
///
/// The historical behavior is to abort the remainder of the chain, not to
/// skip the one hook; deployments whose documentation promises skip
/// semantics can construct their chains with `Skip` instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MismatchPolicy {
    /// Stop dispatching this event's chain at the first non-matching hook.
    #[default]
    Abort,
    /// Skip the non-matching hook and continue down the chain.
    Skip,
}

/// Live enabled-state probe, re-checked on every invocation so an addon's
/// current run-state is respected without re-registration.
pub type EnabledFn = Arc<dyn Fn() -> bool + Send + Sync>;

/// An `EnabledFn` that is always on, for hooks without an owning addon
/// state.
#[must_use]
pub fn always_enabled() -> EnabledFn {
    Arc::new(|| true)
}

/// Synchronous hook function.
pub type HookFn = Arc<dyn Fn(&mut Flow) -> Result<(), HookError> + Send + Sync>;

/// Suspension-capable hook function; the future borrows the flow for the
/// duration of the call.
pub type AsyncHookFn = Arc<
    dyn for<'a> Fn(&'a mut Flow) -> Pin<Box<dyn Future<Output = Result<(), HookError>> + Send + 'a>>
        + Send
        + Sync,
>;

/// Wrap a synchronous closure into a [`HookFn`].
pub fn sync_hook<F>(f: F) -> HookFn
where
    F: Fn(&mut Flow) -> Result<(), HookError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap a boxed-future closure into an [`AsyncHookFn`].
pub fn async_hook<F>(f: F) -> AsyncHookFn
where
    F: for<'a> Fn(&'a mut Flow) -> Pin<Box<dyn Future<Output = Result<(), HookError>> + Send + 'a>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

/// A registered hook. `id` is the owning addon id and is the handle used for
/// bulk removal on addon unload.
#[derive(Clone)]
pub struct Hook<F> {
    pub id: String,
    /// `None` matches every flow.
    pub rule: Option<RuleNode>,
    pub priority: i32,
    /// Stop dispatching further hooks of this event after this one ran.
    pub ignore_rest: bool,
    pub func: F,
    pub enabled: EnabledFn,
}

impl<F> Hook<F> {
    pub fn new(id: impl Into<String>, func: F) -> Self {
        Self {
            id: id.into(),
            rule: None,
            priority: 0,
            ignore_rest: false,
            func,
            enabled: always_enabled(),
        }
    }

    #[must_use]
    pub fn with_rule(mut self, rule: Option<RuleNode>) -> Self {
        self.rule = rule;
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_ignore_rest(mut self, ignore_rest: bool) -> Self {
        self.ignore_rest = ignore_rest;
        self
    }

    #[must_use]
    pub fn with_enabled(mut self, enabled: EnabledFn) -> Self {
        self.enabled = enabled;
        self
    }
}

impl<F> std::fmt::Debug for Hook<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hook")
            .field("id", &self.id)
            .field("rule", &self.rule.as_ref().map(ToString::to_string))
            .field("priority", &self.priority)
            .field("ignore_rest", &self.ignore_rest)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_wire_names() {
        assert_eq!(HookEvent::RequestHeaders.as_str(), "requestheaders");
        assert_eq!(HookEvent::Error.as_str(), "error");
        assert_eq!(HookEvent::ALL.len(), 5);
    }

    #[test]
    fn default_policy_aborts() {
        assert_eq!(MismatchPolicy::default(), MismatchPolicy::Abort);
    }
}
