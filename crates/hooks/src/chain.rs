use std::collections::HashMap;
use std::sync::RwLock;

use fluxgate_core::Flow;
use fluxgate_rules::matches;
use tracing::{debug, error};

use crate::types::{AsyncHookFn, Hook, HookEvent, HookFn, MismatchPolicy};

/// Hook storage shared by both chain flavors. Lists stay sorted by priority
/// descending; ties keep insertion order.
struct Registry<F> {
    hooks: HashMap<HookEvent, Vec<Hook<F>>>,
}

impl<F: Clone> Registry<F> {
    fn new() -> Self {
        let mut hooks = HashMap::new();
        for event in HookEvent::ALL {
            hooks.insert(event, Vec::new());
        }
        Self { hooks }
    }

    /// Insert keeping the list sorted by priority descending; an equal
    /// priority lands after existing entries.
    fn add(&mut self, event: HookEvent, hook: Hook<F>) {
        let list = self.hooks.entry(event).or_default();
        let index = list
            .iter()
            .position(|existing| existing.priority < hook.priority)
            .unwrap_or(list.len());
        list.insert(index, hook);
    }

    /// Drop every hook owned by `owner_id`, for one event or all of them.
    fn remove_by_id(&mut self, owner_id: &str, event: Option<HookEvent>) {
        let events: Vec<HookEvent> = match event {
            Some(event) => vec![event],
            None => self.hooks.keys().copied().collect(),
        };
        for event in events {
            if let Some(list) = self.hooks.get_mut(&event) {
                list.retain(|hook| hook.id != owner_id);
            }
        }
    }

    fn len(&self, event: HookEvent) -> usize {
        self.hooks.get(&event).map_or(0, Vec::len)
    }

    fn owners(&self, event: HookEvent) -> Vec<String> {
        self.hooks
            .get(&event)
            .map(|list| list.iter().map(|h| h.id.clone()).collect())
            .unwrap_or_default()
    }

    fn snapshot(&self, event: HookEvent) -> Vec<Hook<F>> {
        self.hooks.get(&event).cloned().unwrap_or_default()
    }
}

/// Synchronous hook chain, invoked inline by the request-handler task.
pub struct HookChain {
    registry: RwLock<Registry<HookFn>>,
    policy: MismatchPolicy,
}

impl HookChain {
    #[must_use]
    pub fn new(policy: MismatchPolicy) -> Self {
        Self {
            registry: RwLock::new(Registry::new()),
            policy,
        }
    }

    /// Register a hook for an event.
    pub fn add(&self, event: HookEvent, hook: Hook<HookFn>) {
        debug!(addon = %hook.id, event = %event, priority = hook.priority, "hook registered");
        self.registry
            .write()
            .expect("hook registry poisoned")
            .add(event, hook);
    }

    /// Remove all hooks of an owner, across every event or a single one.
    pub fn remove_by_id(&self, owner_id: &str, event: Option<HookEvent>) {
        debug!(addon = owner_id, "hooks removed");
        self.registry
            .write()
            .expect("hook registry poisoned")
            .remove_by_id(owner_id, event);
    }

    /// Number of registered hooks for an event.
    #[must_use]
    pub fn len(&self, event: HookEvent) -> usize {
        self.registry.read().expect("hook registry poisoned").len(event)
    }

    #[must_use]
    pub fn is_empty(&self, event: HookEvent) -> bool {
        self.len(event) == 0
    }

    /// Owner ids in dispatch order, for inspection and tests.
    #[must_use]
    pub fn owners(&self, event: HookEvent) -> Vec<String> {
        self.registry
            .read()
            .expect("hook registry poisoned")
            .owners(event)
    }

    /// Walk the event's hooks in priority order.
    ///
    /// Per hook: skip when its addon is disabled; when it carries a rule the
    /// flow does not match, apply the mismatch policy (abort by default);
    /// invoke the function with errors logged and isolated; honor
    /// `ignore_rest`.
    pub fn dispatch(&self, event: HookEvent, flow: &mut Flow) {
        let hooks = {
            self.registry
                .read()
                .expect("hook registry poisoned")
                .snapshot(event)
        };
        for hook in hooks {
            if !(hook.enabled)() {
                continue;
            }
            if let Some(rule) = &hook.rule
                && !matches(rule, flow)
            {
                match self.policy {
                    MismatchPolicy::Abort => return,
                    MismatchPolicy::Skip => continue,
                }
            }
            if let Err(err) = (hook.func)(flow) {
                error!(addon = %hook.id, event = %event, error = %err, "error executing hook");
            }
            if hook.ignore_rest {
                break;
            }
        }
    }

    pub fn request(&self, flow: &mut Flow) {
        self.dispatch(HookEvent::Request, flow);
    }

    pub fn response(&self, flow: &mut Flow) {
        self.dispatch(HookEvent::Response, flow);
    }

    pub fn request_headers(&self, flow: &mut Flow) {
        self.dispatch(HookEvent::RequestHeaders, flow);
    }

    pub fn response_headers(&self, flow: &mut Flow) {
        self.dispatch(HookEvent::ResponseHeaders, flow);
    }

    pub fn error(&self, flow: &mut Flow) {
        self.dispatch(HookEvent::Error, flow);
    }
}

impl Default for HookChain {
    fn default() -> Self {
        Self::new(MismatchPolicy::default())
    }
}

/// Suspension-capable hook chain with the same dispatch semantics as
/// [`HookChain`].
pub struct AsyncHookChain {
    registry: RwLock<Registry<AsyncHookFn>>,
    policy: MismatchPolicy,
}

impl AsyncHookChain {
    #[must_use]
    pub fn new(policy: MismatchPolicy) -> Self {
        Self {
            registry: RwLock::new(Registry::new()),
            policy,
        }
    }

    /// Register a hook for an event.
    pub fn add(&self, event: HookEvent, hook: Hook<AsyncHookFn>) {
        debug!(addon = %hook.id, event = %event, priority = hook.priority, "hook registered");
        self.registry
            .write()
            .expect("hook registry poisoned")
            .add(event, hook);
    }

    /// Remove all hooks of an owner, across every event or a single one.
    pub fn remove_by_id(&self, owner_id: &str, event: Option<HookEvent>) {
        debug!(addon = owner_id, "hooks removed");
        self.registry
            .write()
            .expect("hook registry poisoned")
            .remove_by_id(owner_id, event);
    }

    /// Number of registered hooks for an event.
    #[must_use]
    pub fn len(&self, event: HookEvent) -> usize {
        self.registry.read().expect("hook registry poisoned").len(event)
    }

    #[must_use]
    pub fn is_empty(&self, event: HookEvent) -> bool {
        self.len(event) == 0
    }

    /// Owner ids in dispatch order, for inspection and tests.
    #[must_use]
    pub fn owners(&self, event: HookEvent) -> Vec<String> {
        self.registry
            .read()
            .expect("hook registry poisoned")
            .owners(event)
    }

    pub async fn dispatch(&self, event: HookEvent, flow: &mut Flow) {
        let hooks = {
            self.registry
                .read()
                .expect("hook registry poisoned")
                .snapshot(event)
        };
        for hook in hooks {
            if !(hook.enabled)() {
                continue;
            }
            if let Some(rule) = &hook.rule
                && !matches(rule, flow)
            {
                match self.policy {
                    MismatchPolicy::Abort => return,
                    MismatchPolicy::Skip => continue,
                }
            }
            if let Err(err) = (hook.func)(flow).await {
                error!(addon = %hook.id, event = %event, error = %err, "error executing hook");
            }
            if hook.ignore_rest {
                break;
            }
        }
    }

    pub async fn request(&self, flow: &mut Flow) {
        self.dispatch(HookEvent::Request, flow).await;
    }

    pub async fn response(&self, flow: &mut Flow) {
        self.dispatch(HookEvent::Response, flow).await;
    }

    pub async fn request_headers(&self, flow: &mut Flow) {
        self.dispatch(HookEvent::RequestHeaders, flow).await;
    }

    pub async fn response_headers(&self, flow: &mut Flow) {
        self.dispatch(HookEvent::ResponseHeaders, flow).await;
    }

    pub async fn error(&self, flow: &mut Flow) {
        self.dispatch(HookEvent::Error, flow).await;
    }
}

impl Default for AsyncHookChain {
    fn default() -> Self {
        Self::new(MismatchPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use fluxgate_rules::parse_rule_line;

    use super::*;
    use crate::types::{always_enabled, async_hook, sync_hook};

    type Log = Arc<std::sync::Mutex<Vec<String>>>;

    fn recording_hook(id: &str, log: &Log, priority: i32) -> Hook<HookFn> {
        let log = Arc::clone(log);
        let label = id.to_owned();
        Hook::new(
            id,
            sync_hook(move |_flow| {
                log.lock().unwrap().push(label.clone());
                Ok(())
            }),
        )
        .with_priority(priority)
    }

    fn condition(line: &str) -> Option<fluxgate_rules::RuleNode> {
        Some(parse_rule_line(&format!("{line},COMPATIBLE")).unwrap())
    }

    #[test]
    fn dispatch_order_is_priority_descending() {
        let chain = HookChain::default();
        let log: Log = Arc::default();

        // Registered 50, 100, 10; dispatch must run 100, 50, 10.
        chain.add(HookEvent::Request, recording_hook("p50", &log, 50));
        chain.add(HookEvent::Request, recording_hook("p100", &log, 100));
        chain.add(HookEvent::Request, recording_hook("p10", &log, 10));

        let mut flow = Flow::http("example.com");
        chain.request(&mut flow);

        assert_eq!(*log.lock().unwrap(), vec!["p100", "p50", "p10"]);
    }

    #[test]
    fn equal_priorities_keep_insertion_order() {
        let chain = HookChain::default();
        let log: Log = Arc::default();

        chain.add(HookEvent::Request, recording_hook("first", &log, 10));
        chain.add(HookEvent::Request, recording_hook("second", &log, 10));
        chain.add(HookEvent::Request, recording_hook("third", &log, 10));

        let mut flow = Flow::http("example.com");
        chain.request(&mut flow);

        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn ignore_rest_short_circuits() {
        let chain = HookChain::default();
        let log: Log = Arc::default();

        chain.add(
            HookEvent::Request,
            recording_hook("p100", &log, 100).with_ignore_rest(true),
        );
        chain.add(HookEvent::Request, recording_hook("p50", &log, 50));
        chain.add(HookEvent::Request, recording_hook("p10", &log, 10));

        let mut flow = Flow::http("example.com");
        chain.request(&mut flow);

        assert_eq!(*log.lock().unwrap(), vec!["p100"]);
    }

    #[test]
    fn non_matching_rule_aborts_chain() {
        let chain = HookChain::default();
        let log: Log = Arc::default();

        chain.add(
            HookEvent::Request,
            recording_hook("gated", &log, 100).with_rule(condition("DOMAIN,other.com")),
        );
        chain.add(HookEvent::Request, recording_hook("after", &log, 10));

        let mut flow = Flow::http("example.com");
        chain.request(&mut flow);

        // The non-matching hook aborts the rest of the chain.
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn skip_policy_continues_past_non_matching_rule() {
        let chain = HookChain::new(MismatchPolicy::Skip);
        let log: Log = Arc::default();

        chain.add(
            HookEvent::Request,
            recording_hook("gated", &log, 100).with_rule(condition("DOMAIN,other.com")),
        );
        chain.add(HookEvent::Request, recording_hook("after", &log, 10));

        let mut flow = Flow::http("example.com");
        chain.request(&mut flow);

        assert_eq!(*log.lock().unwrap(), vec!["after"]);
    }

    #[test]
    fn matching_rule_runs_hook() {
        let chain = HookChain::default();
        let log: Log = Arc::default();

        chain.add(
            HookEvent::Request,
            recording_hook("gated", &log, 100).with_rule(condition("DOMAIN-SUFFIX,example.com")),
        );
        chain.add(HookEvent::Request, recording_hook("after", &log, 10));

        let mut flow = Flow::http("api.example.com");
        chain.request(&mut flow);

        assert_eq!(*log.lock().unwrap(), vec!["gated", "after"]);
    }

    #[test]
    fn disabled_addon_state_skips_hook_live() {
        let chain = HookChain::default();
        let log: Log = Arc::default();
        let state = Arc::new(AtomicBool::new(false));

        let gate = Arc::clone(&state);
        chain.add(
            HookEvent::Request,
            recording_hook("toggled", &log, 100)
                .with_enabled(Arc::new(move || gate.load(Ordering::SeqCst))),
        );
        chain.add(HookEvent::Request, recording_hook("always", &log, 10));

        let mut flow = Flow::http("example.com");
        chain.request(&mut flow);
        assert_eq!(*log.lock().unwrap(), vec!["always"]);

        // Flipping the addon state re-enables the hook with no
        // re-registration.
        state.store(true, Ordering::SeqCst);
        log.lock().unwrap().clear();
        chain.request(&mut flow);
        assert_eq!(*log.lock().unwrap(), vec!["toggled", "always"]);
    }

    #[test]
    fn hook_error_does_not_abort_chain() {
        let chain = HookChain::default();
        let log: Log = Arc::default();

        chain.add(
            HookEvent::Request,
            Hook::new("broken", sync_hook(|_flow| Err("hook exploded".into())))
                .with_priority(100),
        );
        chain.add(HookEvent::Request, recording_hook("after", &log, 10));

        let mut flow = Flow::http("example.com");
        chain.request(&mut flow);

        assert_eq!(*log.lock().unwrap(), vec!["after"]);
    }

    #[test]
    fn remove_by_id_leaves_other_owners_ordered() {
        let chain = HookChain::default();
        let log: Log = Arc::default();

        chain.add(HookEvent::Request, recording_hook("keep-a", &log, 100));
        chain.add(HookEvent::Request, recording_hook("drop", &log, 50));
        chain.add(HookEvent::Response, recording_hook("drop", &log, 50));
        chain.add(HookEvent::Request, recording_hook("keep-b", &log, 10));

        chain.remove_by_id("drop", None);

        assert_eq!(chain.owners(HookEvent::Request), vec!["keep-a", "keep-b"]);
        assert!(chain.is_empty(HookEvent::Response));

        let mut flow = Flow::http("example.com");
        chain.request(&mut flow);
        assert_eq!(*log.lock().unwrap(), vec!["keep-a", "keep-b"]);
    }

    #[test]
    fn hooks_mutate_the_flow() {
        let chain = HookChain::default();
        chain.add(
            HookEvent::Request,
            Hook::new(
                "mutator",
                sync_hook(|flow| {
                    flow.request.set_header("x-intercepted", "1");
                    Ok(())
                }),
            ),
        );

        let mut flow = Flow::http("example.com");
        chain.request(&mut flow);
        assert_eq!(flow.request.header("x-intercepted"), Some("1"));
    }

    #[tokio::test]
    async fn async_chain_orders_and_short_circuits() {
        let chain = AsyncHookChain::default();
        let log: Log = Arc::default();

        let make = |id: &str, priority: i32, ignore_rest: bool| {
            let log = Arc::clone(&log);
            let label = id.to_owned();
            Hook::new(
                id,
                async_hook(move |_flow| {
                    let log = Arc::clone(&log);
                    let label = label.clone();
                    Box::pin(async move {
                        log.lock().unwrap().push(label);
                        Ok(())
                    })
                }),
            )
            .with_priority(priority)
            .with_ignore_rest(ignore_rest)
            .with_enabled(always_enabled())
        };

        chain.add(HookEvent::Response, make("p50", 50, false));
        chain.add(HookEvent::Response, make("p100", 100, true));
        chain.add(HookEvent::Response, make("p10", 10, false));

        let mut flow = Flow::http("example.com");
        chain.response(&mut flow).await;

        // Highest priority runs first; its ignore_rest stops the rest.
        assert_eq!(*log.lock().unwrap(), vec!["p100"]);
    }

    #[tokio::test]
    async fn async_chain_respects_rules() {
        let chain = AsyncHookChain::default();
        let ran = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&ran);
        chain.add(
            HookEvent::Request,
            Hook::new(
                "gated",
                async_hook(move |_flow| {
                    let flag = Arc::clone(&flag);
                    Box::pin(async move {
                        flag.store(true, Ordering::SeqCst);
                        Ok(())
                    })
                }),
            )
            .with_rule(condition("DOMAIN,example.com")),
        );

        let mut flow = Flow::http("example.com");
        chain.request(&mut flow).await;
        assert!(ran.load(Ordering::SeqCst));
    }
}
