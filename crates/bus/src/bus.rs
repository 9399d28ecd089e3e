use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use fluxgate_core::{
    BroadcastPayload, ChainEventType, ChainPayload, EventType, SystemErrorReport,
};

use crate::event::{BroadcastEvent, ChainEvent, DEFAULT_EVENT_PRIORITY};
use crate::handler::{BroadcastHandler, ChainHandler, HandlerError, HandlerId};

/// Initial consumer idle wait when the queue is empty.
const INITIAL_IDLE_WAIT: Duration = Duration::from_secs(1);
/// Ceiling for the idle wait.
const MAX_IDLE_WAIT: Duration = Duration::from_secs(5);
/// Idle wait growth factor.
const IDLE_BACKOFF_FACTOR: f64 = 2.0;
/// Random jitter applied on top of the idle wait.
const IDLE_JITTER_FACTOR: f64 = 0.1;

/// Event bus tuning knobs.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Number of broadcast consumer tasks.
    pub consumers: usize,
    /// Broadcast queue capacity; events beyond it are dropped with a warning.
    pub queue_capacity: usize,
    /// Upper bound on concurrently executing synchronous subscribers.
    pub sync_workers: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            consumers: 1,
            queue_capacity: 1024,
            sync_workers: 100,
        }
    }
}

#[derive(Clone)]
struct BroadcastSubscriber {
    id: HandlerId,
    handler: BroadcastHandler,
}

#[derive(Clone)]
struct ChainSubscriber {
    id: HandlerId,
    priority: i32,
    handler: ChainHandler,
}

/// Queue entry ordered by (priority, arrival); the heap holds `Reverse` so
/// the lowest priority value dequeues first, FIFO among equals.
struct QueuedEvent {
    priority: i32,
    seq: u64,
    event: BroadcastEvent,
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedEvent {}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.priority, self.seq).cmp(&(other.priority, other.seq))
    }
}

struct BusInner {
    config: BusConfig,
    broadcast: Mutex<HashMap<EventType, Vec<BroadcastSubscriber>>>,
    chain: Mutex<HashMap<ChainEventType, Vec<ChainSubscriber>>>,
    disabled_handlers: Mutex<HashSet<String>>,
    disabled_owners: Mutex<HashSet<String>>,
    queue: Mutex<BinaryHeap<Reverse<QueuedEvent>>>,
    seq: AtomicU64,
    queued: Notify,
    running: AtomicBool,
    consumers: Mutex<Vec<JoinHandle<()>>>,
    sync_permits: Arc<Semaphore>,
}

/// Manager for broadcast and chain events: subscription, dispatch, and
/// per-handler enable/disable. `Clone` shares the underlying bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl EventBus {
    #[must_use]
    pub fn new(config: BusConfig) -> Self {
        let sync_permits = Arc::new(Semaphore::new(config.sync_workers.max(1)));
        Self {
            inner: Arc::new(BusInner {
                config,
                broadcast: Mutex::new(HashMap::new()),
                chain: Mutex::new(HashMap::new()),
                disabled_handlers: Mutex::new(HashSet::new()),
                disabled_owners: Mutex::new(HashSet::new()),
                queue: Mutex::new(BinaryHeap::new()),
                seq: AtomicU64::new(0),
                queued: Notify::new(),
                running: AtomicBool::new(false),
                consumers: Mutex::new(Vec::new()),
                sync_permits,
            }),
        }
    }

    // ── Subscription ──────────────────────────────────────────────────────

    /// Register a broadcast subscriber. Re-registering the same identity
    /// replaces the previous handler.
    pub fn subscribe_broadcast(
        &self,
        event_type: EventType,
        id: HandlerId,
        handler: BroadcastHandler,
    ) {
        let mut table = self.inner.broadcast.lock().expect("bus lock poisoned");
        let subs = table.entry(event_type).or_default();
        if !subs.iter().any(|s| s.id == id) {
            debug!(event = %event_type, handler = %id, "subscribed to broadcast event");
        }
        subs.retain(|s| s.id != id);
        subs.push(BroadcastSubscriber { id, handler });
    }

    /// Register a chain subscriber at the given priority (lower runs first;
    /// ties keep insertion order). Re-registering the same identity replaces
    /// the previous handler.
    pub fn subscribe_chain(
        &self,
        event_type: ChainEventType,
        id: HandlerId,
        priority: i32,
        handler: ChainHandler,
    ) {
        let mut table = self.inner.chain.lock().expect("bus lock poisoned");
        let subs = table.entry(event_type).or_default();
        if !subs.iter().any(|s| s.id == id) {
            debug!(event = %event_type, handler = %id, priority, "subscribed to chain event");
        }
        subs.retain(|s| s.id != id);
        subs.push(ChainSubscriber {
            id,
            priority,
            handler,
        });
        subs.sort_by_key(|s| s.priority);
    }

    pub fn unsubscribe_broadcast(&self, event_type: EventType, id: &HandlerId) {
        let mut table = self.inner.broadcast.lock().expect("bus lock poisoned");
        if let Some(subs) = table.get_mut(&event_type) {
            subs.retain(|s| s.id != *id);
            debug!(event = %event_type, handler = %id, "unsubscribed from broadcast event");
        }
    }

    pub fn unsubscribe_chain(&self, event_type: ChainEventType, id: &HandlerId) {
        let mut table = self.inner.chain.lock().expect("bus lock poisoned");
        if let Some(subs) = table.get_mut(&event_type) {
            subs.retain(|s| s.id != *id);
            debug!(event = %event_type, handler = %id, "unsubscribed from chain event");
        }
    }

    // ── Enable / disable ──────────────────────────────────────────────────

    /// Disable a single handler without removing its registration.
    pub fn disable_handler(&self, id: &HandlerId) {
        self.inner
            .disabled_handlers
            .lock()
            .expect("bus lock poisoned")
            .insert(id.to_string());
        debug!(handler = %id, "disabled event handler");
    }

    pub fn enable_handler(&self, id: &HandlerId) {
        self.inner
            .disabled_handlers
            .lock()
            .expect("bus lock poisoned")
            .remove(&id.to_string());
        debug!(handler = %id, "enabled event handler");
    }

    /// Disable every handler registered by `owner`.
    pub fn disable_owner(&self, owner: &str) {
        self.inner
            .disabled_owners
            .lock()
            .expect("bus lock poisoned")
            .insert(owner.to_owned());
        debug!(owner, "disabled event handler owner");
    }

    pub fn enable_owner(&self, owner: &str) {
        self.inner
            .disabled_owners
            .lock()
            .expect("bus lock poisoned")
            .remove(owner);
        debug!(owner, "enabled event handler owner");
    }

    fn is_enabled(&self, id: &HandlerId) -> bool {
        let handlers = self
            .inner
            .disabled_handlers
            .lock()
            .expect("bus lock poisoned");
        if handlers.contains(&id.to_string()) {
            return false;
        }
        drop(handlers);
        !self
            .inner
            .disabled_owners
            .lock()
            .expect("bus lock poisoned")
            .contains(id.owner())
    }

    /// Whether any enabled subscriber exists for a broadcast event type.
    /// Producers use this to avoid building expensive payloads for dead
    /// events.
    #[must_use]
    pub fn check_broadcast(&self, event_type: EventType) -> bool {
        let table = self.inner.broadcast.lock().expect("bus lock poisoned");
        table
            .get(&event_type)
            .is_some_and(|subs| subs.iter().any(|s| self.is_enabled(&s.id)))
    }

    /// Whether any enabled subscriber exists for a chain event type.
    #[must_use]
    pub fn check_chain(&self, event_type: ChainEventType) -> bool {
        let table = self.inner.chain.lock().expect("bus lock poisoned");
        table
            .get(&event_type)
            .is_some_and(|subs| subs.iter().any(|s| self.is_enabled(&s.id)))
    }

    // ── Broadcast path ────────────────────────────────────────────────────

    /// Enqueue a broadcast event at the default priority.
    pub fn send(&self, event_type: EventType, data: BroadcastPayload) {
        self.send_with_priority(event_type, data, DEFAULT_EVENT_PRIORITY);
    }

    /// Enqueue a broadcast event. Lower priority values dispatch first; the
    /// event is dropped with a warning when the queue is full.
    pub fn send_with_priority(&self, event_type: EventType, data: BroadcastPayload, priority: i32) {
        let event = BroadcastEvent::new(event_type, data, priority);
        debug!(event = %event, "triggering broadcast event");

        let mut queue = self.inner.queue.lock().expect("bus lock poisoned");
        if queue.len() >= self.inner.config.queue_capacity {
            warn!(event = %event, "broadcast queue full, dropping event");
            return;
        }
        let seq = self.inner.seq.fetch_add(1, Ordering::Relaxed);
        queue.push(Reverse(QueuedEvent {
            priority,
            seq,
            event,
        }));
        drop(queue);
        self.inner.queued.notify_one();
    }

    /// Start the broadcast consumer tasks.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut handles = self.inner.consumers.lock().expect("bus lock poisoned");
        for _ in 0..self.inner.config.consumers.max(1) {
            let bus = self.clone();
            handles.push(tokio::spawn(async move { bus.consumer_loop().await }));
        }
    }

    /// Stop the consumer tasks and wait for them to finish. Queued events
    /// remain queued for a later `start`.
    pub async fn stop(&self) {
        tracing::info!("stopping event processing");
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.queued.notify_waiters();
        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self.inner.consumers.lock().expect("bus lock poisoned");
            guard.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
        tracing::info!("event processing stopped");
    }

    /// Consumer loop: drain the priority queue, idling with jittered
    /// exponential backoff while it is empty.
    async fn consumer_loop(&self) {
        let mut wait = INITIAL_IDLE_WAIT;
        while self.inner.running.load(Ordering::SeqCst) {
            let popped = {
                let mut queue = self.inner.queue.lock().expect("bus lock poisoned");
                queue.pop()
            };
            match popped {
                Some(Reverse(entry)) => {
                    wait = INITIAL_IDLE_WAIT;
                    self.dispatch_broadcast(entry.event).await;
                }
                None => {
                    let jitter = rand::thread_rng().gen_range(1.0..=1.0 + IDLE_JITTER_FACTOR);
                    let sleep = wait.mul_f64(jitter);
                    tokio::select! {
                        () = self.inner.queued.notified() => {
                            wait = INITIAL_IDLE_WAIT;
                        }
                        () = tokio::time::sleep(sleep) => {
                            wait = wait.mul_f64(IDLE_BACKOFF_FACTOR).min(MAX_IDLE_WAIT);
                        }
                    }
                }
            }
        }
    }

    /// Fan a broadcast event out to every enabled subscriber. Each receives
    /// its own clone; sync handlers run on the blocking pool behind the
    /// worker semaphore, async handlers on the runtime.
    async fn dispatch_broadcast(&self, event: BroadcastEvent) {
        let subs: Vec<BroadcastSubscriber> = {
            let table = self.inner.broadcast.lock().expect("bus lock poisoned");
            table.get(&event.kind).cloned().unwrap_or_default()
        };
        if subs.is_empty() {
            debug!(event = %event, "no handlers found for broadcast event");
            return;
        }

        for sub in subs {
            if !self.is_enabled(&sub.id) {
                debug!(handler = %sub.id, "handler is disabled, skipping execution");
                continue;
            }
            let isolated = event.clone();
            let bus = self.clone();
            match sub.handler {
                BroadcastHandler::Async(f) => {
                    tokio::spawn(async move {
                        let kind = isolated.kind;
                        if let Err(err) = f(isolated).await {
                            bus.handle_dispatch_error(&sub.id, kind.as_str(), &err);
                        }
                    });
                }
                BroadcastHandler::Sync(f) => {
                    let permit = self
                        .inner
                        .sync_permits
                        .clone()
                        .acquire_owned()
                        .await
                        .expect("bus semaphore closed");
                    tokio::spawn(async move {
                        let kind = isolated.kind;
                        let joined =
                            tokio::task::spawn_blocking(move || f(isolated)).await;
                        match joined {
                            Ok(Ok(())) => {}
                            Ok(Err(err)) => {
                                bus.handle_dispatch_error(&sub.id, kind.as_str(), &err);
                            }
                            Err(join_err) => {
                                error!(handler = %sub.id, error = %join_err, "broadcast handler panicked");
                            }
                        }
                        drop(permit);
                    });
                }
            }
        }
    }

    // ── Chain path ────────────────────────────────────────────────────────

    /// Dispatch a chain event, awaiting async subscribers and running sync
    /// subscribers on the blocking pool. Returns the folded event, or `None`
    /// when no enabled subscriber exists.
    pub async fn send_chain(
        &self,
        event_type: ChainEventType,
        data: ChainPayload,
    ) -> Option<ChainEvent> {
        self.send_chain_with_priority(event_type, data, DEFAULT_EVENT_PRIORITY)
            .await
    }

    pub async fn send_chain_with_priority(
        &self,
        event_type: ChainEventType,
        data: ChainPayload,
        priority: i32,
    ) -> Option<ChainEvent> {
        let subs = self.enabled_chain_subscribers(event_type)?;
        let mut event = ChainEvent::new(event_type, data, priority);
        debug!(event = %event, "triggering chain event");

        for sub in subs {
            match &sub.handler {
                ChainHandler::Async(f) => {
                    if let Err(err) = f(&mut event).await {
                        self.handle_dispatch_error(&sub.id, event_type.as_str(), &err);
                    }
                }
                ChainHandler::Sync(f) => {
                    // A copy folds on the blocking pool; it replaces the
                    // event only on success, so an erroring or panicking
                    // subscriber leaves the data unchanged for the next one.
                    let fallback = event.clone();
                    let f = Arc::clone(f);
                    let joined = tokio::task::spawn_blocking(move || {
                        let mut owned = fallback;
                        let result = f(&mut owned);
                        (owned, result)
                    })
                    .await;
                    match joined {
                        Ok((folded, Ok(()))) => event = folded,
                        Ok((_, Err(err))) => {
                            self.handle_dispatch_error(&sub.id, event_type.as_str(), &err);
                        }
                        Err(join_err) => {
                            error!(handler = %sub.id, error = %join_err, "chain handler panicked");
                        }
                    }
                }
            }
        }
        debug!(event = %event, "chain event completed");
        Some(event)
    }

    /// Synchronous chain dispatch for non-async call sites. Sync subscribers
    /// run inline; async subscribers cannot be awaited here and are skipped
    /// with a warning.
    pub fn send_chain_sync(
        &self,
        event_type: ChainEventType,
        data: ChainPayload,
    ) -> Option<ChainEvent> {
        let subs = self.enabled_chain_subscribers(event_type)?;
        let mut event = ChainEvent::new(event_type, data, DEFAULT_EVENT_PRIORITY);
        debug!(event = %event, "triggering synchronous chain event");

        for sub in subs {
            match &sub.handler {
                ChainHandler::Sync(f) => {
                    if let Err(err) = f(&mut event) {
                        self.handle_dispatch_error(&sub.id, event_type.as_str(), &err);
                    }
                }
                ChainHandler::Async(_) => {
                    warn!(
                        handler = %sub.id,
                        event = %event_type,
                        "async subscriber skipped on synchronous chain path"
                    );
                }
            }
        }
        Some(event)
    }

    fn enabled_chain_subscribers(&self, event_type: ChainEventType) -> Option<Vec<ChainSubscriber>> {
        let subs: Vec<ChainSubscriber> = {
            let table = self.inner.chain.lock().expect("bus lock poisoned");
            table.get(&event_type).cloned().unwrap_or_default()
        };
        if subs.is_empty() {
            debug!(event = %event_type, "no handlers found for chain event");
            return None;
        }
        let enabled: Vec<ChainSubscriber> = subs
            .into_iter()
            .filter(|s| self.is_enabled(&s.id))
            .collect();
        if enabled.is_empty() {
            debug!(event = %event_type, "no enabled handlers for chain event, skipping");
            return None;
        }
        Some(enabled)
    }

    /// Isolate a subscriber failure: log it and surface a `SystemError`
    /// broadcast. Failures of `SystemError` subscribers themselves are only
    /// logged, so a broken error handler cannot feed back into the queue.
    fn handle_dispatch_error(&self, id: &HandlerId, event_name: &str, err: &HandlerError) {
        error!(handler = %id, event = event_name, error = %err, "event processing error");
        if event_name == EventType::SystemError.as_str() {
            return;
        }
        let report = SystemErrorReport::new("event", err.to_string())
            .with_context("event_type", event_name)
            .with_context("event_handle", id.to_string());
        self.send(EventType::SystemError, BroadcastPayload::SystemError(report));
    }

    /// Snapshot of every registered handler with its enabled state, for
    /// operator UIs.
    #[must_use]
    pub fn handler_states(&self) -> Vec<HandlerState> {
        let mut states = Vec::new();
        {
            let table = self.inner.broadcast.lock().expect("bus lock poisoned");
            for (event_type, subs) in table.iter() {
                for sub in subs {
                    states.push(HandlerState {
                        event: event_type.as_str().to_owned(),
                        handler: sub.id.to_string(),
                        priority: None,
                        enabled: self.is_enabled(&sub.id),
                    });
                }
            }
        }
        let table = self.inner.chain.lock().expect("bus lock poisoned");
        for (event_type, subs) in table.iter() {
            for sub in subs {
                states.push(HandlerState {
                    event: event_type.as_str().to_owned(),
                    handler: sub.id.to_string(),
                    priority: Some(sub.priority),
                    enabled: self.is_enabled(&sub.id),
                });
            }
        }
        states
    }
}

/// Registered-handler snapshot entry.
#[derive(Debug, Clone)]
pub struct HandlerState {
    pub event: String,
    pub handler: String,
    pub priority: Option<i32>,
    pub enabled: bool,
}
