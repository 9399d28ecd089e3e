use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::engine::ProxyEngine;
use crate::error::ProxyError;
use crate::handler::{FlowHandler, HandlerRegistry};
use crate::options::ProxyOptions;

/// Bound on the graceful-shutdown wait before the engine task is abandoned.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

enum MasterState {
    Idle,
    Running {
        task: JoinHandle<()>,
        shutdown: CancellationToken,
    },
}

/// Lifecycle manager for the embedded proxy engine.
///
/// State machine: `Idle ⇄ Running`, transitions atomic under the state lock.
/// Starting while running and stopping while idle are no-ops that warn.
pub struct ProxyMaster {
    engine: Arc<dyn ProxyEngine>,
    options: ProxyOptions,
    handlers: Arc<HandlerRegistry>,
    state: Mutex<MasterState>,
}

impl ProxyMaster {
    #[must_use]
    pub fn new(engine: Arc<dyn ProxyEngine>, options: ProxyOptions) -> Self {
        Self {
            engine,
            options,
            handlers: Arc::new(HandlerRegistry::new()),
            state: Mutex::new(MasterState::Idle),
        }
    }

    /// Whether the engine task is currently running.
    #[must_use]
    pub fn status(&self) -> bool {
        let state = self.state.lock().expect("proxy state poisoned");
        match &*state {
            MasterState::Idle => false,
            MasterState::Running { task, .. } => !task.is_finished(),
        }
    }

    /// Launch the proxy engine with the configured options.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::AlreadyRunning`] when called while running, for
    /// callers to surface.
    pub fn start(&self) -> Result<(), ProxyError> {
        let mut state = self.state.lock().expect("proxy state poisoned");
        if let MasterState::Running { task, .. } = &*state
            && !task.is_finished()
        {
            info!("proxy is already running");
            return Err(ProxyError::AlreadyRunning);
        }

        let shutdown = CancellationToken::new();
        let engine = Arc::clone(&self.engine);
        let options = self.options.clone();
        let handlers = Arc::clone(&self.handlers);
        let token = shutdown.clone();

        let task = tokio::spawn(async move {
            info!(
                host = %options.listen_host,
                port = options.listen_port,
                mode = ?options.modes,
                "proxy is starting"
            );
            if let Err(err) = engine.run(options, handlers, token).await {
                error!(error = %err, "proxy engine terminated with error");
            }
            info!("proxy shutdown complete");
        });

        *state = MasterState::Running { task, shutdown };
        Ok(())
    }

    /// Request a graceful engine shutdown and wait up to five seconds for
    /// the task to finish; after that the task is abandoned. Cancellation
    /// noise from the engine is ignored.
    pub async fn stop(&self) {
        let (task, shutdown) = {
            let mut state = self.state.lock().expect("proxy state poisoned");
            match std::mem::replace(&mut *state, MasterState::Idle) {
                MasterState::Idle => {
                    warn!("proxy is not running");
                    return;
                }
                MasterState::Running { task, shutdown } => (task, shutdown),
            }
        };

        info!("proxy is stopping");
        shutdown.cancel();
        let _ = tokio::time::timeout(STOP_TIMEOUT, task).await;
        info!("proxy stopped");
    }

    /// Attach flow handlers at runtime (the hook chains register through
    /// this).
    pub fn add_handlers(&self, handlers: impl IntoIterator<Item = Arc<dyn FlowHandler>>) {
        for handler in handlers {
            self.handlers.add(handler);
        }
    }

    /// Detach a flow handler by name.
    pub fn remove_handler(&self, name: &str) {
        self.handlers.remove(name);
    }

    /// The live handler registry, as handed to the engine.
    #[must_use]
    pub fn handlers(&self) -> Arc<HandlerRegistry> {
        Arc::clone(&self.handlers)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use fluxgate_core::Flow;
    use fluxgate_hooks::HookEvent;

    use super::*;

    /// Engine double: dispatches one flow through the handlers, then parks
    /// until cancelled.
    struct ScriptedEngine {
        dispatched: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ProxyEngine for ScriptedEngine {
        async fn run(
            &self,
            _options: ProxyOptions,
            handlers: Arc<HandlerRegistry>,
            shutdown: CancellationToken,
        ) -> Result<(), ProxyError> {
            let mut flow = Flow::http("example.com");
            handlers.dispatch(HookEvent::Request, &mut flow).await;
            handlers.dispatch(HookEvent::Response, &mut flow).await;
            self.dispatched.fetch_add(1, Ordering::SeqCst);
            shutdown.cancelled().await;
            Ok(())
        }
    }

    /// Engine double that never honors cancellation.
    struct StubbornEngine;

    #[async_trait]
    impl ProxyEngine for StubbornEngine {
        async fn run(
            &self,
            _options: ProxyOptions,
            _handlers: Arc<HandlerRegistry>,
            _shutdown: CancellationToken,
        ) -> Result<(), ProxyError> {
            std::future::pending().await
        }
    }

    struct CountingHandler {
        requests: Arc<AtomicUsize>,
        responses: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl FlowHandler for CountingHandler {
        fn name(&self) -> &str {
            "counter"
        }

        async fn request(&self, _flow: &mut Flow) {
            self.requests.fetch_add(1, Ordering::SeqCst);
        }

        async fn response(&self, _flow: &mut Flow) {
            self.responses.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn start_runs_engine_and_feeds_handlers() {
        let dispatched = Arc::new(AtomicUsize::new(0));
        let master = ProxyMaster::new(
            Arc::new(ScriptedEngine {
                dispatched: Arc::clone(&dispatched),
            }),
            ProxyOptions::default(),
        );

        let requests = Arc::new(AtomicUsize::new(0));
        let responses = Arc::new(AtomicUsize::new(0));
        master.add_handlers([Arc::new(CountingHandler {
            requests: Arc::clone(&requests),
            responses: Arc::clone(&responses),
        }) as Arc<dyn FlowHandler>]);

        master.start().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(master.status());
        assert_eq!(dispatched.load(Ordering::SeqCst), 1);
        assert_eq!(requests.load(Ordering::SeqCst), 1);
        assert_eq!(responses.load(Ordering::SeqCst), 1);

        master.stop().await;
        assert!(!master.status());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn start_while_running_is_surfaced() {
        let master = ProxyMaster::new(
            Arc::new(ScriptedEngine {
                dispatched: Arc::new(AtomicUsize::new(0)),
            }),
            ProxyOptions::default(),
        );

        master.start().unwrap();
        assert!(matches!(master.start(), Err(ProxyError::AlreadyRunning)));
        master.stop().await;
    }

    #[tokio::test]
    async fn stop_while_idle_is_a_noop() {
        let master = ProxyMaster::new(
            Arc::new(ScriptedEngine {
                dispatched: Arc::new(AtomicUsize::new(0)),
            }),
            ProxyOptions::default(),
        );
        assert!(!master.status());
        master.stop().await;
        assert!(!master.status());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_bounded_when_engine_ignores_cancellation() {
        let master = ProxyMaster::new(Arc::new(StubbornEngine), ProxyOptions::default());
        master.start().unwrap();

        let before = tokio::time::Instant::now();
        master.stop().await;
        let waited = before.elapsed();

        assert!(waited >= STOP_TIMEOUT);
        assert!(waited < STOP_TIMEOUT + Duration::from_secs(1));
        assert!(!master.status());
    }

    #[tokio::test]
    async fn restart_after_stop() {
        let dispatched = Arc::new(AtomicUsize::new(0));
        let master = ProxyMaster::new(
            Arc::new(ScriptedEngine {
                dispatched: Arc::clone(&dispatched),
            }),
            ProxyOptions::default(),
        );

        master.start().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        master.stop().await;

        master.start().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        master.stop().await;

        assert_eq!(dispatched.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn handlers_detach_by_name() {
        let master = ProxyMaster::new(
            Arc::new(ScriptedEngine {
                dispatched: Arc::new(AtomicUsize::new(0)),
            }),
            ProxyOptions::default(),
        );
        let counts = Arc::new(AtomicUsize::new(0));
        master.add_handlers([Arc::new(CountingHandler {
            requests: Arc::clone(&counts),
            responses: Arc::new(AtomicUsize::new(0)),
        }) as Arc<dyn FlowHandler>]);

        assert_eq!(master.handlers().names(), vec!["counter"]);
        master.remove_handler("counter");
        assert!(master.handlers().names().is_empty());
    }
}
