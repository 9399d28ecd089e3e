use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use fluxgate_addon::{Addon, AddonError, HookSpec, HookSpecFn};
use fluxgate_core::{
    ConfigKey, Flow, MemorySettings, ServiceSpec, SettingsStore, Trigger, service_fn,
};
use fluxgate_hooks::{HookEvent, sync_hook};
use fluxgate_proxy::{HandlerRegistry, ProxyEngine, ProxyError, ProxyOptions};
use fluxgate_runtime::{FluxgateConfig, Runtime};
use fluxgate_scheduler::JobStatus;

/// Engine double that emits one matching and one non-matching flow, then
/// waits for shutdown.
struct ReplayEngine {
    served: Arc<AtomicUsize>,
}

#[async_trait]
impl ProxyEngine for ReplayEngine {
    async fn run(
        &self,
        _options: ProxyOptions,
        handlers: Arc<HandlerRegistry>,
        shutdown: CancellationToken,
    ) -> Result<(), ProxyError> {
        // The hook chains attach right after the engine task spawns; wait for
        // them before replaying flows.
        while handlers.names().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        for host in ["api.example.com", "other.net"] {
            let mut flow = Flow::http(host);
            handlers.dispatch(HookEvent::Request, &mut flow).await;
            flow.response = Some(fluxgate_core::FlowResponse::new(200));
            handlers.dispatch(HookEvent::Response, &mut flow).await;
            self.served.fetch_add(1, Ordering::SeqCst);
        }
        shutdown.cancelled().await;
        Ok(())
    }
}

struct ObserverAddon {
    matched: Arc<AtomicUsize>,
    service_ticks: Arc<AtomicUsize>,
}

impl Addon for ObserverAddon {
    fn id(&self) -> &str {
        "ObserverAddon"
    }

    fn name(&self) -> &str {
        "Observer"
    }

    fn version(&self) -> &str {
        "0.1.0"
    }

    fn init(&self, _config: Option<serde_json::Value>) -> Result<(), AddonError> {
        Ok(())
    }

    fn state(&self) -> bool {
        true
    }

    fn hooks(&self) -> HashMap<HookEvent, Vec<HookSpec>> {
        let matched = Arc::clone(&self.matched);
        let mut hooks = HashMap::new();
        hooks.insert(
            HookEvent::Request,
            vec![
                HookSpec::new(HookSpecFn::Sync(sync_hook(move |flow| {
                    flow.request.set_header("x-observed", "1");
                    matched.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })))
                .with_condition("DOMAIN-SUFFIX,example.com"),
            ],
        );
        hooks
    }

    fn services(&self) -> Vec<ServiceSpec> {
        let ticks = Arc::clone(&self.service_ticks);
        vec![ServiceSpec {
            id: "tick".to_owned(),
            name: "Observer Tick".to_owned(),
            trigger: Trigger::Interval {
                every: Duration::from_secs(3600),
                initial_delay: None,
            },
            func: service_fn(move || {
                let ticks = Arc::clone(&ticks);
                async move {
                    ticks.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        }]
    }
}

fn installed_settings() -> Arc<MemorySettings> {
    let settings = Arc::new(MemorySettings::new());
    settings
        .set(
            &ConfigKey::UserInstalledAddons,
            serde_json::json!(["ObserverAddon"]),
        )
        .unwrap();
    settings
}

#[tokio::test(flavor = "multi_thread")]
async fn end_to_end_flow_dispatch() {
    let config = FluxgateConfig::from_toml("").unwrap();
    let served = Arc::new(AtomicUsize::new(0));
    let runtime = Runtime::build(
        &config,
        Arc::new(ReplayEngine {
            served: Arc::clone(&served),
        }),
        installed_settings(),
    )
    .unwrap();

    let matched = Arc::new(AtomicUsize::new(0));
    let service_ticks = Arc::new(AtomicUsize::new(0));
    {
        let matched = Arc::clone(&matched);
        let service_ticks = Arc::clone(&service_ticks);
        runtime.addons.register_factory(
            "ObserverAddon",
            Arc::new(move || {
                Arc::new(ObserverAddon {
                    matched: Arc::clone(&matched),
                    service_ticks: Arc::clone(&service_ticks),
                })
            }),
        );
    }

    runtime.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The engine served both flows; the rule matched only example.com.
    assert_eq!(served.load(Ordering::SeqCst), 2);
    assert_eq!(matched.load(Ordering::SeqCst), 1);

    // The addon's service and the built-in jobs are all scheduled.
    let jobs = runtime.scheduler.list();
    let ids: Vec<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
    assert!(ids.contains(&"ObserverAddon_tick"));
    assert!(ids.contains(&"clear_cache"));
    assert!(ids.contains(&"scheduler_job"));
    assert!(ids.contains(&"addon_market_refresh"));
    assert!(jobs.iter().all(|j| j.status == JobStatus::Waiting));

    // Manually firing the addon job runs its body.
    runtime.scheduler.start("ObserverAddon_tick").await;
    assert_eq!(service_ticks.load(Ordering::SeqCst), 1);

    runtime.shutdown().await;
    assert!(!runtime.proxy.status());
    assert!(runtime.scheduler.list().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn proxy_restart_through_runtime() {
    let config = FluxgateConfig::from_toml("").unwrap();
    let runtime = Runtime::build(
        &config,
        Arc::new(ReplayEngine {
            served: Arc::new(AtomicUsize::new(0)),
        }),
        installed_settings(),
    )
    .unwrap();

    runtime.start().await.unwrap();
    assert!(runtime.proxy.status());
    assert!(matches!(
        runtime.proxy.start(),
        Err(ProxyError::AlreadyRunning)
    ));

    runtime.proxy.stop().await;
    assert!(!runtime.proxy.status());
    runtime.proxy.start().unwrap();
    assert!(runtime.proxy.status());

    runtime.shutdown().await;
}

#[tokio::test]
async fn redis_backend_selection_requires_valid_url() {
    let config = FluxgateConfig::from_toml(
        r#"
        [cache]
        backend = "redis"

        [cache.redis]
        url = "not-a-redis-url"
        "#,
    )
    .unwrap();

    let result = Runtime::build(
        &config,
        Arc::new(ReplayEngine {
            served: Arc::new(AtomicUsize::new(0)),
        }),
        Arc::new(MemorySettings::new()),
    );
    assert!(result.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn module_fold_reaches_running_modules() {
    use fluxgate_module::{MethodRecord, Module, ModuleError, method_fn};

    struct EchoModule {
        inited: Arc<AtomicBool>,
    }

    impl Module for EchoModule {
        fn id(&self) -> &str {
            "EchoModule"
        }

        fn name(&self) -> &str {
            "Echo"
        }

        fn init(&self) -> Result<(), ModuleError> {
            self.inited.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn method_records(&self) -> Vec<MethodRecord> {
            vec![MethodRecord::new(
                "message_parser",
                method_fn(|args| Ok(Some(args))),
            )]
        }
    }

    let config = FluxgateConfig::from_toml("").unwrap();
    let runtime = Runtime::build(
        &config,
        Arc::new(ReplayEngine {
            served: Arc::new(AtomicUsize::new(0)),
        }),
        Arc::new(MemorySettings::new()),
    )
    .unwrap();

    let inited = Arc::new(AtomicBool::new(false));
    {
        let inited = Arc::clone(&inited);
        runtime.modules.register(Arc::new(move || {
            Arc::new(EchoModule {
                inited: Arc::clone(&inited),
            })
        }));
    }

    runtime.start().await.unwrap();
    assert!(inited.load(Ordering::SeqCst));

    let result = runtime
        .chain
        .run_module("message_parser", serde_json::json!({"text": "hi"}))
        .await;
    assert_eq!(result, Some(serde_json::json!({"text": "hi"})));

    runtime.shutdown().await;
}
