use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use fluxgate_addon::AddonManager;
use fluxgate_bus::EventBus;
use fluxgate_cache::CacheBackend;
use fluxgate_cache_memory::MemoryCache;
use fluxgate_cache_redis::RedisCache;
use fluxgate_core::{ServiceFn, SettingsStore, service_fn};
use fluxgate_module::{ChainBase, MethodProvider, ModuleManager};
use fluxgate_proxy::{ProxyEngine, ProxyError, ProxyMaster};
use fluxgate_scheduler::{Scheduler, SchedulerConfig, SchedulerError};

use crate::config::{CacheBackendKind, ConfigError, FluxgateConfig};

/// Errors raised while bringing the runtime up.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Proxy(#[from] ProxyError),

    #[error("scheduler setup failed: {0}")]
    Scheduler(#[from] SchedulerError),
}

/// The composed runtime.
///
/// Construction wires the managers together in a fixed order (bus and cache
/// first, then modules, proxy master, addon manager, scheduler); `start`
/// brings them up in that order and `shutdown` tears them down in reverse.
/// Components reach each other through this context instead of holding each
/// other directly.
pub struct Runtime {
    pub bus: EventBus,
    pub cache: Arc<dyn CacheBackend>,
    pub modules: Arc<ModuleManager>,
    pub proxy: Arc<ProxyMaster>,
    pub addons: Arc<AddonManager>,
    pub scheduler: Scheduler,
    pub chain: ChainBase,
    cache_lifespan: Duration,
    market_refresh: ServiceFn,
}

impl Runtime {
    /// Build the runtime from configuration, a proxy engine, and a settings
    /// store. Nothing starts yet.
    pub fn build(
        config: &FluxgateConfig,
        engine: Arc<dyn ProxyEngine>,
        settings: Arc<dyn SettingsStore>,
    ) -> Result<Self, ConfigError> {
        let bus = EventBus::new(config.bus.to_bus_config());

        let cache: Arc<dyn CacheBackend> = match config.cache.backend {
            CacheBackendKind::Memory => Arc::new(MemoryCache::with_ttl(Some(
                Duration::from_secs(config.cache.lifespan_seconds),
            ))),
            CacheBackendKind::Redis => Arc::new(
                RedisCache::new(&config.cache.redis)
                    .map_err(|e| ConfigError::Backend(e.to_string()))?,
            ),
        };

        let switches = config.modules.switches.clone();
        let modules = Arc::new(ModuleManager::new(
            bus.clone(),
            Arc::new(move |key: &str| switches.get(key).cloned()),
        ));

        let proxy = Arc::new(ProxyMaster::new(engine, config.proxy.clone()));

        let addons = Arc::new(AddonManager::new(
            bus.clone(),
            settings,
            Arc::clone(&proxy),
            config.addons.hook_mismatch.into(),
            config.addons.dev_addon.clone(),
        ));

        let scheduler = Scheduler::new(bus.clone());

        let chain = ChainBase::new(
            Arc::clone(&addons) as Arc<dyn MethodProvider>,
            Arc::clone(&modules) as Arc<dyn MethodProvider>,
            bus.clone(),
        );

        Ok(Self {
            bus,
            cache,
            modules,
            proxy,
            addons,
            scheduler,
            chain,
            cache_lifespan: Duration::from_secs(config.cache.lifespan_seconds),
            market_refresh: service_fn(|| async {
                debug!("addon marketplace refresh is not wired");
                Ok(())
            }),
        })
    }

    /// Replace the marketplace-refresh job body. The fetcher itself is an
    /// external collaborator.
    #[must_use]
    pub fn with_market_refresh(mut self, func: ServiceFn) -> Self {
        self.market_refresh = func;
        self
    }

    /// Bring the system up: bus consumers, modules, the proxy engine, the
    /// installed addons, then the scheduler with its built-in jobs.
    pub async fn start(&self) -> Result<(), RuntimeError> {
        info!("fluxgate starting");
        self.bus.start();
        self.modules.load_modules();

        // The scheduler listens for service registrations before any addon
        // announces them.
        self.scheduler.wire_service_events();

        self.proxy.start()?;
        self.addons.start().await;

        let chain = self.chain.clone();
        let clear_cache = service_fn(move || {
            let chain = chain.clone();
            async move {
                chain.clear_cache().await;
                Ok(())
            }
        });
        let chain = self.chain.clone();
        let common_job = service_fn(move || {
            let chain = chain.clone();
            async move {
                chain.scheduler_job().await;
                Ok(())
            }
        });
        self.scheduler.install_builtin_jobs(
            &SchedulerConfig {
                cache_lifespan: self.cache_lifespan,
            },
            clear_cache,
            common_job,
            Arc::clone(&self.market_refresh),
        )?;

        info!("fluxgate started");
        Ok(())
    }

    /// Tear everything down in reverse start order.
    pub async fn shutdown(&self) {
        info!("fluxgate shutting down");
        self.scheduler.stop();
        self.addons.stop().await;
        self.proxy.stop().await;
        self.modules.stop();
        self.bus.stop().await;
        self.cache.close().await;
        info!("fluxgate shutdown complete");
    }
}
