use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, error, info, warn};

use fluxgate_bus::EventBus;
use fluxgate_core::{
    BroadcastPayload, ChainEventType, ChainPayload, ConfigKey, EventType, ServiceRegistration,
    SettingsStore, SystemErrorReport,
};
use fluxgate_hooks::{AsyncHookChain, Hook, HookChain, HookEvent, MismatchPolicy};
use fluxgate_module::{MethodProvider, ProvidedMethod};
use fluxgate_proxy::{AsyncChainHandler, FlowHandler, ProxyMaster, SyncChainHandler};
use fluxgate_rules::parse_rule_line;

use crate::addon::{Addon, AddonFactory, ApiSpec, DashboardMeta, HookSpecFn};
use crate::descriptor::compare_versions;
use crate::error::AddonError;
use crate::export::clash_provider_document;

/// Host version addons validate their `version_required` against.
const HOST_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Addon lifecycle manager.
///
/// Holds the factory pool (discovery), the running instances, and the wiring
/// into the hook chains, event bus, proxy, and (via chain events) the
/// scheduler. All mutating operations take the index write lock; iteration
/// works on snapshots so user code never runs under the lock.
pub struct AddonManager {
    factories: RwLock<HashMap<String, AddonFactory>>,
    running: RwLock<HashMap<String, Arc<dyn Addon>>>,
    hook_chain: Arc<HookChain>,
    async_hook_chain: Arc<AsyncHookChain>,
    bus: EventBus,
    settings: Arc<dyn SettingsStore>,
    proxy: Arc<ProxyMaster>,
    /// Development override: when set, only this addon id is started.
    dev_addon: Option<String>,
}

impl AddonManager {
    #[must_use]
    pub fn new(
        bus: EventBus,
        settings: Arc<dyn SettingsStore>,
        proxy: Arc<ProxyMaster>,
        mismatch_policy: MismatchPolicy,
        dev_addon: Option<String>,
    ) -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
            running: RwLock::new(HashMap::new()),
            hook_chain: Arc::new(HookChain::new(mismatch_policy)),
            async_hook_chain: Arc::new(AsyncHookChain::new(mismatch_policy)),
            bus,
            settings,
            proxy,
            dev_addon,
        }
    }

    /// Register an addon factory into the discovery pool. The id must match
    /// the factory's addon id (case-insensitively), mirroring the
    /// package-directory naming convention.
    pub fn register_factory(&self, addon_id: impl Into<String>, factory: AddonFactory) {
        self.factories
            .write()
            .expect("addon index poisoned")
            .insert(addon_id.into(), factory);
    }

    /// Resolve the installed addon set and start everything: attach the hook
    /// chains to the proxy, then load installed addons in order.
    pub async fn start(&self) {
        self.proxy.add_handlers([
            Arc::new(SyncChainHandler::new(Arc::clone(&self.hook_chain))) as Arc<dyn FlowHandler>,
            Arc::new(AsyncChainHandler::new(Arc::clone(&self.async_hook_chain)))
                as Arc<dyn FlowHandler>,
        ]);

        for addon_id in self.discover() {
            self.start_addon(&addon_id).await;
        }
    }

    /// The installed addon ids that have a registered factory, sorted by
    /// addon order. The dev override narrows discovery to a single id.
    fn discover(&self) -> Vec<String> {
        let installed: Vec<String> = self
            .settings
            .get(&ConfigKey::UserInstalledAddons)
            .ok()
            .flatten()
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default();

        let factories = self.factories.read().expect("addon index poisoned");
        let mut candidates: Vec<(i32, String)> = Vec::new();
        for id in factories.keys() {
            let eligible = match &self.dev_addon {
                Some(dev) => dev.eq_ignore_ascii_case(id),
                None => installed.iter().any(|i| i.eq_ignore_ascii_case(id)),
            };
            if !eligible {
                continue;
            }
            // Instantiate briefly to read the load order.
            let order = factories.get(id).map_or(9999, |f| f().order());
            candidates.push((order, id.clone()));
        }
        candidates.sort();
        candidates.into_iter().map(|(_, id)| id).collect()
    }

    /// Instantiate and initialize one addon. Failures are logged; other
    /// addons are unaffected.
    pub async fn start_addon(&self, addon_id: &str) {
        if self.get_running(addon_id).is_some() {
            debug!(addon = addon_id, "addon is already running");
            return;
        }
        let factory = {
            let factories = self.factories.read().expect("addon index poisoned");
            factories.get(addon_id).cloned()
        };
        let Some(factory) = factory else {
            warn!(addon = addon_id, "no factory registered for addon");
            return;
        };

        let addon = factory();
        if let Some(required) = addon.version_required()
            && compare_versions(required, HOST_VERSION) == std::cmp::Ordering::Greater
        {
            warn!(
                addon = addon_id,
                required,
                host = HOST_VERSION,
                "addon requires a newer host version, not starting"
            );
            return;
        }
        self.running
            .write()
            .expect("addon index poisoned")
            .insert(addon_id.to_owned(), Arc::clone(&addon));

        if let Err(err) = self.init_addon(addon_id, &addon).await {
            error!(addon = addon_id, error = %err, "error loading addon");
            let report = SystemErrorReport::new("plugin", err.to_string())
                .with_context("addon_id", addon_id.to_owned());
            self.bus
                .send(EventType::SystemError, BroadcastPayload::SystemError(report));
        } else {
            info!(addon = addon_id, version = addon.version(), "addon loaded");
        }
    }

    async fn init_addon(&self, addon_id: &str, addon: &Arc<dyn Addon>) -> Result<(), AddonError> {
        let config = self
            .settings
            .get(&ConfigKey::AddonConfig(addon_id.to_owned()))
            .unwrap_or_default();
        addon.init(config)?;

        self.register_addon_hooks(addon_id, addon);
        if let Some(handler) = addon.flow_handler() {
            self.proxy.add_handlers([handler]);
        }

        if addon.state() {
            self.bus.enable_owner(addon_id);
            self.register_services(addon_id).await;
        } else {
            self.bus.disable_owner(addon_id);
        }
        Ok(())
    }

    /// Parse and register the addon's hook specs. Sync functions land in the
    /// sync chain, async ones in the async chain; a missing priority falls
    /// back to the addon's order; the enabled probe is the addon's live
    /// state.
    fn register_addon_hooks(&self, addon_id: &str, addon: &Arc<dyn Addon>) {
        for (event, specs) in addon.hooks() {
            info!(addon = addon_id, event = %event, count = specs.len(), "registering hooks");
            for spec in specs {
                let rule = match Self::parse_condition(addon_id, spec.condition.as_deref()) {
                    Ok(rule) => rule,
                    Err(()) => continue,
                };
                let priority = spec.priority.unwrap_or_else(|| addon.order());
                let state = Arc::clone(addon);
                let enabled: fluxgate_hooks::EnabledFn = Arc::new(move || state.state());

                match spec.func {
                    HookSpecFn::Sync(func) => {
                        let hook = Hook::new(addon_id, func)
                            .with_rule(rule)
                            .with_priority(priority)
                            .with_ignore_rest(spec.ignore_rest)
                            .with_enabled(enabled);
                        self.hook_chain.add(event, hook);
                    }
                    HookSpecFn::Async(func) => {
                        let hook = Hook::new(addon_id, func)
                            .with_rule(rule)
                            .with_priority(priority)
                            .with_ignore_rest(spec.ignore_rest)
                            .with_enabled(enabled);
                        self.async_hook_chain.add(event, hook);
                    }
                }
            }
        }
    }

    /// Parse a hook condition with the implicit `COMPATIBLE` action. An
    /// unparseable condition drops the hook with an error, never the addon.
    fn parse_condition(
        addon_id: &str,
        condition: Option<&str>,
    ) -> Result<Option<fluxgate_rules::RuleNode>, ()> {
        let Some(condition) = condition.filter(|c| !c.is_empty()) else {
            return Ok(None);
        };
        match parse_rule_line(&format!("{condition},COMPATIBLE")) {
            Ok(rule) => Ok(Some(rule)),
            Err(err) => {
                error!(addon = addon_id, condition, error = %err, "invalid hook condition");
                Err(())
            }
        }
    }

    fn deregister_addon_hooks(&self, addon_id: &str) {
        info!(addon = addon_id, "deregistering all event hooks");
        self.hook_chain.remove_by_id(addon_id, None);
        self.async_hook_chain.remove_by_id(addon_id, None);
    }

    /// Announce the addon's services to the scheduler over the registration
    /// chain event.
    async fn register_services(&self, addon_id: &str) {
        let addon = self.get_running(addon_id);
        let Some(addon) = addon else { return };
        if !addon.state() {
            return;
        }
        let registration = ServiceRegistration {
            addon_id: addon_id.to_owned(),
            addon_name: Some(addon.name().to_owned()),
            services: addon.services(),
        };
        self.bus
            .send_chain(
                ChainEventType::AddonServiceRegister,
                ChainPayload::ServiceRegistration(registration),
            )
            .await;
    }

    async fn deregister_services(&self, addon_id: &str) {
        self.bus
            .send_chain(
                ChainEventType::AddonServiceDeregister,
                ChainPayload::ServiceRegistration(ServiceRegistration::deregister(addon_id)),
            )
            .await;
    }

    /// Stop one addon: deregister services, disable its bus handlers, detach
    /// its proxy handler, remove its hooks, and run its teardown callbacks.
    pub async fn stop_addon(&self, addon_id: &str) {
        info!(addon = addon_id, "stopping addon");
        let addon = {
            let mut running = self.running.write().expect("addon index poisoned");
            running.remove(addon_id)
        };
        let Some(addon) = addon else {
            debug!(addon = addon_id, "addon does not exist or is not loaded");
            return;
        };

        self.deregister_services(addon_id).await;
        self.bus.disable_owner(addon_id);
        if let Some(handler) = addon.flow_handler() {
            self.proxy.remove_handler(handler.name());
        }
        self.deregister_addon_hooks(addon_id);

        if let Err(err) = addon.stop_service() {
            error!(addon = addon_id, error = %err, "error stopping addon services");
        }
        if let Err(err) = addon.close() {
            error!(addon = addon_id, error = %err, "error closing addon");
        }
        info!(addon = addon_id, "addon stopped");
    }

    /// Stop every running addon; each teardown is isolated from the others.
    pub async fn stop(&self) {
        info!("stopping all addons");
        for addon_id in self.running_ids() {
            self.stop_addon(&addon_id).await;
        }
        self.proxy.remove_handler("hook-chain");
        self.proxy.remove_handler("async-hook-chain");
        info!("addon stop complete");
    }

    /// Reload one addon: tear down its owned resources, re-run the factory,
    /// re-initialize, and broadcast `AddonReload`.
    pub async fn reload_addon(&self, addon_id: &str) {
        self.stop_addon(addon_id).await;
        self.start_addon(addon_id).await;
        self.bus.send(
            EventType::AddonReload,
            BroadcastPayload::AddonId(addon_id.to_owned()),
        );
    }

    // ── Introspection ─────────────────────────────────────────────────────

    #[must_use]
    pub fn get_running(&self, addon_id: &str) -> Option<Arc<dyn Addon>> {
        self.running
            .read()
            .expect("addon index poisoned")
            .get(addon_id)
            .cloned()
    }

    /// Ids in the discovery pool.
    #[must_use]
    pub fn addon_ids(&self) -> Vec<String> {
        self.factories
            .read()
            .expect("addon index poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Running ids, in addon order.
    #[must_use]
    pub fn running_ids(&self) -> Vec<String> {
        let mut entries: Vec<(i32, String)> = self
            .running_snapshot()
            .into_iter()
            .map(|(id, addon)| (addon.order(), id))
            .collect();
        entries.sort();
        entries.into_iter().map(|(_, id)| id).collect()
    }

    fn running_snapshot(&self) -> Vec<(String, Arc<dyn Addon>)> {
        self.running
            .read()
            .expect("addon index poisoned")
            .iter()
            .map(|(id, addon)| (id.clone(), Arc::clone(addon)))
            .collect()
    }

    /// API routes of running addons, paths prefixed with the addon id.
    #[must_use]
    pub fn addon_apis(&self) -> Vec<ApiSpec> {
        let mut apis = Vec::new();
        for (addon_id, addon) in self.running_snapshot() {
            for mut api in addon.apis() {
                api.path = format!("/{addon_id}{}", api.path);
                apis.push(api);
            }
        }
        apis
    }

    /// Dashboard metadata of running, enabled addons.
    #[must_use]
    pub fn dashboard_meta(&self) -> Vec<(String, DashboardMeta)> {
        let mut meta = Vec::new();
        for (addon_id, addon) in self.running_snapshot() {
            if !addon.state() {
                continue;
            }
            for entry in addon.dashboard_meta() {
                meta.push((addon_id.clone(), entry));
            }
        }
        meta
    }

    /// Render one addon's dashboard.
    #[must_use]
    pub fn dashboard(
        &self,
        addon_id: &str,
        key: &str,
        user_agent: Option<&str>,
    ) -> Option<serde_json::Value> {
        self.get_running(addon_id)?.dashboard(key, user_agent)
    }

    /// Aggregate running addons' Clash rules into a provider YAML document.
    pub fn export_clash_rules(&self) -> Result<String, AddonError> {
        let mut lines: Vec<(String, String)> = Vec::new();
        for (addon_id, addon) in self.running_snapshot() {
            if !addon.state() {
                continue;
            }
            for line in addon.clash_rules() {
                lines.push((addon_id.clone(), line));
            }
        }
        clash_provider_document(lines.iter().map(|(id, line)| (id.as_str(), line.as_str())))
    }

    /// The sync hook chain, for tests and the proxy wiring.
    #[must_use]
    pub fn hook_chain(&self) -> Arc<HookChain> {
        Arc::clone(&self.hook_chain)
    }

    #[must_use]
    pub fn async_hook_chain(&self) -> Arc<AsyncHookChain> {
        Arc::clone(&self.async_hook_chain)
    }
}

/// Addon-contributed dispatch records for the module fold, in addon order,
/// skipping disabled addons.
impl MethodProvider for AddonManager {
    fn records(&self, method: &str) -> Vec<ProvidedMethod> {
        let mut entries: Vec<(i32, String, Arc<dyn Addon>)> = self
            .running_snapshot()
            .into_iter()
            .map(|(id, addon)| (addon.order(), id, addon))
            .collect();
        entries.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));

        let mut records = Vec::new();
        for (_, addon_id, addon) in entries {
            if !addon.state() {
                continue;
            }
            for record in addon.method_records() {
                if record.method == method {
                    records.push(ProvidedMethod {
                        owner_id: addon_id.clone(),
                        owner_name: addon.name().to_owned(),
                        accepts_result: record.accepts_result,
                        func: record.func.clone(),
                    });
                }
            }
        }
        records
    }
}
