use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use fluxgate_core::ServiceSpec;
use fluxgate_hooks::{AsyncHookFn, HookEvent, HookFn};
use fluxgate_module::MethodRecord;
use fluxgate_proxy::FlowHandler;

use crate::error::AddonError;

/// Factory producing a fresh addon instance. Registered at startup; re-run
/// on reload.
pub type AddonFactory = Arc<dyn Fn() -> Arc<dyn Addon> + Send + Sync>;

/// Authentication required by an addon-contributed API route.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiAuth {
    Anonymous,
    #[default]
    ApiKey,
    Bearer,
}

/// An API route an addon asks the outer HTTP surface to mount. The route
/// handler itself lives with that external surface; the core only carries
/// the registration data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSpec {
    /// Route path, mounted under `/{addon_id}`.
    pub path: String,
    #[serde(default)]
    pub auth: ApiAuth,
    #[serde(default)]
    pub summary: Option<String>,
}

/// Dashboard advertised by an addon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardMeta {
    /// Key unique within the addon.
    pub key: String,
    pub name: String,
}

/// The body of a hook registration: the function shape decides which chain
/// (sync or async) the hook lands in.
#[derive(Clone)]
pub enum HookSpecFn {
    Sync(HookFn),
    Async(AsyncHookFn),
}

/// A hook an addon registers for one event.
#[derive(Clone)]
pub struct HookSpec {
    /// Clash condition string without an action (e.g.
    /// `DOMAIN-SUFFIX,example.com`); parsed with an implicit `,COMPATIBLE`
    /// suffix. `None` matches every flow.
    pub condition: Option<String>,
    pub func: HookSpecFn,
    /// Defaults to the addon's order when unset.
    pub priority: Option<i32>,
    pub ignore_rest: bool,
}

impl HookSpec {
    #[must_use]
    pub fn new(func: HookSpecFn) -> Self {
        Self {
            condition: None,
            func,
            priority: None,
            ignore_rest: false,
        }
    }

    #[must_use]
    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    #[must_use]
    pub fn with_ignore_rest(mut self, ignore_rest: bool) -> Self {
        self.ignore_rest = ignore_rest;
        self
    }
}

/// The addon contract.
///
/// Identity and `init`/`state` are mandatory; every other capability has an
/// empty default, so an addon implements only what it offers. Capabilities
/// are collected once at registration time.
pub trait Addon: Send + Sync {
    /// Stable identifier; also the owner key for hooks and bus handlers.
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn version(&self) -> &str;

    /// Load/dispatch order; lower loads first. Also the default hook
    /// priority.
    fn order(&self) -> i32 {
        9999
    }

    /// Minimum host version this addon requires.
    fn version_required(&self) -> Option<&str> {
        None
    }

    /// Initialize with the addon's persisted configuration.
    fn init(&self, config: Option<serde_json::Value>) -> Result<(), AddonError>;

    /// Current run-state. Polled live: a disabled addon's hooks and service
    /// callbacks are skipped without deregistration.
    fn state(&self) -> bool;

    /// Flow hooks to register, per event.
    fn hooks(&self) -> HashMap<HookEvent, Vec<HookSpec>> {
        HashMap::new()
    }

    /// Scheduled services to register while the addon is running.
    fn services(&self) -> Vec<ServiceSpec> {
        Vec::new()
    }

    /// Clash rule lines describing the traffic this addon wants intercepted.
    fn clash_rules(&self) -> Vec<String> {
        Vec::new()
    }

    /// API routes for the outer HTTP surface.
    fn apis(&self) -> Vec<ApiSpec> {
        Vec::new()
    }

    fn dashboard_meta(&self) -> Vec<DashboardMeta> {
        Vec::new()
    }

    /// Render a dashboard by key. The user agent lets addons adapt output.
    fn dashboard(&self, key: &str, user_agent: Option<&str>) -> Option<serde_json::Value> {
        let _ = (key, user_agent);
        None
    }

    /// Methods contributed to the module dispatch fold.
    fn method_records(&self) -> Vec<MethodRecord> {
        Vec::new()
    }

    /// A raw flow handler to attach to the proxy, for addons that need the
    /// engine callbacks directly rather than through hooks.
    fn flow_handler(&self) -> Option<Arc<dyn FlowHandler>> {
        None
    }

    /// Called when the addon's services are being torn down.
    fn stop_service(&self) -> Result<(), AddonError> {
        Ok(())
    }

    /// Final cleanup on unload.
    fn close(&self) -> Result<(), AddonError> {
        Ok(())
    }
}
