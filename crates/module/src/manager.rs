use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, error, info};

use fluxgate_bus::EventBus;
use fluxgate_core::{BroadcastPayload, EventType};

use crate::chain::{MethodProvider, ProvidedMethod};
use crate::module::{Module, ModuleSubtype, ModuleType, SettingExpectation};

/// Factory producing a module instance; registered once at startup.
pub type ModuleFactory = Arc<dyn Fn() -> Arc<dyn Module> + Send + Sync>;

/// Lookup into global settings, keyed by switch name. `None` or an empty
/// string means the switch is off.
pub type SettingLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Registry of long-lived system modules.
///
/// Modules whose `init_setting` switch does not match global settings are
/// registered but never started; a failing module is logged and skipped
/// without affecting its siblings.
pub struct ModuleManager {
    factories: RwLock<Vec<ModuleFactory>>,
    running: RwLock<HashMap<String, Arc<dyn Module>>>,
    known_ids: RwLock<Vec<String>>,
    settings: SettingLookup,
    bus: EventBus,
}

impl ModuleManager {
    #[must_use]
    pub fn new(bus: EventBus, settings: SettingLookup) -> Self {
        Self {
            factories: RwLock::new(Vec::new()),
            running: RwLock::new(HashMap::new()),
            known_ids: RwLock::new(Vec::new()),
            settings,
            bus,
        }
    }

    /// Register a module factory. Takes effect on the next `load_modules`.
    pub fn register(&self, factory: ModuleFactory) {
        self.factories
            .write()
            .expect("module registry poisoned")
            .push(factory);
    }

    /// Instantiate every registered factory and start the modules whose
    /// setting gate matches.
    pub fn load_modules(&self) {
        let factories: Vec<ModuleFactory> = {
            self.factories
                .read()
                .expect("module registry poisoned")
                .clone()
        };

        let mut running = HashMap::new();
        let mut known = Vec::new();
        for factory in factories {
            let module = factory();
            let module_id = module.id().to_owned();
            known.push(module_id.clone());

            if !Self::check_setting(module.init_setting(), &self.settings) {
                debug!(module = %module_id, "module switched off, not starting");
                continue;
            }
            match module.init() {
                Ok(()) => {
                    debug!(module = %module_id, "module loaded");
                    running.insert(module_id, module);
                }
                Err(err) => {
                    error!(module = %module_id, error = %err, "load module error");
                }
            }
        }

        *self.running.write().expect("module registry poisoned") = running;
        *self.known_ids.write().expect("module registry poisoned") = known;
    }

    /// Whether the gate matches the current settings. No gate means always
    /// on; an empty switch value means off; `Enabled` accepts any non-empty
    /// value; `Contains` requires the entry in the comma-separated value.
    fn check_setting(
        setting: Option<(String, SettingExpectation)>,
        lookup: &SettingLookup,
    ) -> bool {
        let Some((switch, expectation)) = setting else {
            return true;
        };
        let Some(option) = lookup(&switch) else {
            return false;
        };
        if option.is_empty() {
            return false;
        }
        match expectation {
            SettingExpectation::Enabled => true,
            SettingExpectation::Contains(value) => {
                option.split(',').any(|part| part.trim() == value)
            }
        }
    }

    /// Stop every running module. Failures are isolated per module.
    pub fn stop(&self) {
        info!("stopping all modules");
        let running: Vec<Arc<dyn Module>> = {
            self.running
                .read()
                .expect("module registry poisoned")
                .values()
                .cloned()
                .collect()
        };
        for module in running {
            match module.stop() {
                Ok(()) => debug!(module = %module.id(), "module stopped"),
                Err(err) => error!(module = %module.id(), error = %err, "stop module error"),
            }
        }
        self.running
            .write()
            .expect("module registry poisoned")
            .clear();
        info!("all modules stopped");
    }

    /// Stop and reload all modules, then broadcast `ModuleReload`.
    pub fn reload(&self) {
        self.stop();
        self.load_modules();
        self.bus.send(EventType::ModuleReload, BroadcastPayload::Empty);
    }

    /// Run a module's self-test.
    #[must_use]
    pub fn test(&self, module_id: &str) -> (bool, String) {
        let running = self.running.read().expect("module registry poisoned");
        match running.get(module_id) {
            Some(module) => module.test(),
            None => (false, String::new()),
        }
    }

    #[must_use]
    pub fn get_running_module(&self, module_id: &str) -> Option<Arc<dyn Module>> {
        self.running
            .read()
            .expect("module registry poisoned")
            .get(module_id)
            .cloned()
    }

    /// Every module id known to the registry, running or not.
    #[must_use]
    pub fn module_ids(&self) -> Vec<String> {
        self.known_ids
            .read()
            .expect("module registry poisoned")
            .clone()
    }

    /// Running modules of a given type.
    #[must_use]
    pub fn running_type_modules(&self, module_type: ModuleType) -> Vec<Arc<dyn Module>> {
        self.running
            .read()
            .expect("module registry poisoned")
            .values()
            .filter(|m| m.module_type() == module_type)
            .cloned()
            .collect()
    }

    /// Running modules of a given subtype.
    #[must_use]
    pub fn running_subtype_modules(&self, subtype: ModuleSubtype) -> Vec<Arc<dyn Module>> {
        self.running
            .read()
            .expect("module registry poisoned")
            .values()
            .filter(|m| m.subtype() == Some(subtype))
            .cloned()
            .collect()
    }

    /// Running modules sorted by dispatch priority, lower first.
    fn running_by_priority(&self) -> Vec<Arc<dyn Module>> {
        let mut modules: Vec<Arc<dyn Module>> = self
            .running
            .read()
            .expect("module registry poisoned")
            .values()
            .cloned()
            .collect();
        modules.sort_by_key(|m| m.priority());
        modules
    }
}

impl MethodProvider for ModuleManager {
    fn records(&self, method: &str) -> Vec<ProvidedMethod> {
        let mut records = Vec::new();
        for module in self.running_by_priority() {
            for record in module.method_records() {
                if record.method == method {
                    records.push(ProvidedMethod {
                        owner_id: module.id().to_owned(),
                        owner_name: module.name().to_owned(),
                        accepts_result: record.accepts_result,
                        func: record.func.clone(),
                    });
                }
            }
        }
        records
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::module::{MethodRecord, method_fn};

    use super::*;

    struct TestModule {
        id: String,
        priority: i32,
        gate: Option<(String, SettingExpectation)>,
        started: Arc<AtomicBool>,
        stopped: Arc<AtomicBool>,
        subtype: Option<ModuleSubtype>,
    }

    impl Module for TestModule {
        fn id(&self) -> &str {
            &self.id
        }

        fn name(&self) -> &str {
            &self.id
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn subtype(&self) -> Option<ModuleSubtype> {
            self.subtype
        }

        fn init_setting(&self) -> Option<(String, SettingExpectation)> {
            self.gate.clone()
        }

        fn init(&self) -> Result<(), crate::ModuleError> {
            self.started.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn stop(&self) -> Result<(), crate::ModuleError> {
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn method_records(&self) -> Vec<MethodRecord> {
            let id = self.id.clone();
            vec![MethodRecord::new(
                "ping",
                method_fn(move |_args| Ok(Some(serde_json::json!(id)))),
            )]
        }
    }

    fn factory(
        id: &str,
        priority: i32,
        gate: Option<(String, SettingExpectation)>,
        started: &Arc<AtomicBool>,
        stopped: &Arc<AtomicBool>,
    ) -> ModuleFactory {
        let id = id.to_owned();
        let started = Arc::clone(started);
        let stopped = Arc::clone(stopped);
        Arc::new(move || {
            Arc::new(TestModule {
                id: id.clone(),
                priority,
                gate: gate.clone(),
                started: Arc::clone(&started),
                stopped: Arc::clone(&stopped),
                subtype: None,
            })
        })
    }

    fn manager_with_settings(settings: &[(&str, &str)]) -> ModuleManager {
        let map: HashMap<String, String> = settings
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        ModuleManager::new(
            EventBus::default(),
            Arc::new(move |key: &str| map.get(key).cloned()),
        )
    }

    #[test]
    fn gated_module_only_starts_when_switch_matches() {
        let manager = manager_with_settings(&[("MESSAGER", "telegram,slack")]);
        let on_started = Arc::new(AtomicBool::new(false));
        let off_started = Arc::new(AtomicBool::new(false));
        let unused = Arc::new(AtomicBool::new(false));

        manager.register(factory(
            "TelegramModule",
            0,
            Some((
                "MESSAGER".to_owned(),
                SettingExpectation::Contains("telegram".to_owned()),
            )),
            &on_started,
            &unused,
        ));
        manager.register(factory(
            "WechatModule",
            0,
            Some((
                "MESSAGER".to_owned(),
                SettingExpectation::Contains("wechat".to_owned()),
            )),
            &off_started,
            &unused,
        ));

        manager.load_modules();

        assert!(on_started.load(Ordering::SeqCst));
        assert!(!off_started.load(Ordering::SeqCst));
        assert!(manager.get_running_module("TelegramModule").is_some());
        assert!(manager.get_running_module("WechatModule").is_none());
        // Both remain known even when not running.
        assert_eq!(manager.module_ids().len(), 2);
    }

    #[test]
    fn ungated_module_always_starts() {
        let manager = manager_with_settings(&[]);
        let started = Arc::new(AtomicBool::new(false));
        let unused = Arc::new(AtomicBool::new(false));
        manager.register(factory("PlainModule", 0, None, &started, &unused));

        manager.load_modules();
        assert!(started.load(Ordering::SeqCst));
    }

    #[test]
    fn missing_switch_keeps_module_off() {
        let manager = manager_with_settings(&[]);
        let started = Arc::new(AtomicBool::new(false));
        let unused = Arc::new(AtomicBool::new(false));
        manager.register(factory(
            "Gated",
            0,
            Some(("ABSENT".to_owned(), SettingExpectation::Enabled)),
            &started,
            &unused,
        ));

        manager.load_modules();
        assert!(!started.load(Ordering::SeqCst));
    }

    #[test]
    fn stop_stops_running_modules() {
        let manager = manager_with_settings(&[]);
        let started = Arc::new(AtomicBool::new(false));
        let stopped = Arc::new(AtomicBool::new(false));
        manager.register(factory("M", 0, None, &started, &stopped));

        manager.load_modules();
        manager.stop();

        assert!(stopped.load(Ordering::SeqCst));
        assert!(manager.get_running_module("M").is_none());
    }

    #[test]
    fn records_order_by_priority() {
        let manager = manager_with_settings(&[]);
        let unused = Arc::new(AtomicBool::new(false));
        manager.register(factory("Late", 20, None, &unused, &unused));
        manager.register(factory("Early", 5, None, &unused, &unused));

        manager.load_modules();

        let records = manager.records("ping");
        let owners: Vec<&str> = records.iter().map(|r| r.owner_id.as_str()).collect();
        assert_eq!(owners, vec!["Early", "Late"]);
    }

    #[test]
    fn test_reports_unknown_module() {
        let manager = manager_with_settings(&[]);
        assert_eq!(manager.test("nope"), (false, String::new()));
    }
}
