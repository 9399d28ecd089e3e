//! System modules and the method dispatch fold.
//!
//! A module is a long-lived component (notification backend, database
//! adapter, ...) keyed by id and gated by a settings switch. Addons reach
//! modules through [`ChainBase`], which folds a method call across addon
//! contributions first and system modules second.

mod chain;
mod error;
mod manager;
mod module;

pub use chain::{ChainBase, EmptyProvider, MethodProvider, ProvidedMethod};
pub use error::ModuleError;
pub use manager::{ModuleFactory, ModuleManager, SettingLookup};
pub use module::{
    MessageChannel, MethodFn, MethodRecord, Module, ModuleSubtype, ModuleType, OtherModulesType,
    SettingExpectation, method_fn, method_fn_async,
};
