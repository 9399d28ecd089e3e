//! Composed runtime: configuration loading, tracing initialization, and the
//! context object that builds the managers in a fixed order and tears them
//! down in reverse.

mod config;
mod runtime;
pub mod telemetry;

pub use config::{
    AddonSettings, BusSettings, CacheBackendKind, CacheSettings, ConfigError, FluxgateConfig,
    HookMismatchSetting, ModuleSettings, TelemetrySettings,
};
pub use runtime::{Runtime, RuntimeError};
