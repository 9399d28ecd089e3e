use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use fluxgate_bus::BusConfig;
use fluxgate_cache_redis::RedisCacheConfig;
use fluxgate_hooks::MismatchPolicy;
use fluxgate_proxy::ProxyOptions;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Top-level configuration, loaded from a TOML file.
#[derive(Debug, Default, Deserialize)]
pub struct FluxgateConfig {
    #[serde(default)]
    pub proxy: ProxyOptions,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub bus: BusSettings,
    #[serde(default)]
    pub addons: AddonSettings,
    #[serde(default)]
    pub modules: ModuleSettings,
    #[serde(default)]
    pub telemetry: TelemetrySettings,
}

impl FluxgateConfig {
    /// Parse a configuration document.
    pub fn from_toml(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }

    /// Load a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_toml(&std::fs::read_to_string(path)?)
    }
}

/// Which cache backend to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    #[default]
    Memory,
    Redis,
}

/// Cache backend configuration.
#[derive(Debug, Default, Deserialize)]
pub struct CacheSettings {
    #[serde(default)]
    pub backend: CacheBackendKind,
    /// Cached-data lifetime in seconds; also drives the cache-clear job.
    #[serde(default = "default_cache_lifespan")]
    pub lifespan_seconds: u64,
    #[serde(default)]
    pub redis: RedisCacheConfig,
}

fn default_cache_lifespan() -> u64 {
    24 * 3600
}

/// Event bus tuning.
#[derive(Debug, Deserialize)]
pub struct BusSettings {
    #[serde(default = "default_consumers")]
    pub consumers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_sync_workers")]
    pub sync_workers: usize,
}

fn default_consumers() -> usize {
    1
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_sync_workers() -> usize {
    100
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            consumers: default_consumers(),
            queue_capacity: default_queue_capacity(),
            sync_workers: default_sync_workers(),
        }
    }
}

impl BusSettings {
    #[must_use]
    pub fn to_bus_config(&self) -> BusConfig {
        BusConfig {
            consumers: self.consumers,
            queue_capacity: self.queue_capacity,
            sync_workers: self.sync_workers,
        }
    }
}

/// Addon manager configuration.
#[derive(Debug, Default, Deserialize)]
pub struct AddonSettings {
    /// Development override: start only this addon, ignoring the installed
    /// list.
    #[serde(default)]
    pub dev_addon: Option<String>,
    /// What hook dispatch does when a hook's rule does not match the flow.
    #[serde(default)]
    pub hook_mismatch: HookMismatchSetting,
}

/// Config-file spelling of [`MismatchPolicy`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookMismatchSetting {
    #[default]
    Abort,
    Skip,
}

impl From<HookMismatchSetting> for MismatchPolicy {
    fn from(setting: HookMismatchSetting) -> Self {
        match setting {
            HookMismatchSetting::Abort => Self::Abort,
            HookMismatchSetting::Skip => Self::Skip,
        }
    }
}

/// Global switches consulted by module `init_setting` gates.
#[derive(Debug, Default, Deserialize)]
pub struct ModuleSettings {
    #[serde(default)]
    pub switches: HashMap<String, String>,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
pub struct TelemetrySettings {
    /// Default log filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    String::from("info")
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}
