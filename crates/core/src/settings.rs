use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Persisted configuration keys.
///
/// Relational persistence is an external collaborator; the core only fixes
/// the key space and the access trait.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConfigKey {
    /// Ordered list of addon ids the user has installed.
    UserInstalledAddons,
    /// Per-addon opaque configuration, keyed `addon.<id>`.
    AddonConfig(String),
    /// User-defined addon grouping metadata.
    PluginFolders,
    /// Notification message templates.
    NotificationTemplates,
    /// Notification delivery window.
    NotificationSendTime,
    /// Notification channel configuration.
    Notifications,
    /// Per-scenario notification switches.
    NotificationSwitches,
    /// One-shot flag for the install statistics push.
    PluginInstallReport,
}

impl ConfigKey {
    #[must_use]
    pub fn as_key(&self) -> String {
        match self {
            Self::UserInstalledAddons => "UserInstalledAddons".to_owned(),
            Self::AddonConfig(id) => format!("addon.{id}"),
            Self::PluginFolders => "PluginFolders".to_owned(),
            Self::NotificationTemplates => "NotificationTemplates".to_owned(),
            Self::NotificationSendTime => "NotificationSendTime".to_owned(),
            Self::Notifications => "Notifications".to_owned(),
            Self::NotificationSwitches => "NotificationSwitches".to_owned(),
            Self::PluginInstallReport => "PluginInstallReport".to_owned(),
        }
    }
}

/// Errors raised by a settings store.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings backend error: {0}")]
    Backend(String),
    #[error("settings serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Access to persisted settings. Implementations must be safe for concurrent
/// access.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &ConfigKey) -> Result<Option<serde_json::Value>, SettingsError>;

    fn set(&self, key: &ConfigKey, value: serde_json::Value) -> Result<(), SettingsError>;

    fn delete(&self, key: &ConfigKey) -> Result<(), SettingsError>;

    /// Typed read; missing keys come back as `None`.
    fn get_as<T: serde::de::DeserializeOwned>(
        &self,
        key: &ConfigKey,
    ) -> Result<Option<T>, SettingsError>
    where
        Self: Sized,
    {
        match self.get(key)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }
}

/// In-memory settings store used in tests and single-process deployments.
#[derive(Debug, Default)]
pub struct MemorySettings {
    data: RwLock<HashMap<String, serde_json::Value>>,
}

impl MemorySettings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self, key: &ConfigKey) -> Result<Option<serde_json::Value>, SettingsError> {
        let data = self
            .data
            .read()
            .map_err(|_| SettingsError::Backend("settings lock poisoned".into()))?;
        Ok(data.get(&key.as_key()).cloned())
    }

    fn set(&self, key: &ConfigKey, value: serde_json::Value) -> Result<(), SettingsError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| SettingsError::Backend("settings lock poisoned".into()))?;
        data.insert(key.as_key(), value);
        Ok(())
    }

    fn delete(&self, key: &ConfigKey) -> Result<(), SettingsError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| SettingsError::Backend("settings lock poisoned".into()))?;
        data.remove(&key.as_key());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addon_config_key_format() {
        assert_eq!(
            ConfigKey::AddonConfig("WallpaperAddon".into()).as_key(),
            "addon.WallpaperAddon"
        );
    }

    #[test]
    fn memory_store_roundtrip() {
        let store = MemorySettings::new();
        let key = ConfigKey::UserInstalledAddons;

        assert!(store.get(&key).unwrap().is_none());
        store
            .set(&key, serde_json::json!(["AddonA", "AddonB"]))
            .unwrap();

        let ids: Vec<String> = store.get_as(&key).unwrap().unwrap();
        assert_eq!(ids, vec!["AddonA", "AddonB"]);

        store.delete(&key).unwrap();
        assert!(store.get(&key).unwrap().is_none());
    }
}
