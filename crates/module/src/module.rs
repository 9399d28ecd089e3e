use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ModuleError;

/// Coarse module classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModuleType {
    Other,
}

/// Notification channel identity, for channel-typed modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageChannel {
    Wechat,
    Telegram,
    Slack,
    SynologyChat,
    VoceChat,
    Web,
    WebPush,
}

/// Miscellaneous backend identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OtherModulesType {
    PostgreSql,
    Redis,
}

/// Fine-grained module classification used by subtype lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModuleSubtype {
    Channel(MessageChannel),
    Other(OtherModulesType),
}

/// What the settings switch named by `init_setting` must hold for the module
/// to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingExpectation {
    /// Any non-empty value enables the module.
    Enabled,
    /// The comma-separated switch value must contain this entry.
    Contains(String),
}

/// A dispatched module method, produced at registration time.
///
/// Dispatch replaces runtime attribute probing: each module (and addon)
/// declares its callable methods up front as typed records.
#[derive(Clone)]
pub struct MethodRecord {
    /// Method name addons invoke through the dispatch fold.
    pub method: String,
    /// Whether this method can take the fold's current result as its input,
    /// acting as a transformer.
    pub accepts_result: bool,
    pub func: MethodFn,
}

impl MethodRecord {
    #[must_use]
    pub fn new(method: impl Into<String>, func: MethodFn) -> Self {
        Self {
            method: method.into(),
            accepts_result: false,
            func,
        }
    }

    #[must_use]
    pub fn transformer(method: impl Into<String>, func: MethodFn) -> Self {
        Self {
            method: method.into(),
            accepts_result: true,
            func,
        }
    }
}

impl std::fmt::Debug for MethodRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodRecord")
            .field("method", &self.method)
            .field("accepts_result", &self.accepts_result)
            .finish_non_exhaustive()
    }
}

/// Module method body. `None` results mean "no opinion" and let the fold
/// continue to the next provider.
#[derive(Clone)]
pub enum MethodFn {
    Sync(
        Arc<
            dyn Fn(serde_json::Value) -> Result<Option<serde_json::Value>, ModuleError>
                + Send
                + Sync,
        >,
    ),
    Async(
        Arc<
            dyn Fn(
                    serde_json::Value,
                ) -> Pin<
                    Box<
                        dyn Future<Output = Result<Option<serde_json::Value>, ModuleError>> + Send,
                    >,
                > + Send
                + Sync,
        >,
    ),
}

/// Wrap a synchronous closure into a [`MethodFn`].
pub fn method_fn<F>(f: F) -> MethodFn
where
    F: Fn(serde_json::Value) -> Result<Option<serde_json::Value>, ModuleError>
        + Send
        + Sync
        + 'static,
{
    MethodFn::Sync(Arc::new(f))
}

/// Wrap an async closure into a [`MethodFn`].
pub fn method_fn_async<F, Fut>(f: F) -> MethodFn
where
    F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<serde_json::Value>, ModuleError>> + Send + 'static,
{
    MethodFn::Async(Arc::new(move |args| Box::pin(f(args))))
}

/// A long-lived system module.
pub trait Module: Send + Sync {
    /// Stable identifier (the registry key).
    fn id(&self) -> &str;

    /// Human-readable name for logs and error reports.
    fn name(&self) -> &str;

    /// Dispatch order among system modules; lower runs first.
    fn priority(&self) -> i32 {
        0
    }

    fn module_type(&self) -> ModuleType {
        ModuleType::Other
    }

    fn subtype(&self) -> Option<ModuleSubtype> {
        None
    }

    /// The settings switch gating this module, or `None` to always start.
    fn init_setting(&self) -> Option<(String, SettingExpectation)> {
        None
    }

    fn init(&self) -> Result<(), ModuleError>;

    fn stop(&self) -> Result<(), ModuleError> {
        Ok(())
    }

    /// Self-test for operator diagnostics.
    fn test(&self) -> (bool, String) {
        (true, "module does not support testing".to_owned())
    }

    /// The methods this module contributes to the dispatch fold.
    fn method_records(&self) -> Vec<MethodRecord> {
        Vec::new()
    }
}
