use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::service::ServiceSpec;

/// Asynchronous broadcast events: fan-out, fire-and-forget, no return path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// An addon needs to be reloaded.
    AddonReload,
    /// An addon action was triggered from the outside.
    AddonAction,
    /// An addon fired a domain event of its own.
    AddonTriggered,
    /// A command should be executed.
    CommandExecute,
    /// An inbound user message arrived.
    UserMessage,
    /// An inbound webhook message arrived.
    WebhookMessage,
    /// A notification should be delivered.
    NoticeMessage,
    /// A component reported an error.
    SystemError,
    /// Modules need to be reloaded.
    ModuleReload,
    /// A configuration item changed.
    ConfigChanged,
    /// A message interaction action occurred.
    MessageAction,
    /// A workflow should run.
    WorkflowExecute,
}

impl EventType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AddonReload => "addon.reload",
            Self::AddonAction => "addon.action",
            Self::AddonTriggered => "addon.triggered",
            Self::CommandExecute => "command.execute",
            Self::UserMessage => "user.message",
            Self::WebhookMessage => "webhook.message",
            Self::NoticeMessage => "notice.message",
            Self::SystemError => "system.error",
            Self::ModuleReload => "module.reload",
            Self::ConfigChanged => "config.updated",
            Self::MessageAction => "message.action",
            Self::WorkflowExecute => "workflow.execute",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Synchronous chain events: an ordered fold where subscribers may mutate the
/// payload and the producer observes the final value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChainEventType {
    /// Verify credentials; subscribers populate token/channel/service.
    AuthVerification,
    /// Intercept an authentication in progress; subscribers may cancel.
    AuthIntercept,
    /// Collect command registrations.
    CommandRegister,
    /// An addon registers its scheduled services.
    AddonServiceRegister,
    /// An addon deregisters its scheduled services.
    AddonServiceDeregister,
}

impl ChainEventType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AuthVerification => "auth.verification",
            Self::AuthIntercept => "auth.intercept",
            Self::CommandRegister => "command.register",
            Self::AddonServiceRegister => "service.register",
            Self::AddonServiceDeregister => "service.deregister",
        }
    }
}

impl std::fmt::Display for ChainEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Credential payload for the `AuthVerification` chain event.
///
/// Input fields are filled by the producer; subscribers populate `token`,
/// `channel`, and `service` on success.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthCredentials {
    pub username: Option<String>,
    pub password: Option<String>,
    pub mfa_code: Option<String>,
    pub code: Option<String>,
    /// `password`, `authorization_code`, or `client_credentials`. Empty
    /// defaults to `password` during validation.
    #[serde(default)]
    pub grant_type: String,
    pub token: Option<String>,
    pub channel: Option<String>,
    pub service: Option<String>,
}

/// Validation failure for [`AuthCredentials`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialsError {
    #[error("username and password are required for grant_type 'password'")]
    MissingPassword,
    #[error("code is required for grant_type 'authorization_code'")]
    MissingCode,
}

impl AuthCredentials {
    /// Normalize and validate the credential set before dispatch. An empty
    /// `grant_type` defaults to `password`.
    pub fn validate(&mut self) -> Result<(), CredentialsError> {
        if self.grant_type.is_empty() {
            self.grant_type = "password".to_owned();
        }
        match self.grant_type.as_str() {
            "password" => {
                if self.username.is_none() || self.password.is_none() {
                    return Err(CredentialsError::MissingPassword);
                }
            }
            "authorization_code" => {
                if self.code.is_none() {
                    return Err(CredentialsError::MissingCode);
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Authentication progress reported through the `AuthIntercept` chain event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthStatus {
    Triggered,
    Completed,
}

/// Payload for the `AuthIntercept` chain event. Subscribers may set `cancel`
/// to abort the authentication and stamp `source` with their identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthInterceptCredentials {
    pub username: Option<String>,
    pub channel: String,
    pub service: String,
    pub status: AuthStatus,
    pub token: Option<String>,
    #[serde(default = "default_intercept_source")]
    pub source: String,
    #[serde(default)]
    pub cancel: bool,
}

fn default_intercept_source() -> String {
    "Unknown interception source".to_owned()
}

/// Kind of configuration change carried by a `ConfigChanged` broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigChangeType {
    Add,
    Update,
    Delete,
}

/// Payload for the `ConfigChanged` broadcast event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigChange {
    pub key: String,
    pub value: Option<serde_json::Value>,
    pub change_type: ConfigChangeType,
}

/// Payload for `AddonServiceRegister` / `AddonServiceDeregister` chain
/// events.
#[derive(Debug, Clone)]
pub struct ServiceRegistration {
    pub addon_id: String,
    pub addon_name: Option<String>,
    pub services: Vec<ServiceSpec>,
}

impl ServiceRegistration {
    /// A deregistration payload carries only the addon id.
    #[must_use]
    pub fn deregister(addon_id: impl Into<String>) -> Self {
        Self {
            addon_id: addon_id.into(),
            addon_name: None,
            services: Vec::new(),
        }
    }
}

/// Payload for the `SystemError` broadcast event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemErrorReport {
    /// Reporting site: `event`, `plugin`, `module`, `scheduler`, ...
    pub kind: String,
    /// Contextual identifiers (addon id, handler identity, job id, ...).
    #[serde(default)]
    pub context: Vec<(String, String)>,
    pub error: String,
}

impl SystemErrorReport {
    #[must_use]
    pub fn new(kind: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            context: Vec::new(),
            error: error.into(),
        }
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.push((key.into(), value.into()));
        self
    }
}

/// Payload for the `NoticeMessage` broadcast event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoticeMessage {
    pub title: String,
    pub message: String,
    /// Originating role: `system`, `plugin`, or `user`.
    pub role: String,
}

/// Data carried by a broadcast event. Each subscriber receives its own clone
/// so mutations cannot leak across handlers.
#[derive(Debug, Clone)]
pub enum BroadcastPayload {
    Empty,
    ConfigChange(ConfigChange),
    SystemError(SystemErrorReport),
    Notice(NoticeMessage),
    /// Addon id for reload-style events, when one is targeted.
    AddonId(String),
    Value(serde_json::Value),
}

/// Data carried by a chain event; subscribers mutate it in place.
#[derive(Debug, Clone)]
pub enum ChainPayload {
    Auth(AuthCredentials),
    AuthIntercept(AuthInterceptCredentials),
    ServiceRegistration(ServiceRegistration),
    Value(serde_json::Value),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_wire_names() {
        assert_eq!(EventType::ConfigChanged.as_str(), "config.updated");
        assert_eq!(ChainEventType::AddonServiceRegister.as_str(), "service.register");
    }

    #[test]
    fn credentials_default_grant_type() {
        let mut creds = AuthCredentials {
            username: Some("admin".into()),
            password: Some("secret".into()),
            ..AuthCredentials::default()
        };
        creds.validate().unwrap();
        assert_eq!(creds.grant_type, "password");
    }

    #[test]
    fn credentials_password_requires_both_fields() {
        let mut creds = AuthCredentials {
            username: Some("admin".into()),
            ..AuthCredentials::default()
        };
        assert_eq!(creds.validate(), Err(CredentialsError::MissingPassword));
    }

    #[test]
    fn credentials_authorization_code_requires_code() {
        let mut creds = AuthCredentials {
            grant_type: "authorization_code".into(),
            ..AuthCredentials::default()
        };
        assert_eq!(creds.validate(), Err(CredentialsError::MissingCode));

        creds.code = Some("abc".into());
        assert!(creds.validate().is_ok());
    }

    #[test]
    fn system_error_context_builder() {
        let report = SystemErrorReport::new("scheduler", "boom")
            .with_context("scheduler_id", "clear_cache");
        assert_eq!(report.context.len(), 1);
        assert_eq!(report.kind, "scheduler");
    }
}
