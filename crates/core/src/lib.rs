pub mod event;
pub mod flow;
pub mod service;
pub mod settings;

pub use event::{
    AuthCredentials, AuthInterceptCredentials, AuthStatus, BroadcastPayload, ChainEventType,
    ChainPayload, ConfigChange, ConfigChangeType, CredentialsError, EventType, NoticeMessage,
    ServiceRegistration, SystemErrorReport,
};
pub use flow::{Flow, FlowKind, FlowRequest, FlowResponse, Transport};
pub use service::{ServiceFn, ServiceSpec, Trigger, service_fn};
pub use settings::{ConfigKey, MemorySettings, SettingsError, SettingsStore};
