use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// When a scheduled job fires.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    /// Fire every `every`, optionally delaying the first run.
    Interval {
        every: Duration,
        initial_delay: Option<Duration>,
    },
    /// Fire according to a cron expression, evaluated in `timezone` (IANA
    /// name) or UTC when unset.
    Cron {
        expr: String,
        timezone: Option<String>,
    },
    /// Fire once at the given instant.
    Date(DateTime<Utc>),
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Interval { every, .. } => write!(f, "every {}s", every.as_secs()),
            Self::Cron { expr, .. } => write!(f, "cron: {expr}"),
            Self::Date(at) => write!(f, "at {}", at.to_rfc3339()),
        }
    }
}

/// Boxed job body shared by scheduler jobs and addon services.
pub type ServiceFn = Arc<
    dyn Fn() -> Pin<
            Box<
                dyn Future<Output = Result<(), Box<dyn std::error::Error + Send + Sync>>> + Send,
            >,
        > + Send
        + Sync,
>;

/// Wrap an async closure into a [`ServiceFn`].
pub fn service_fn<F, Fut>(f: F) -> ServiceFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Box<dyn std::error::Error + Send + Sync>>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

/// A scheduled job an addon asks the host to run on its behalf.
#[derive(Clone)]
pub struct ServiceSpec {
    /// Identifier, unique within the owning addon.
    pub id: String,
    /// Human-readable name shown in the task list.
    pub name: String,
    pub trigger: Trigger,
    pub func: ServiceFn,
}

impl std::fmt::Debug for ServiceSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceSpec")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("trigger", &self.trigger)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_display() {
        let t = Trigger::Interval {
            every: Duration::from_secs(600),
            initial_delay: None,
        };
        assert_eq!(t.to_string(), "every 600s");

        let t = Trigger::Cron {
            expr: "0 */5 * * * *".to_owned(),
            timezone: None,
        };
        assert_eq!(t.to_string(), "cron: 0 */5 * * * *");
    }

    #[tokio::test]
    async fn service_fn_wraps_closure() {
        let f = service_fn(|| async { Ok(()) });
        assert!(f().await.is_ok());
    }
}
