//! Tracing subscriber initialization.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::TelemetrySettings;

/// Install the global tracing subscriber: `RUST_LOG` when set, otherwise the
/// configured default filter, over the standard `fmt` layer.
///
/// Returns `false` when a subscriber was already installed (tests install
/// their own), which is harmless.
pub fn init(settings: &TelemetrySettings) -> bool {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(settings.log_level.clone()));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let settings = TelemetrySettings::default();
        // Whichever call wins the race, the second must not panic.
        let _ = init(&settings);
        assert!(!init(&settings));
    }
}
