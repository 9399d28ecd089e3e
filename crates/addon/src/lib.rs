//! Addon lifecycle and capability wiring.
//!
//! Addons are compiled-in units registered through factories; the manager
//! resolves the installed set against persisted settings, instantiates and
//! initializes each addon, and routes its capabilities outward: hooks into
//! the hook chains, services into the scheduler (over chain events), event
//! handlers into the bus, module methods into the dispatch fold, and Clash
//! rules into the provider export.

mod addon;
mod descriptor;
mod error;
mod export;
mod manager;

pub use addon::{
    Addon, AddonFactory, ApiAuth, ApiSpec, DashboardMeta, HookSpec, HookSpecFn,
};
pub use descriptor::{AddonDescriptor, compare_versions, merge_market_addons};
pub use error::AddonError;
pub use export::clash_provider_document;
pub use manager::AddonManager;
