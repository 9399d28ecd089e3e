//! Hook chains: the priority-ordered lists of addon hooks invoked per flow.
//!
//! One list exists per [`HookEvent`]. Dispatch walks the list in priority
//! order (higher first, stable on ties), re-checking each hook's enabled
//! state, matching its rule against the flow, and isolating hook errors.
//! Two chains coexist with identical semantics: [`HookChain`] for
//! synchronous hook functions and [`AsyncHookChain`] for suspension-capable
//! ones.

mod chain;
mod error;
mod types;

pub use chain::{AsyncHookChain, HookChain};
pub use error::HookError;
pub use types::{
    AsyncHookFn, EnabledFn, Hook, HookEvent, HookFn, MismatchPolicy, always_enabled, async_hook,
    sync_hook,
};
