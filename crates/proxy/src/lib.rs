//! Proxy master: lifecycle of the embedded intercepting proxy and the
//! injection point that feeds each flow through the hook chains.
//!
//! The MITM protocol itself is a black box behind the [`ProxyEngine`] trait;
//! the core configures it, runs it as a task, and registers [`FlowHandler`]s
//! (notably the sync and async hook chains) for it to call back per flow.

mod engine;
mod error;
mod handler;
mod master;
mod options;

pub use engine::ProxyEngine;
pub use error::ProxyError;
pub use handler::{AsyncChainHandler, FlowHandler, HandlerRegistry, SyncChainHandler};
pub use master::ProxyMaster;
pub use options::{ConnectionStrategy, ProxyOptions};
