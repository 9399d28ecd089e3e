//! The Fluxgate event bus.
//!
//! Two disjoint event shapes coexist:
//!
//! - **Broadcast** ([`fluxgate_core::EventType`]): fan-out, fire-and-forget.
//!   Events pass through a bounded priority queue drained by consumer tasks;
//!   every enabled subscriber receives its own copy of the payload.
//! - **Chain** ([`fluxgate_core::ChainEventType`]): an ordered fold.
//!   Subscribers run in priority order (lower first), may mutate the payload
//!   in place, and the producer observes the final value.
//!
//! Subscribers are addressed by [`HandlerId`] — an owner (type path) plus a
//! method name — so they can be disabled individually or a whole owner at a
//! time, without re-registration.

mod bus;
mod event;
mod handler;

pub use bus::{BusConfig, EventBus};
pub use event::{BroadcastEvent, ChainEvent, DEFAULT_EVENT_PRIORITY};
pub use handler::{
    BroadcastHandler, ChainHandler, HandlerError, HandlerId, broadcast_handler,
    broadcast_handler_async, chain_handler, chain_handler_async,
};
