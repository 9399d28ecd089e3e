use fluxgate_core::{BroadcastPayload, ChainEventType, ChainPayload, EventType};
use uuid::Uuid;

/// Priority assigned when the producer does not pick one. Lower values
/// dispatch earlier.
pub const DEFAULT_EVENT_PRIORITY: i32 = 10;

/// A broadcast event instance. Every subscriber receives its own clone, so
/// payload mutation cannot leak across handlers.
#[derive(Debug, Clone)]
pub struct BroadcastEvent {
    pub id: Uuid,
    pub kind: EventType,
    pub data: BroadcastPayload,
    pub priority: i32,
}

impl BroadcastEvent {
    #[must_use]
    pub fn new(kind: EventType, data: BroadcastPayload, priority: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            data,
            priority,
        }
    }
}

impl std::fmt::Display for BroadcastEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<Broadcast Event: {}, ID: {}, Priority: {}>",
            self.kind, self.id, self.priority
        )
    }
}

/// A chain event instance, folded through subscribers in priority order.
#[derive(Debug, Clone)]
pub struct ChainEvent {
    pub id: Uuid,
    pub kind: ChainEventType,
    pub data: ChainPayload,
    pub priority: i32,
}

impl ChainEvent {
    #[must_use]
    pub fn new(kind: ChainEventType, data: ChainPayload, priority: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            data,
            priority,
        }
    }
}

impl std::fmt::Display for ChainEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<Chain Event: {}, ID: {}, Priority: {}>",
            self.kind, self.id, self.priority
        )
    }
}
