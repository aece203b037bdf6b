//! Gathering wait lifecycle events

use std::fmt;

use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::config::DEFAULT_EVENT_CAPACITY;

/// Identifies one gathering wait over the lifetime of a coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WaitId(pub(crate) u64);

impl WaitId {
    /// Numeric value of the id
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for WaitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wait-{}", self.0)
    }
}

/// Emitted by the coordinator as waits start and settle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatheringEvent {
    /// A new wait was armed
    WaitStarted {
        wait_id: WaitId,
        timeout_armed: bool,
    },

    /// Gathering reached `Complete` while a wait was armed
    Completed { wait_id: WaitId },

    /// The deadline expired before gathering completed
    TimedOut { wait_id: WaitId },

    /// The transport was reset; `wait_id` is the wait that was rejected, if any
    Reset { wait_id: Option<WaitId> },
}

/// Event stream type
pub type GatheringEventStream = BroadcastStream<GatheringEvent>;

/// Broadcasts [`GatheringEvent`]s to any number of observers
#[derive(Clone)]
pub struct EventEmitter {
    sender: broadcast::Sender<GatheringEvent>,
}

impl EventEmitter {
    /// Create a new event emitter with the specified capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Emit an event
    pub fn emit(&self, event: GatheringEvent) {
        // No receivers is fine
        let _ = self.sender.send(event);
    }

    /// Subscribe to events as a stream
    pub fn subscribe(&self) -> GatheringEventStream {
        BroadcastStream::new(self.sender.subscribe())
    }

    /// Subscribe to events as a raw broadcast receiver
    pub fn receiver(&self) -> broadcast::Receiver<GatheringEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active receivers
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter")
            .field("receivers", &self.receiver_count())
            .finish()
    }
}
