//! ICE candidate gathering coordination for session description handling.
//!
//! A SIP/WebRTC session description handler should not send an offer or
//! answer until local ICE gathering is done, but it must not wait forever
//! for a stalled agent either. This crate provides the piece in between:
//!
//! - [`GatheringCoordinator`]: an idempotent "wait until gathering is
//!   complete" with an optional timeout, at most one outstanding wait, a
//!   cached outcome, and reset handling for ICE restarts
//! - [`GatheringTransport`]: the adapter contract the coordinator observes,
//!   with [`GatheringMonitor`] as an in-memory implementation
//! - [`TimerService`]: the deadline contract, with [`TokioTimer`] as the
//!   runtime-backed implementation
//! - [`SessionDescriptionHandler`]: a thin owner of transport and coordinator
//!
//! The crate does not gather candidates, build SDP, or retry gathering.

// Error handling
pub mod error;

// Configuration
pub mod config;

// Deadlines
pub mod timer;

// Transport adapter
pub mod transport;

// Lifecycle events
pub mod events;

// Gathering-completion coordinator
pub mod coordinator;

// Session description handler
pub mod handler;

// Public exports
pub use config::GatheringConfig;
pub use coordinator::{CoordinatorStatus, GatheringCoordinator, GatheringWait};
pub use error::{Error, GatheringError, Result};
pub use events::{EventEmitter, GatheringEvent, GatheringEventStream, WaitId};
pub use handler::{PeerTransport, SdpType, SessionDescription, SessionDescriptionHandler, TransportFactory};
pub use timer::{TimerCallback, TimerService, TimerToken, TokioTimer};
pub use transport::{GatheringListener, GatheringMonitor, GatheringState, GatheringTransport, SubscriptionId};

/// Re-export of common types and functions
pub mod prelude {
    pub use super::{
        GatheringConfig, GatheringCoordinator, GatheringError, GatheringEvent,
        GatheringMonitor, GatheringState, GatheringTransport, GatheringWait,
        PeerTransport, SessionDescription, SessionDescriptionHandler,
        TimerService, TokioTimer, TransportFactory,
        Error, Result,
    };
}
