//! Transport adapter contract and an in-memory implementation
//!
//! The coordinator never talks to an ICE agent directly. It reads the current
//! [`GatheringState`] and subscribes to changes through [`GatheringTransport`],
//! which keeps it independent of any concrete peer connection.
//!
//! [`GatheringMonitor`] is a ready-made adapter: the owner of the real agent
//! pushes state changes into it (directly with [`GatheringMonitor::set_state`]
//! or by forwarding an event channel) and the monitor fans them out to
//! subscribers.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};
use uuid::Uuid;

/// Local ICE candidate gathering state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GatheringState {
    /// Gathering has not started
    #[default]
    New,

    /// Candidates are being gathered
    Gathering,

    /// All candidates gathered
    Complete,
}

impl GatheringState {
    /// Whether gathering has finished
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

impl fmt::Display for GatheringState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Gathering => write!(f, "gathering"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

/// Identifies one state-change subscription on a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Generate a fresh identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Listener invoked with the new state on every gathering state change
pub type GatheringListener = Arc<dyn Fn(GatheringState) + Send + Sync>;

/// What the coordinator needs from the underlying connectivity object.
///
/// Implementations must not invoke a listener from inside `subscribe`, and
/// must not hold their own locks while invoking listeners: a listener may call
/// back into `unsubscribe`.
pub trait GatheringTransport: Send + Sync {
    /// Current gathering state
    fn gathering_state(&self) -> GatheringState;

    /// Register a listener for state changes
    fn subscribe(&self, listener: GatheringListener) -> SubscriptionId;

    /// Remove a listener. Idempotent, and safe after the transport has been
    /// torn down.
    fn unsubscribe(&self, id: SubscriptionId);
}

struct MonitorState {
    state: GatheringState,
    closed: bool,
    listeners: HashMap<SubscriptionId, GatheringListener>,
}

/// In-memory [`GatheringTransport`] driven by the owner of the ICE agent
pub struct GatheringMonitor {
    inner: RwLock<MonitorState>,
}

impl GatheringMonitor {
    /// Create a monitor in the `New` state
    pub fn new() -> Self {
        Self::with_state(GatheringState::New)
    }

    /// Create a monitor in the given state
    pub fn with_state(state: GatheringState) -> Self {
        Self {
            inner: RwLock::new(MonitorState {
                state,
                closed: false,
                listeners: HashMap::new(),
            }),
        }
    }

    /// Record a new gathering state and notify subscribers if it changed.
    ///
    /// Returns `true` if subscribers were notified. Ignored once closed.
    pub fn set_state(&self, new_state: GatheringState) -> bool {
        let listeners: Vec<GatheringListener> = {
            let mut inner = self.inner.write();
            if inner.closed {
                trace!("Ignoring gathering state {} on closed monitor", new_state);
                return false;
            }
            if inner.state == new_state {
                return false;
            }
            debug!("ICE gathering state changed: {} -> {}", inner.state, new_state);
            inner.state = new_state;
            inner.listeners.values().cloned().collect()
        };

        for listener in listeners {
            listener(new_state);
        }
        true
    }

    /// Stop delivering notifications and drop all listeners
    pub fn close(&self) {
        let mut inner = self.inner.write();
        if !inner.closed {
            debug!("Closing gathering monitor with {} listener(s)", inner.listeners.len());
            inner.closed = true;
            inner.listeners.clear();
        }
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.inner.read().closed
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.inner.read().listeners.len()
    }

    /// Apply every state received on `events` until the channel closes.
    ///
    /// This bridges an ICE agent that reports gathering progress over a
    /// channel rather than through callbacks.
    pub fn forward_from(self: &Arc<Self>, mut events: mpsc::Receiver<GatheringState>) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(state) = events.recv().await {
                monitor.set_state(state);
            }
            trace!("Gathering state channel closed");
        })
    }
}

impl Default for GatheringMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl GatheringTransport for GatheringMonitor {
    fn gathering_state(&self) -> GatheringState {
        self.inner.read().state
    }

    fn subscribe(&self, listener: GatheringListener) -> SubscriptionId {
        let id = SubscriptionId::new();
        let mut inner = self.inner.write();
        if inner.closed {
            trace!("Subscription {} on closed monitor will never fire", id);
        } else {
            inner.listeners.insert(id, listener);
        }
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.write().listeners.remove(&id);
    }
}

impl fmt::Debug for GatheringMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("GatheringMonitor")
            .field("state", &inner.state)
            .field("closed", &inner.closed)
            .field("listeners", &inner.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<GatheringState>>>, GatheringListener) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let clone = seen.clone();
        (seen, Arc::new(move |state| clone.lock().push(state)))
    }

    #[test]
    fn notifies_on_change_only() {
        let monitor = GatheringMonitor::new();
        let (seen, listener) = recorder();
        monitor.subscribe(listener);

        assert!(monitor.set_state(GatheringState::Gathering));
        assert!(!monitor.set_state(GatheringState::Gathering));
        assert!(monitor.set_state(GatheringState::Complete));

        assert_eq!(*seen.lock(), vec![GatheringState::Gathering, GatheringState::Complete]);
        assert_eq!(monitor.gathering_state(), GatheringState::Complete);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let monitor = GatheringMonitor::new();
        let (seen, listener) = recorder();
        let id = monitor.subscribe(listener);
        assert_eq!(monitor.listener_count(), 1);

        monitor.unsubscribe(id);
        monitor.unsubscribe(id);
        assert_eq!(monitor.listener_count(), 0);

        monitor.set_state(GatheringState::Gathering);
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn listener_may_unsubscribe_itself() {
        let monitor = Arc::new(GatheringMonitor::new());
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));

        let weak = Arc::downgrade(&monitor);
        let slot_clone = slot.clone();
        let id = monitor.subscribe(Arc::new(move |_| {
            if let (Some(monitor), Some(id)) = (weak.upgrade(), *slot_clone.lock()) {
                monitor.unsubscribe(id);
            }
        }));
        *slot.lock() = Some(id);

        monitor.set_state(GatheringState::Gathering);
        assert_eq!(monitor.listener_count(), 0);
    }

    #[test]
    fn closed_monitor_is_inert() {
        let monitor = GatheringMonitor::new();
        let (seen, listener) = recorder();
        let id = monitor.subscribe(listener);

        monitor.close();
        assert!(monitor.is_closed());
        assert!(!monitor.set_state(GatheringState::Complete));
        assert_eq!(monitor.gathering_state(), GatheringState::New);
        monitor.unsubscribe(id);

        let (_, late) = recorder();
        monitor.subscribe(late);
        assert_eq!(monitor.listener_count(), 0);
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn forwards_channel_states() {
        let monitor = Arc::new(GatheringMonitor::new());
        let (tx, rx) = mpsc::channel(4);
        let task = monitor.forward_from(rx);

        tx.send(GatheringState::Gathering).await.unwrap();
        tx.send(GatheringState::Complete).await.unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(monitor.gathering_state(), GatheringState::Complete);
    }

    #[test]
    fn displays_lowercase() {
        assert_eq!(GatheringState::New.to_string(), "new");
        assert_eq!(GatheringState::Gathering.to_string(), "gathering");
        assert_eq!(GatheringState::Complete.to_string(), "complete");
    }
}
