//! Shared helpers for the gathering integration tests
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rvoip_ice_gathering::{
    GatheringListener, GatheringMonitor, GatheringState, GatheringTransport, PeerTransport,
    SessionDescription, SubscriptionId, TimerCallback, TimerService, TimerToken, TransportFactory,
};

/// Opt-in test logging, controlled by `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct ScheduledDeadline {
    token: TimerToken,
    due: Duration,
    callback: TimerCallback,
}

/// Manually advanced clock that records every deadline it is asked to arm
#[derive(Default)]
pub struct ManualTimer {
    next_id: AtomicU64,
    now: Mutex<Duration>,
    pending: Mutex<Vec<ScheduledDeadline>>,
    scheduled: AtomicUsize,
}

impl ManualTimer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Deadlines armed and not yet fired or cancelled
    pub fn armed(&self) -> usize {
        self.pending.lock().len()
    }

    /// Deadlines ever scheduled
    pub fn scheduled_total(&self) -> usize {
        self.scheduled.load(Ordering::SeqCst)
    }

    /// Move the clock forward and run every deadline that came due
    pub fn advance(&self, by: Duration) -> usize {
        let now = {
            let mut now = self.now.lock();
            *now += by;
            *now
        };
        let due: Vec<ScheduledDeadline> = {
            let mut pending = self.pending.lock();
            let (due, rest) = std::mem::take(&mut *pending)
                .into_iter()
                .partition(|deadline| deadline.due <= now);
            *pending = rest;
            due
        };
        let fired = due.len();
        for deadline in due {
            (deadline.callback)();
        }
        fired
    }
}

impl TimerService for ManualTimer {
    fn schedule(&self, duration: Duration, callback: TimerCallback) -> TimerToken {
        let token = TimerToken::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let due = *self.now.lock() + duration;
        self.scheduled.fetch_add(1, Ordering::SeqCst);
        self.pending.lock().push(ScheduledDeadline { token, due, callback });
        token
    }

    fn cancel(&self, token: &TimerToken) {
        self.pending.lock().retain(|deadline| deadline.token != *token);
    }
}

/// Timer whose deadlines have always elapsed: the callback runs inside
/// `schedule`
#[derive(Default)]
pub struct ImmediateTimer {
    next_id: AtomicU64,
    fired: AtomicUsize,
}

impl ImmediateTimer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fired(&self) -> usize {
        self.fired.load(Ordering::SeqCst)
    }
}

impl TimerService for ImmediateTimer {
    fn schedule(&self, _duration: Duration, callback: TimerCallback) -> TimerToken {
        let token = TimerToken::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.fired.fetch_add(1, Ordering::SeqCst);
        callback();
        token
    }

    fn cancel(&self, _token: &TimerToken) {}
}

/// Transport whose gathering finishes the moment someone subscribes, with
/// the listener notified from inside `subscribe`
#[derive(Default)]
pub struct EagerTransport {
    pub monitor: GatheringMonitor,
}

impl GatheringTransport for EagerTransport {
    fn gathering_state(&self) -> GatheringState {
        self.monitor.gathering_state()
    }

    fn subscribe(&self, listener: GatheringListener) -> SubscriptionId {
        let id = self.monitor.subscribe(listener);
        self.monitor.set_state(GatheringState::Complete);
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.monitor.unsubscribe(id)
    }
}

/// Transport that never forgets a listener, to deliver notifications for
/// waits that have already settled
#[derive(Default)]
pub struct StickyTransport {
    pub monitor: GatheringMonitor,
}

impl GatheringTransport for StickyTransport {
    fn gathering_state(&self) -> GatheringState {
        self.monitor.gathering_state()
    }

    fn subscribe(&self, listener: GatheringListener) -> SubscriptionId {
        self.monitor.subscribe(listener)
    }

    fn unsubscribe(&self, _id: SubscriptionId) {}
}

/// Peer connection stand-in backed by a [`GatheringMonitor`]
pub struct FakePeerConnection {
    pub generation: usize,
    pub monitor: GatheringMonitor,
    description: Mutex<Option<SessionDescription>>,
    closed: AtomicBool,
}

impl FakePeerConnection {
    pub fn new(generation: usize) -> Self {
        Self {
            generation,
            monitor: GatheringMonitor::new(),
            description: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn set_description(&self, description: SessionDescription) {
        *self.description.lock() = Some(description);
    }

    pub fn set_state(&self, state: GatheringState) {
        self.monitor.set_state(state);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl GatheringTransport for FakePeerConnection {
    fn gathering_state(&self) -> GatheringState {
        self.monitor.gathering_state()
    }

    fn subscribe(&self, listener: GatheringListener) -> SubscriptionId {
        self.monitor.subscribe(listener)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.monitor.unsubscribe(id)
    }
}

impl PeerTransport for FakePeerConnection {
    fn local_description(&self) -> Option<SessionDescription> {
        self.description.lock().clone()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.monitor.close();
    }
}

/// Factory numbering each peer connection it creates, optionally failing
/// once a limit is reached or pausing before every connection after the
/// first
pub struct FakeFactory {
    created: Arc<Mutex<Vec<Arc<FakePeerConnection>>>>,
    limit: Option<usize>,
    delay: Option<Duration>,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self {
            created: Arc::new(Mutex::new(Vec::new())),
            limit: None,
            delay: None,
        }
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::new()
        }
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new()
        }
    }

    /// Every connection created so far, shared with the factory
    pub fn created(&self) -> Arc<Mutex<Vec<Arc<FakePeerConnection>>>> {
        Arc::clone(&self.created)
    }
}

#[async_trait]
impl TransportFactory for FakeFactory {
    type Transport = FakePeerConnection;

    async fn create(&self) -> anyhow::Result<Arc<FakePeerConnection>> {
        let generation = self.created.lock().len() + 1;
        if let Some(limit) = self.limit {
            if generation > limit {
                anyhow::bail!("peer connection limit of {} reached", limit);
            }
        }
        if let Some(delay) = self.delay {
            if generation > 1 {
                tokio::time::sleep(delay).await;
            }
        }
        let connection = Arc::new(FakePeerConnection::new(generation));
        self.created.lock().push(Arc::clone(&connection));
        Ok(connection)
    }
}
