//! Gathering-completion coordinator
//!
//! Before a session description is sent, the local ICE candidates should be
//! in it. [`GatheringCoordinator::wait_for_complete`] lets the session
//! description handler wait for gathering to finish, while a configurable
//! deadline keeps a stalled agent from blocking negotiation forever.
//!
//! # Behavior
//!
//! - If gathering is already complete, or a previous wait timed out, the
//!   returned future is ready immediately and nothing is armed.
//! - Otherwise at most one wait is outstanding; concurrent callers join it.
//! - The wait resolves on whichever comes first: the transport reporting
//!   `Complete`, or the deadline. A timeout is a successful outcome and stays
//!   cached until the next reset.
//! - [`on_reset`](GatheringCoordinator::on_reset) rejects the outstanding
//!   wait with [`GatheringError::Reset`] and clears the cached timeout.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use rvoip_ice_gathering::{
//!     GatheringConfig, GatheringCoordinator, GatheringMonitor, GatheringState,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> rvoip_ice_gathering::Result<()> {
//! let monitor = Arc::new(GatheringMonitor::new());
//! let config = GatheringConfig::new().with_timeout_ms(500);
//! let coordinator = GatheringCoordinator::with_tokio_timer(monitor.clone(), &config)?;
//!
//! let wait = coordinator.wait_for_complete();
//! monitor.set_state(GatheringState::Gathering);
//! monitor.set_state(GatheringState::Complete);
//! wait.await?;
//!
//! assert!(!coordinator.status().timed_out);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::{FutureExt, Shared};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info, trace};

use crate::config::GatheringConfig;
use crate::error::{GatheringError, Result};
use crate::events::{EventEmitter, GatheringEvent, GatheringEventStream, WaitId};
use crate::timer::{TimerCallback, TimerService, TimerToken, TokioTimer};
use crate::transport::{GatheringListener, GatheringState, GatheringTransport, SubscriptionId};

type WaitOutcome = std::result::Result<(), GatheringError>;
type SharedOutcome = Shared<oneshot::Receiver<WaitOutcome>>;

/// Future returned by [`GatheringCoordinator::wait_for_complete`].
///
/// The wait is registered when `wait_for_complete` is called, not when this
/// future is first polled, so dropping it does not cancel anything. Clones
/// observe the same outcome.
#[derive(Clone)]
#[must_use = "a gathering wait does nothing unless awaited"]
pub struct GatheringWait {
    wait_id: Option<WaitId>,
    outcome: Option<SharedOutcome>,
}

impl GatheringWait {
    fn ready() -> Self {
        Self {
            wait_id: None,
            outcome: None,
        }
    }

    fn pending(wait_id: WaitId, outcome: SharedOutcome) -> Self {
        Self {
            wait_id: Some(wait_id),
            outcome: Some(outcome),
        }
    }

    /// Id of the wait this future is joined to, `None` if it resolved
    /// immediately
    pub fn wait_id(&self) -> Option<WaitId> {
        self.wait_id
    }

    /// Whether this future was resolved at creation without arming a wait
    pub fn is_immediate(&self) -> bool {
        self.outcome.is_none()
    }
}

impl Future for GatheringWait {
    type Output = std::result::Result<(), GatheringError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(outcome) = self.outcome.as_mut() else {
            return Poll::Ready(Ok(()));
        };

        match Pin::new(outcome).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // Resolver dropped without settling: the coordinator is gone
            Poll::Ready(Err(_)) => Poll::Ready(Err(GatheringError::Reset)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl fmt::Debug for GatheringWait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatheringWait")
            .field("wait_id", &self.wait_id)
            .field("immediate", &self.is_immediate())
            .finish()
    }
}

/// Point-in-time view of the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorStatus {
    /// A wait is armed and unsettled
    pub wait_pending: bool,

    /// The last wait ended by timeout and no reset happened since
    pub timed_out: bool,

    /// A deadline is armed for the pending wait
    pub timer_armed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    Completed,
    TimedOut,
}

/// The single outstanding wait
struct LiveWait {
    id: WaitId,
    outcome: SharedOutcome,
    resolver: oneshot::Sender<WaitOutcome>,
    timer: Option<TimerToken>,
    subscription: Option<SubscriptionId>,
    transport: Arc<dyn GatheringTransport>,
}

impl LiveWait {
    /// Release the deadline and subscription, then settle every joined future.
    /// Must be called after the wait has been detached from the live slot.
    fn settle(self, timer: &dyn TimerService, outcome: WaitOutcome) {
        if let Some(token) = self.timer {
            timer.cancel(&token);
        }
        if let Some(subscription) = self.subscription {
            self.transport.unsubscribe(subscription);
        }
        let _ = self.resolver.send(outcome);
    }
}

struct CoordinatorState {
    transport: Arc<dyn GatheringTransport>,
    live: Option<LiveWait>,
    timed_out: bool,
    last_wait_id: u64,
}

struct Core {
    state: Mutex<CoordinatorState>,
    timer: Arc<dyn TimerService>,
    timeout: Option<Duration>,
    events: EventEmitter,
}

impl Core {
    /// Settle `wait_id` if it is still the live wait; a no-op otherwise, which
    /// is what makes the losing side of the race harmless.
    fn settle(&self, wait_id: WaitId, via: Settlement) {
        let live = {
            let mut state = self.state.lock();
            match state.live.as_ref() {
                Some(live) if live.id == wait_id => {}
                _ => {
                    trace!("Ignoring {:?} for settled {}", via, wait_id);
                    return;
                }
            }
            if via == Settlement::TimedOut {
                state.timed_out = true;
            }
            state.live.take()
        };

        let Some(mut live) = live else {
            return;
        };

        match via {
            Settlement::Completed => {
                debug!("ICE gathering complete, resolving {}", wait_id);
                live.settle(self.timer.as_ref(), Ok(()));
                self.events.emit(GatheringEvent::Completed { wait_id });
            }
            Settlement::TimedOut => {
                info!(
                    "ICE gathering timed out after {:?}, proceeding with candidates gathered so far ({})",
                    self.timeout.unwrap_or_default(),
                    wait_id
                );
                // The deadline has already fired
                live.timer = None;
                live.settle(self.timer.as_ref(), Ok(()));
                self.events.emit(GatheringEvent::TimedOut { wait_id });
            }
        }
    }

    fn reject(&self, live: Option<LiveWait>) {
        match live {
            Some(live) => {
                let wait_id = live.id;
                info!("Transport reset while waiting for ICE gathering, rejecting {}", wait_id);
                live.settle(self.timer.as_ref(), Err(GatheringError::Reset));
                self.events.emit(GatheringEvent::Reset {
                    wait_id: Some(wait_id),
                });
            }
            None => {
                debug!("Transport reset with no gathering wait outstanding");
                self.events.emit(GatheringEvent::Reset { wait_id: None });
            }
        }
    }
}

/// Waits for local ICE candidate gathering to complete, bounded by an
/// optional timeout
pub struct GatheringCoordinator {
    core: Arc<Core>,
}

impl GatheringCoordinator {
    /// Create a coordinator over `transport`, using `timer` for deadlines
    pub fn new(
        transport: Arc<dyn GatheringTransport>,
        timer: Arc<dyn TimerService>,
        config: &GatheringConfig,
    ) -> Self {
        let timeout = config.gathering_timeout();
        debug!("Creating gathering coordinator with timeout {:?}", timeout);

        Self {
            core: Arc::new(Core {
                state: Mutex::new(CoordinatorState {
                    transport,
                    live: None,
                    timed_out: false,
                    last_wait_id: 0,
                }),
                timer,
                timeout,
                events: EventEmitter::new(config.event_capacity),
            }),
        }
    }

    /// Create a coordinator whose deadlines run on the current tokio runtime
    pub fn with_tokio_timer(
        transport: Arc<dyn GatheringTransport>,
        config: &GatheringConfig,
    ) -> Result<Self> {
        config.validate()?;
        let timer = TokioTimer::current()?;
        Ok(Self::new(transport, Arc::new(timer), config))
    }

    /// Wait until gathering is complete or the timeout expires.
    ///
    /// Resolves immediately if gathering is already complete or a previous
    /// wait timed out. Fails only with [`GatheringError::Reset`].
    pub fn wait_for_complete(&self) -> GatheringWait {
        let (wait_id, transport, outcome) = {
            let mut state = self.core.state.lock();

            if state.timed_out {
                trace!("Previous gathering wait timed out, resolving immediately");
                return GatheringWait::ready();
            }
            if state.transport.gathering_state().is_complete() {
                trace!("ICE gathering already complete");
                return GatheringWait::ready();
            }
            if let Some(live) = state.live.as_ref() {
                trace!("Joining outstanding {}", live.id);
                return GatheringWait::pending(live.id, live.outcome.clone());
            }

            state.last_wait_id += 1;
            let wait_id = WaitId(state.last_wait_id);
            let transport = Arc::clone(&state.transport);
            let (resolver, receiver) = oneshot::channel();
            let outcome = receiver.shared();
            state.live = Some(LiveWait {
                id: wait_id,
                outcome: outcome.clone(),
                resolver,
                timer: None,
                subscription: None,
                transport: Arc::clone(&transport),
            });

            // Emitted before any settlement can take the slot
            self.core.events.emit(GatheringEvent::WaitStarted {
                wait_id,
                timeout_armed: self.core.timeout.is_some(),
            });
            (wait_id, transport, outcome)
        };

        debug!(
            "Waiting for ICE gathering to complete ({}, timeout {:?})",
            wait_id, self.core.timeout
        );

        // Arm outside the lock: a timer or transport may call back right away
        let subscription = transport.subscribe(self.listener_for(wait_id));
        let timer = self
            .core
            .timeout
            .map(|timeout| self.core.timer.schedule(timeout, self.deadline_for(wait_id)));

        let attached = {
            let mut state = self.core.state.lock();
            match state.live.as_mut() {
                Some(live) if live.id == wait_id => {
                    live.subscription = Some(subscription);
                    live.timer = timer;
                    true
                }
                _ => false,
            }
        };

        if !attached {
            trace!("{} settled while arming, releasing", wait_id);
            if let Some(token) = timer {
                self.core.timer.cancel(&token);
            }
            transport.unsubscribe(subscription);
        } else if transport.gathering_state().is_complete() {
            // Finished between the state check and subscribing
            self.core.settle(wait_id, Settlement::Completed);
        }

        GatheringWait::pending(wait_id, outcome)
    }

    /// The transport was replaced: reject any outstanding wait and forget a
    /// cached timeout. Safe to call at any time.
    pub fn on_reset(&self) {
        let live = {
            let mut state = self.core.state.lock();
            state.timed_out = false;
            state.live.take()
        };
        self.core.reject(live);
    }

    /// Swap in a new transport and reset in the same step
    pub fn replace_transport(&self, transport: Arc<dyn GatheringTransport>) {
        let live = {
            let mut state = self.core.state.lock();
            state.transport = transport;
            state.timed_out = false;
            state.live.take()
        };
        self.core.reject(live);
    }

    /// Current gathering state of the transport
    pub fn gathering_state(&self) -> GatheringState {
        self.core.state.lock().transport.gathering_state()
    }

    /// The transport currently observed
    pub fn transport(&self) -> Arc<dyn GatheringTransport> {
        Arc::clone(&self.core.state.lock().transport)
    }

    /// The effective gathering timeout
    pub fn timeout(&self) -> Option<Duration> {
        self.core.timeout
    }

    /// Snapshot of the coordinator state
    pub fn status(&self) -> CoordinatorStatus {
        let state = self.core.state.lock();
        CoordinatorStatus {
            wait_pending: state.live.is_some(),
            timed_out: state.timed_out,
            timer_armed: state.live.as_ref().is_some_and(|live| live.timer.is_some()),
        }
    }

    /// Subscribe to wait lifecycle events
    pub fn subscribe_events(&self) -> GatheringEventStream {
        self.core.events.subscribe()
    }

    fn listener_for(&self, wait_id: WaitId) -> GatheringListener {
        let core: Weak<Core> = Arc::downgrade(&self.core);
        Arc::new(move |state: GatheringState| {
            if !state.is_complete() {
                trace!("ICE gathering state {} for {}", state, wait_id);
                return;
            }
            if let Some(core) = core.upgrade() {
                core.settle(wait_id, Settlement::Completed);
            }
        })
    }

    fn deadline_for(&self, wait_id: WaitId) -> TimerCallback {
        let core: Weak<Core> = Arc::downgrade(&self.core);
        Box::new(move || {
            if let Some(core) = core.upgrade() {
                core.settle(wait_id, Settlement::TimedOut);
            }
        })
    }
}

impl Drop for GatheringCoordinator {
    fn drop(&mut self) {
        let live = self.core.state.lock().live.take();
        if let Some(live) = live {
            debug!("Coordinator dropped with {} outstanding", live.id);
            live.settle(self.core.timer.as_ref(), Err(GatheringError::Reset));
        }
    }
}

impl fmt::Debug for GatheringCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatheringCoordinator")
            .field("timeout", &self.core.timeout)
            .field("status", &self.status())
            .finish()
    }
}
