//! Single-shot deadline timers
//!
//! The coordinator arms at most one deadline per gathering wait. It only needs
//! to schedule a callback and to cancel it again, so the clock is injected
//! through [`TimerService`]. [`TokioTimer`] is the runtime-backed
//! implementation; tests substitute a manual clock.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::trace;

use crate::error::{Error, Result};

/// Callback invoked when a deadline expires
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Opaque handle to a scheduled deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(u64);

impl TimerToken {
    /// Wrap a service-specific identifier
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// The service-specific identifier
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TimerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

/// Schedules cancellable single-shot callbacks
pub trait TimerService: Send + Sync {
    /// Run `callback` once after `duration`, unless cancelled first.
    ///
    /// The callback may run on any thread, including synchronously from
    /// inside `schedule` when `duration` has already elapsed.
    fn schedule(&self, duration: Duration, callback: TimerCallback) -> TimerToken;

    /// Cancel a scheduled callback. A no-op if it already fired or was
    /// cancelled.
    fn cancel(&self, token: &TimerToken);
}

/// [`TimerService`] backed by `tokio::time::sleep` tasks
pub struct TokioTimer {
    handle: Handle,
    next_id: AtomicU64,
    armed: Arc<Mutex<HashMap<u64, AbortHandle>>>,
}

impl TokioTimer {
    /// Create a timer that spawns its deadline tasks on `handle`
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            next_id: AtomicU64::new(1),
            armed: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Create a timer on the runtime of the calling context
    pub fn current() -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|e| Error::runtime(format!("TokioTimer requires a tokio runtime: {}", e)))?;
        Ok(Self::new(handle))
    }

    /// Number of deadlines scheduled and not yet fired or cancelled
    pub fn armed_count(&self) -> usize {
        self.armed.lock().len()
    }
}

impl TimerService for TokioTimer {
    fn schedule(&self, duration: Duration, callback: TimerCallback) -> TimerToken {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let armed = self.armed.clone();

        // Hold the registry while spawning so the task cannot look itself up
        // before it has been inserted.
        let mut registry = self.armed.lock();
        let task = self.handle.spawn(async move {
            tokio::time::sleep(duration).await;
            let still_armed = armed.lock().remove(&id).is_some();
            if still_armed {
                trace!("Timer {} fired after {:?}", id, duration);
                callback();
            }
        });
        registry.insert(id, task.abort_handle());

        TimerToken(id)
    }

    fn cancel(&self, token: &TimerToken) {
        if let Some(task) = self.armed.lock().remove(&token.0) {
            trace!("Cancelling {}", token);
            task.abort();
        }
    }
}

impl Drop for TokioTimer {
    fn drop(&mut self) {
        for (_, task) in self.armed.lock().drain() {
            task.abort();
        }
    }
}

impl fmt::Debug for TokioTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioTimer")
            .field("armed", &self.armed_count())
            .finish()
    }
}
