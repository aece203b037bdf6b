//! Session description handler
//!
//! Thin owner of a peer transport and its [`GatheringCoordinator`]. The
//! signaling layer asks it for the local description when building an offer
//! or answer; the handler first waits for gathering so the description
//! carries the local candidates. When the transport is recreated (ICE
//! restart, renegotiation) the coordinator is reset in the same call.
//!
//! SDP construction is not done here: the description is whatever the
//! transport reports once gathering is done enough.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::config::GatheringConfig;
use crate::coordinator::GatheringCoordinator;
use crate::error::{Error, Result};
use crate::timer::{TimerService, TokioTimer};
use crate::transport::GatheringTransport;

/// Offer or answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpType {
    /// Description sent to start a negotiation
    Offer,
    /// Description sent in reply to an offer
    Answer,
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offer => write!(f, "offer"),
            Self::Answer => write!(f, "answer"),
        }
    }
}

/// An opaque session description as produced by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    /// Whether this is an offer or an answer
    pub sdp_type: SdpType,
    /// The SDP body, candidates included once gathering is done
    pub sdp: String,
}

impl SessionDescription {
    /// Wrap an SDP body of the given type
    pub fn new(sdp_type: SdpType, sdp: impl Into<String>) -> Self {
        Self {
            sdp_type,
            sdp: sdp.into(),
        }
    }
}

/// A peer connection as seen by the handler
pub trait PeerTransport: GatheringTransport {
    /// The current local description, if one has been set
    fn local_description(&self) -> Option<SessionDescription>;

    /// Tear the transport down
    fn close(&self);
}

/// Creates peer transports, initially and on every reset
#[async_trait]
pub trait TransportFactory: Send + Sync {
    type Transport: PeerTransport + 'static;

    /// Create a fresh transport
    async fn create(&self) -> anyhow::Result<Arc<Self::Transport>>;
}

/// Owns the transport and gathering coordinator for one session
pub struct SessionDescriptionHandler<F: TransportFactory> {
    factory: F,
    transport: RwLock<Arc<F::Transport>>,
    coordinator: GatheringCoordinator,
    closed: AtomicBool,
}

impl<F: TransportFactory> SessionDescriptionHandler<F> {
    /// Create the initial transport and a coordinator observing it
    pub async fn new(factory: F, timer: Arc<dyn TimerService>, config: &GatheringConfig) -> Result<Self> {
        config.validate()?;
        let transport = factory.create().await?;
        let coordinator = GatheringCoordinator::new(transport.clone(), timer, config);
        debug!("Session description handler created");

        Ok(Self {
            factory,
            transport: RwLock::new(transport),
            coordinator,
            closed: AtomicBool::new(false),
        })
    }

    /// Same as [`new`](Self::new), with deadlines on the current tokio runtime
    pub async fn with_tokio_timer(factory: F, config: &GatheringConfig) -> Result<Self> {
        let timer = TokioTimer::current()?;
        Self::new(factory, Arc::new(timer), config).await
    }

    /// The current transport
    pub fn transport(&self) -> Arc<F::Transport> {
        Arc::clone(&self.transport.read())
    }

    /// The gathering coordinator
    pub fn coordinator(&self) -> &GatheringCoordinator {
        &self.coordinator
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Wait for ICE gathering, then return the local description.
    ///
    /// Fails with a reset error if the transport is replaced while waiting.
    pub async fn get_description(&self) -> Result<SessionDescription> {
        self.ensure_open()?;
        self.coordinator.wait_for_complete().await?;

        let description = self
            .transport()
            .local_description()
            .ok_or_else(|| Error::transport("Transport has no local description"))?;
        debug!("Local {} ready ({} bytes)", description.sdp_type, description.sdp.len());
        Ok(description)
    }

    /// Replace the transport with a fresh one, aborting any pending wait
    pub async fn reset_transport(&self) -> Result<()> {
        self.ensure_open()?;
        let fresh = self.factory.create().await?;

        // `close` marks the handler closed before it reads the transport, so
        // checking under the write lock means exactly one side closes `fresh`
        let previous = {
            let mut current = self.transport.write();
            if self.is_closed() {
                drop(current);
                fresh.close();
                debug!("Handler closed while creating a transport, discarding it");
                return Err(Error::transport("Session description handler closed during reset"));
            }
            std::mem::replace(&mut *current, fresh.clone())
        };
        self.coordinator.replace_transport(fresh);
        previous.close();

        info!("Peer transport reset, ICE gathering restarts");
        Ok(())
    }

    /// Close the transport and reject any pending wait
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.transport().close();
        self.coordinator.on_reset();
        debug!("Session description handler closed");
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::transport("Session description handler is closed"));
        }
        Ok(())
    }
}

impl<F: TransportFactory> fmt::Debug for SessionDescriptionHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionDescriptionHandler")
            .field("closed", &self.is_closed())
            .field("coordinator", &self.coordinator)
            .finish()
    }
}
