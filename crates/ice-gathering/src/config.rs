//! Gathering coordinator configuration
//!
//! The only behavioral knob is the gathering timeout. It is disabled unless
//! set to a positive number of milliseconds, in which case a stalled gathering
//! phase is cut short and the wait resolves anyway.
//!
//! ```rust
//! use rvoip_ice_gathering::GatheringConfig;
//! use std::time::Duration;
//!
//! let config = GatheringConfig::default().with_timeout_ms(500);
//! assert_eq!(config.gathering_timeout(), Some(Duration::from_millis(500)));
//!
//! let disabled = GatheringConfig::default().with_timeout_ms(0);
//! assert_eq!(disabled.gathering_timeout(), None);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

/// Default buffer size of the gathering event broadcast channel
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

/// Configuration for [`GatheringCoordinator`](crate::GatheringCoordinator)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatheringConfig {
    /// Maximum time to wait for gathering to complete, in milliseconds.
    /// `None` or `0` disables the timeout.
    #[serde(alias = "iceCheckingTimeout", alias = "iceGatheringTimeout")]
    pub ice_gathering_timeout_ms: Option<u64>,

    /// Capacity of the gathering event broadcast channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for GatheringConfig {
    fn default() -> Self {
        Self {
            ice_gathering_timeout_ms: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl GatheringConfig {
    /// Create a configuration with the timeout disabled
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the gathering timeout in milliseconds
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.ice_gathering_timeout_ms = Some(timeout_ms);
        self
    }

    /// Set the gathering timeout, truncated to whole milliseconds
    pub fn with_timeout(self, timeout: Duration) -> Self {
        let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.with_timeout_ms(millis)
    }

    /// Disable the gathering timeout
    pub fn without_timeout(mut self) -> Self {
        self.ice_gathering_timeout_ms = None;
        self
    }

    /// Set the event channel capacity
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// The effective gathering timeout, if any
    pub fn gathering_timeout(&self) -> Option<Duration> {
        match self.ice_gathering_timeout_ms {
            Some(ms) if ms > 0 => Some(Duration::from_millis(ms)),
            _ => None,
        }
    }

    /// Check the configuration for values the coordinator cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.event_capacity == 0 {
            return Err(Error::config("event_capacity must be greater than zero"));
        }
        if self.ice_gathering_timeout_ms == Some(0) {
            warn!("ICE gathering timeout configured as 0ms; timeout is disabled");
        }
        Ok(())
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input)
            .map_err(|e| Error::config(format!("Invalid TOML gathering config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a JSON document
    pub fn from_json_str(input: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(input)
            .map_err(|e| Error::config(format!("Invalid JSON gathering config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }
}
