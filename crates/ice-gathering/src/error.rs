//! Error types for ICE gathering coordination

use thiserror::Error;

/// Result type for fallible operations in this crate
pub type Result<T> = std::result::Result<T, Error>;

/// The only way an in-flight gathering wait can fail.
///
/// A gathering timeout is not an error: the wait resolves successfully and
/// negotiation proceeds with whatever candidates were found so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GatheringError {
    /// The transport was replaced (or the coordinator dropped) before
    /// gathering completed
    #[error("ICE gathering wait aborted: transport was reset")]
    Reset,
}

/// Errors surfaced by the session description handler, the configuration
/// loaders and the timer service
#[derive(Debug, Error)]
pub enum Error {
    /// A gathering wait was rejected
    #[error("Gathering error: {0}")]
    Gathering(#[from] GatheringError),

    /// The transport could not provide what was asked of it
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// No async runtime available for the timer service
    #[error("Runtime error: {message}")]
    Runtime { message: String },

    /// Failure reported by a transport factory
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a runtime error
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
        }
    }

    /// Whether this error is a reset of an in-flight gathering wait
    pub fn is_reset(&self) -> bool {
        matches!(self, Self::Gathering(GatheringError::Reset))
    }
}
