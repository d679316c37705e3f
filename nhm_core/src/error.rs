//! Error types shared across the NHM crates.

use thiserror::Error;

/// Result type used throughout the NHM
pub type NhmResult<T> = Result<T, NhmError>;

/// Failure classes of the Node Health Monitor.
///
/// Peer transports translate their own error types into these variants at
/// the trait boundary; internal components either propagate them with `?`
/// or swallow and log them where a failure is specified as non-fatal.
#[derive(Debug, Error)]
pub enum NhmError {
    /// Filesystem or socket level failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer unreachable, timed out, or returned an unreadable reply
    #[error("transport error: {0}")]
    Transport(String),

    /// Key-value store or history file failure
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Unit supervision failure
    #[error("observation error: {0}")]
    Observation(String),
}

impl NhmError {
    pub fn transport(msg: impl Into<String>) -> Self {
        NhmError::Transport(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        NhmError::Persistence(msg.into())
    }

    pub fn observation(msg: impl Into<String>) -> Self {
        NhmError::Observation(msg.into())
    }
}
