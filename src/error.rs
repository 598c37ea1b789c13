//! Error types for wanpulse.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::types::Outcome;

/// Result type alias for wanpulse operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for wanpulse.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors - surfaced synchronously, never retried
    #[error("invalid source address: {0}")]
    InvalidSourceAddress(String),

    #[error("invalid DSCP class {0}: must be in 0..=63")]
    InvalidQosClass(u8),

    #[error("no enabled paths configured")]
    NoEnabledPaths,

    #[error("invalid schedule expression {expression:?}: {reason}")]
    InvalidSchedule { expression: String, reason: String },

    #[error("path {0:?} not found among enabled paths")]
    PathNotFound(String),

    // Per-path runtime errors - absorbed into Outcomes by the probe runner
    #[error("source bind failed for {addr}: {reason}")]
    SourceBind { addr: SocketAddr, reason: String },

    #[error("dial failed to {addr}: {reason}")]
    Dial { addr: SocketAddr, reason: String },

    #[error("no measurement server available")]
    NoServerAvailable,

    #[error("measurement failed: {0}")]
    Measurement(String),

    // Coordinator lifecycle errors
    #[error("schedule coordinator already running")]
    AlreadyRunning,

    // Sweep cancellation carries the outcomes finished before the signal
    #[error("sweep cancelled after {} completed paths", completed.len())]
    SweepCancelled { completed: Vec<Outcome> },

    // Configuration file errors
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // General errors
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_display_counts_completed() {
        let err = Error::SweepCancelled { completed: vec![] };
        assert_eq!(err.to_string(), "sweep cancelled after 0 completed paths");
    }
}
