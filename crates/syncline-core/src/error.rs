//! Error types for the Syncline core.
//!
//! Strongly-typed errors for the transport session layer. Transport failures
//! are recoverable by design: they surface to the UI as connection-change
//! notifications carrying an error, never as unhandled panics.

use thiserror::Error;

/// Errors reported by the transport layer for a room session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The backend rejected the subscription credentials.
    #[error("authentication rejected: {reason}")]
    AuthRejected {
        /// Reason supplied by the backend.
        reason: String,
    },

    /// The transport could not be reached or refused the subscription.
    #[error("transport unavailable: {reason}")]
    Unavailable {
        /// Underlying transport failure.
        reason: String,
    },

    /// An established subscription closed without an explicit disconnect.
    #[error("connection lost: {reason}")]
    Lost {
        /// Reason reported by the transport, if any.
        reason: String,
    },

    /// The transport delivered a payload the core could not interpret.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl SessionError {
    /// Returns true if this error is transient and may succeed on retry.
    ///
    /// Unreachable transports and dropped connections are worth retrying
    /// with backoff. Rejected credentials and protocol violations are not;
    /// retrying them would just thrash the transport.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Lost { .. })
    }
}
