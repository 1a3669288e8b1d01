//! Error types for feed transport operations.

use thiserror::Error;

/// Error type for connection and handshake failures.
///
/// Every variant is retried with backoff by [`crate::FeedTransport`], except a
/// credential rejection on the very first connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport connection did not open in time.
    #[error("connection timeout")]
    ConnectTimeout,

    /// Credential exchange did not complete in time.
    #[error("handshake timeout")]
    HandshakeTimeout,

    /// Exchange refused the credentials.
    #[error("credentials rejected: {message}")]
    Rejected {
        /// Message sent by the exchange.
        message: String,
    },

    /// Exchange sent something the handshake does not expect.
    #[error("protocol violation: {message}")]
    Protocol {
        /// Error message.
        message: String,
    },

    /// Connection closed by the exchange.
    #[error("connection closed")]
    ConnectionClosed,

    /// Maximum reconnect attempts reached.
    #[error("maximum reconnect attempts reached")]
    MaxReconnectAttempts,
}

impl ConnectionError {
    /// Creates a protocol violation error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Returns true for a credential rejection.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}
