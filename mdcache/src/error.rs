//! Error types for the cache facade.

use mdcache_transport::ConnectionError;
use thiserror::Error;

/// Invalid cache configuration. Fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// No team secret was provided.
    #[error("missing team secret")]
    MissingSecret,

    /// The feed endpoint is not a usable `host:port`.
    #[error("invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint {
        /// Endpoint as given.
        endpoint: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The exchange refused the credentials on the first connection.
    #[error("credentials rejected: {message}")]
    CredentialsRejected {
        /// Message sent by the exchange.
        message: String,
    },

    /// A setting is out of range or could not be parsed.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// Setting name.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl ConfigurationError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

/// Error type for cache lifecycle operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// `start()` was called outside a tokio runtime.
    #[error("no tokio runtime available to run the feed")]
    NoRuntime,

    /// The feed stopped for good after exhausting its reconnect attempts.
    #[error("feed stopped: {0}")]
    Feed(ConnectionError),

    /// The ingest task panicked or was aborted.
    #[error("ingest task failed: {message}")]
    Task {
        /// Join error description.
        message: String,
    },
}

impl From<ConnectionError> for CacheError {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::Rejected { message } => {
                Self::Configuration(ConfigurationError::CredentialsRejected { message })
            }
            other => Self::Feed(other),
        }
    }
}
