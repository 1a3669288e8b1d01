//! Feed transport: one logical connection that survives drops.
//!
//! [`FeedTransport::next_event`] is the lazy, infinite sequence the ingest
//! pipeline consumes. Behind it sits an explicit state machine:
//!
//! ```text
//! Disconnected -> Connecting -> Authenticating -> Streaming
//!                     ^                               |
//!                     +-------- Reconnecting <--------+
//! ```
//!
//! Every new session re-subscribes with a snapshot request, so sequence
//! numbers are never assumed to continue across a reconnect.

use crate::connector::Connector;
use crate::error::ConnectionError;
use crate::reconnect::{Backoff, ReconnectConfig};
use crate::session::{DisconnectReason, FeedItem, FeedSession, SessionConfig};
use crate::state::{SharedConnectionState, Transition, TransitionLog};
use bytes::BytesMut;
use mdcache_core::ConnectionState;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, timeout_at};

/// Configuration for the feed transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Deadline for opening the connection and completing the handshake.
    pub connect_timeout: Duration,
    /// Session timing and framing.
    pub session: SessionConfig,
    /// Backoff policy.
    pub reconnect: ReconnectConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            session: SessionConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Event yielded by [`FeedTransport::next_event`].
#[derive(Debug)]
pub enum TransportEvent {
    /// A session completed its handshake.
    Connected {
        /// True when this is not the first session of the transport.
        resumed: bool,
        /// Exchange welcome message.
        welcome: String,
    },
    /// Raw market frame payload.
    Frame(BytesMut),
    /// The current session ended; a reconnect is scheduled.
    Disconnected(DisconnectReason),
}

/// Reconnecting feed transport.
pub struct FeedTransport {
    connector: Arc<dyn Connector>,
    secret: String,
    config: TransportConfig,
    state: ConnectionState,
    shared_state: Arc<SharedConnectionState>,
    backoff: Backoff,
    session: Option<FeedSession>,
    pending_delay: Option<Duration>,
    sessions: u64,
    transitions: TransitionLog,
}

impl FeedTransport {
    /// Creates a transport. No I/O happens until [`connect`](Self::connect) or
    /// [`next_event`](Self::next_event) is awaited.
    #[must_use]
    pub fn new(
        connector: Arc<dyn Connector>,
        secret: impl Into<String>,
        config: TransportConfig,
    ) -> Self {
        Self {
            connector,
            secret: secret.into(),
            backoff: Backoff::new(config.reconnect.clone()),
            config,
            state: ConnectionState::Disconnected,
            shared_state: Arc::new(SharedConnectionState::new()),
            session: None,
            pending_delay: None,
            sessions: 0,
            transitions: TransitionLog::new(64),
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Returns a cell that mirrors the state for readers on other threads.
    #[must_use]
    pub fn shared_state(&self) -> Arc<SharedConnectionState> {
        Arc::clone(&self.shared_state)
    }

    /// Returns the most recent state changes, oldest first.
    #[must_use]
    pub fn transitions(&self) -> Vec<Transition> {
        self.transitions.to_vec()
    }

    /// Returns the number of sessions that completed a handshake.
    #[must_use]
    pub fn sessions(&self) -> u64 {
        self.sessions
    }

    /// Opens a connection and authenticates, bounded by the connect timeout.
    ///
    /// A no-op if a session is already streaming.
    ///
    /// # Errors
    /// Returns [`ConnectionError`] if the connection or handshake fails or
    /// does not finish before the deadline.
    pub async fn connect(&mut self) -> Result<(), ConnectionError> {
        if self.session.is_some() {
            return Ok(());
        }

        self.transition(ConnectionState::Connecting);
        let deadline = Instant::now() + self.config.connect_timeout;

        let stream = timeout_at(deadline, self.connector.connect())
            .await
            .map_err(|_| ConnectionError::ConnectTimeout)??;

        self.transition(ConnectionState::Authenticating);
        let session = timeout_at(
            deadline,
            FeedSession::handshake(stream, &self.secret, self.config.session.clone()),
        )
        .await
        .map_err(|_| ConnectionError::HandshakeTimeout)??;

        self.transition(ConnectionState::Streaming);
        self.backoff.reset();
        self.sessions += 1;
        self.session = Some(session);
        Ok(())
    }

    /// Returns the next transport event, connecting or reconnecting as needed.
    ///
    /// Transport failures never surface as errors here; they become
    /// [`TransportEvent::Disconnected`] followed by a backoff and a new
    /// session.
    ///
    /// # Errors
    /// Returns [`ConnectionError::Rejected`] if the exchange refuses the
    /// credentials before any session succeeded, and
    /// [`ConnectionError::MaxReconnectAttempts`] once a configured attempt
    /// limit is exhausted.
    pub async fn next_event(&mut self) -> Result<TransportEvent, ConnectionError> {
        loop {
            if let Some(session) = self.session.as_mut() {
                match session.next_item().await {
                    FeedItem::Frame(frame) => return Ok(TransportEvent::Frame(frame)),
                    FeedItem::Disconnected(reason) => {
                        self.session = None;
                        tracing::warn!(
                            "feed {} disconnected: {}",
                            self.connector.endpoint(),
                            reason
                        );
                        self.schedule_reconnect()?;
                        return Ok(TransportEvent::Disconnected(reason));
                    }
                }
            }

            if let Some(delay) = self.pending_delay.take() {
                tracing::info!("Reconnecting in {:?}...", delay);
                tokio::time::sleep(delay).await;
            }

            match self.connect().await {
                Ok(()) => {
                    let welcome = self
                        .session
                        .as_ref()
                        .map(|s| s.welcome().to_string())
                        .unwrap_or_default();
                    tracing::info!(
                        "Connected to {} (session {}): {}",
                        self.connector.endpoint(),
                        self.sessions,
                        welcome
                    );
                    return Ok(TransportEvent::Connected {
                        resumed: self.sessions > 1,
                        welcome,
                    });
                }
                Err(e) if e.is_rejection() && self.sessions == 0 => {
                    tracing::error!("credentials rejected by {}: {}", self.connector.endpoint(), e);
                    self.transition(ConnectionState::Disconnected);
                    return Err(e);
                }
                Err(e) => {
                    tracing::error!("Connection error: {}", e);
                    self.schedule_reconnect()?;
                }
            }
        }
    }

    /// Closes the current session, if any, and returns to `Disconnected`.
    pub async fn close(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.close().await {
                tracing::debug!("error closing feed session: {}", e);
            }
        }
        self.pending_delay = None;
        self.transition(ConnectionState::Disconnected);
    }

    fn schedule_reconnect(&mut self) -> Result<(), ConnectionError> {
        match self.backoff.next_delay() {
            Some(delay) => {
                self.transition(ConnectionState::Reconnecting);
                self.pending_delay = Some(delay);
                Ok(())
            }
            None => {
                tracing::error!(
                    "giving up on {} after {} failed attempts",
                    self.connector.endpoint(),
                    self.backoff.failures()
                );
                self.transition(ConnectionState::Disconnected);
                Err(ConnectionError::MaxReconnectAttempts)
            }
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        let from = self.state;
        if from == next {
            return;
        }
        if !from.can_transition_to(next) {
            tracing::warn!("unexpected connection transition {} -> {}", from, next);
        }
        tracing::debug!("connection state {} -> {}", from, next);
        self.state = next;
        self.shared_state.set(next);
        self.transitions.push(Transition { from, to: next });
    }
}

impl fmt::Debug for FeedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedTransport")
            .field("endpoint", &self.connector.endpoint())
            .field("state", &self.state)
            .field("sessions", &self.sessions)
            .finish_non_exhaustive()
    }
}
