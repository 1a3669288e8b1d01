//! One authenticated feed connection.
//!
//! The session owns the framed stream, performs the credential handshake,
//! sends keepalive pings and turns a silent or broken connection into a
//! [`FeedItem::Disconnected`] marker instead of an error.

use crate::connector::BoxedStream;
use crate::error::ConnectionError;
use crate::framing::FeedFrameCodec;
use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::{Instant, sleep_until};
use tokio_util::codec::Framed;

/// Messages the client sends to the exchange.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage<'a> {
    /// Credential exchange.
    Auth {
        /// Team secret.
        team_secret: &'a str,
    },
    /// Market data subscription.
    Subscribe {
        /// Request a full book snapshot for every instrument.
        snapshot: bool,
    },
    /// Keepalive.
    Ping,
}

impl ClientMessage<'_> {
    fn to_bytes(&self) -> Result<Vec<u8>, ConnectionError> {
        serde_json::to_vec(self).map_err(|e| ConnectionError::protocol(e.to_string()))
    }
}

#[derive(Deserialize)]
struct HandshakeReply {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    message: String,
}

/// Timing and framing settings for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Interval between outbound pings.
    pub heartbeat_interval: Duration,
    /// Inbound silence after which the connection is declared stalled.
    pub heartbeat_timeout: Duration,
    /// Maximum frame size in bytes.
    pub max_frame_size: usize,
    /// Whether to ask for full snapshots after the handshake.
    pub request_snapshot: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(15),
            max_frame_size: crate::framing::DEFAULT_MAX_FRAME_SIZE,
            request_snapshot: true,
        }
    }
}

/// Why a session stopped producing frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The exchange closed the stream.
    ClosedByPeer,
    /// No inbound frame within the heartbeat timeout.
    HeartbeatStalled,
    /// Read or write failure, including oversized frames.
    Io(String),
    /// The local side closed the session.
    Shutdown,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClosedByPeer => f.write_str("closed by peer"),
            Self::HeartbeatStalled => f.write_str("heartbeat stalled"),
            Self::Io(message) => write!(f, "io failure: {message}"),
            Self::Shutdown => f.write_str("shutdown"),
        }
    }
}

/// Item yielded by [`FeedSession::next_item`].
#[derive(Debug)]
pub enum FeedItem {
    /// Raw market frame payload.
    Frame(BytesMut),
    /// Terminal marker; the session yields nothing else afterwards.
    Disconnected(DisconnectReason),
}

/// Authenticated feed connection.
pub struct FeedSession {
    framed: Framed<BoxedStream, FeedFrameCodec>,
    config: SessionConfig,
    welcome: String,
    last_inbound: Instant,
    next_ping: Instant,
    ended: Option<DisconnectReason>,
}

impl FeedSession {
    /// Performs the credential handshake over a freshly opened stream.
    ///
    /// Sends `auth`, waits for `welcome` (or `error`), then sends `subscribe`.
    /// The caller bounds the whole exchange with its own timeout.
    ///
    /// # Errors
    /// Returns [`ConnectionError::Rejected`] if the exchange refuses the
    /// credentials, or another [`ConnectionError`] on IO/protocol failure.
    pub async fn handshake(
        stream: BoxedStream,
        secret: &str,
        config: SessionConfig,
    ) -> Result<Self, ConnectionError> {
        let mut framed = Framed::new(stream, FeedFrameCodec::new(config.max_frame_size));

        let auth = ClientMessage::Auth {
            team_secret: secret,
        }
        .to_bytes()?;
        framed.send(auth).await?;

        let reply = match framed.next().await {
            Some(frame) => frame?,
            None => return Err(ConnectionError::ConnectionClosed),
        };
        let reply: HandshakeReply = serde_json::from_slice(&reply)
            .map_err(|e| ConnectionError::protocol(format!("bad handshake reply: {e}")))?;

        let welcome = match reply.kind.as_str() {
            "welcome" => reply.message,
            "error" | "auth_rejected" => {
                return Err(ConnectionError::Rejected {
                    message: reply.message,
                });
            }
            other => {
                return Err(ConnectionError::protocol(format!(
                    "expected welcome, got {other}"
                )));
            }
        };

        if config.request_snapshot {
            let subscribe = ClientMessage::Subscribe { snapshot: true }.to_bytes()?;
            framed.send(subscribe).await?;
        }

        let now = Instant::now();
        Ok(Self {
            framed,
            last_inbound: now,
            next_ping: now + config.heartbeat_interval,
            config,
            welcome,
            ended: None,
        })
    }

    /// Returns the exchange welcome message.
    #[must_use]
    pub fn welcome(&self) -> &str {
        &self.welcome
    }

    /// Waits for the next frame.
    ///
    /// Pings are sent while waiting. Once a [`FeedItem::Disconnected`] has been
    /// returned, every further call returns the same marker.
    pub async fn next_item(&mut self) -> FeedItem {
        if let Some(reason) = &self.ended {
            return FeedItem::Disconnected(reason.clone());
        }

        loop {
            let stall_at = self.last_inbound + self.config.heartbeat_timeout;
            let ping_at = self.next_ping;

            tokio::select! {
                frame = self.framed.next() => {
                    return match frame {
                        Some(Ok(bytes)) => {
                            self.last_inbound = Instant::now();
                            FeedItem::Frame(bytes)
                        }
                        Some(Err(e)) => self.end(DisconnectReason::Io(e.to_string())),
                        None => self.end(DisconnectReason::ClosedByPeer),
                    };
                }

                () = sleep_until(stall_at) => {
                    return self.end(DisconnectReason::HeartbeatStalled);
                }

                () = sleep_until(ping_at) => {
                    self.next_ping = Instant::now() + self.config.heartbeat_interval;
                    let ping = match ClientMessage::Ping.to_bytes() {
                        Ok(ping) => ping,
                        Err(e) => return self.end(DisconnectReason::Io(e.to_string())),
                    };
                    if let Err(e) = self.framed.send(ping).await {
                        return self.end(DisconnectReason::Io(e.to_string()));
                    }
                    tracing::trace!("keepalive ping sent");
                }
            }
        }
    }

    /// Closes the session.
    pub async fn close(mut self) -> std::io::Result<()> {
        self.ended = Some(DisconnectReason::Shutdown);
        SinkExt::<&[u8]>::close(&mut self.framed).await
    }

    fn end(&mut self, reason: DisconnectReason) -> FeedItem {
        self.ended = Some(reason.clone());
        FeedItem::Disconnected(reason)
    }
}

impl fmt::Debug for FeedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedSession")
            .field("welcome", &self.welcome)
            .field("ended", &self.ended)
            .finish_non_exhaustive()
    }
}
