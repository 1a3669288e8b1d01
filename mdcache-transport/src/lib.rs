//! # mdcache Transport
//!
//! Reconnecting feed transport for mdcache.
//!
//! This crate provides:
//! - Length-prefixed framing over any async byte stream
//! - Credential handshake, keepalive pings and stall detection
//! - Exponential backoff with jitter between sessions
//! - A state machine observable from other threads
//!
//! # Example
//!
//! ```ignore
//! use mdcache_transport::{FeedTransport, TcpConnector, TransportConfig, TransportEvent};
//! use std::sync::Arc;
//!
//! let connector = Arc::new(TcpConnector::new("127.0.0.1:9001"));
//! let mut transport = FeedTransport::new(connector, "team-secret", TransportConfig::default());
//!
//! while let Ok(event) = transport.next_event().await {
//!     if let TransportEvent::Frame(frame) = event {
//!         println!("{} bytes", frame.len());
//!     }
//! }
//! ```

pub mod connector;
pub mod error;
pub mod framing;
pub mod reconnect;
pub mod session;
pub mod state;
pub mod transport;

pub use connector::{BoxedStream, Connector, FeedIo, TcpConnector};
pub use error::ConnectionError;
pub use framing::{DEFAULT_MAX_FRAME_SIZE, FeedFrameCodec};
pub use reconnect::{Backoff, ReconnectConfig};
pub use session::{ClientMessage, DisconnectReason, FeedItem, FeedSession, SessionConfig};
pub use state::{SharedConnectionState, Transition};
pub use transport::{FeedTransport, TransportConfig, TransportEvent};
