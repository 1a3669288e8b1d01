//! # mdcache
//!
//! Shared real-time market data cache.
//!
//! One process opens one connection to the exchange feed; any number of
//! strategies read the resulting order books concurrently without ever
//! blocking the writer or seeing a half-applied update.
//!
//! ## Quick Start
//!
//! ```ignore
//! use mdcache::prelude::*;
//!
//! let cache = MarketDataCache::new(CacheConfig::from_env()?)?;
//! cache.start()?;
//!
//! // Hand clones to strategies.
//! let strategy_view = cache.clone();
//! if let Some(top) = strategy_view.best_bid_ask("ES_future_20250321") {
//!     println!("{:?} / {:?}", top.bid, top.ask);
//! }
//!
//! cache.stop().await?;
//! ```
//!
//! ## Crate Organization
//!
//! - [`core`] - Domain types and the feed event decoder
//! - [`transport`] - Framing, handshake, heartbeat and reconnection
//! - [`book`] - Order book store and read surface

pub mod cache;
pub mod config;
pub mod error;
mod ingest;
pub mod prelude;
pub mod reporter;

/// Domain types and the feed event decoder.
pub mod core {
    pub use mdcache_core::*;
}

/// Feed transport.
pub mod transport {
    pub use mdcache_transport::*;
}

/// Order book store.
pub mod book {
    pub use mdcache_book::*;
}

pub use cache::{MarketDataCache, StartState};
pub use config::{CacheConfig, DEFAULT_ENDPOINT};
pub use error::{CacheError, ConfigurationError};
pub use reporter::{InstrumentQuote, MarketSummary, PeriodicReporter};
