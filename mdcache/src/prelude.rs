//! Prelude module for convenient imports.
//!
//! ```ignore
//! use mdcache::prelude::*;
//! ```

// Facade
pub use crate::{
    CacheConfig, CacheError, ConfigurationError, MarketDataCache, MarketSummary,
    PeriodicReporter, StartState,
};

// Domain types
pub use mdcache_core::{
    ConnectionState, DecodeError, DomainEvent, Instrument, InstrumentKind, Price, PriceLevel,
    Quantity, Side,
};

// Read surface
pub use mdcache_book::{
    BookView, CacheStatistics, CandleSeries, InstrumentInfo, RecentEvent, RecentEventKind,
    StoreReader, SyncState, TopOfBook,
};

// Transport
pub use mdcache_transport::{ConnectionError, Connector, ReconnectConfig, TcpConnector};
