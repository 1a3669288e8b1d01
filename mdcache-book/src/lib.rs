//! # mdcache Book
//!
//! Order book store for mdcache.
//!
//! This crate provides:
//! - Per-instrument order books with decimal price levels
//! - Sequence-based duplicate suppression and crossed-book detection
//! - Snapshot resynchronization with queued delta replay
//! - Immutable book views published through atomically swapped references
//! - Bounded per-instrument book history and the latest candle series
//! - A bounded, lock-free recent-events buffer and aggregate statistics

pub mod book;
pub mod instruments;
pub mod ring;
pub mod stats;
pub mod store;

pub use book::{BookSide, BookView, ConsistencyWarning, OrderBook, SyncState};
pub use instruments::{CandleSeries, InstrumentSlot, Registry};
pub use ring::{RecentEvent, RecentEventKind, RecentEvents};
pub use stats::{CacheStatistics, InstrumentRate};
pub use store::{ApplyOutcome, InstrumentInfo, OrderBookStore, StoreConfig, StoreReader, TopOfBook};
