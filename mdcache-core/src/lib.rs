//! # mdcache Core
//!
//! Domain types and the feed event decoder shared by every mdcache crate.
//!
//! This crate provides:
//! - Instrument, side, price level and connection state vocabulary
//! - The closed [`DomainEvent`] set consumed by the order book store
//! - [`EventDecoder`], turning raw JSON frames into typed events

pub mod decoder;
pub mod event;
pub mod types;

pub use decoder::{DecodeError, EventDecoder};
pub use event::{BookDelta, BookSnapshot, CandleUpdate, DomainEvent, MarketEvent, Trade};
pub use types::{
    ConnectionState, Instrument, InstrumentId, InstrumentKind, Price, PriceLevel, Quantity, Side,
};
