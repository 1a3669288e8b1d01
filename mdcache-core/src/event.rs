//! Typed domain events produced by the decoder.

use crate::types::{Instrument, Price, PriceLevel, Quantity, Side};

/// Incremental book update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookDelta {
    /// Instrument identifier.
    pub instrument_id: String,
    /// Per-instrument sequence number.
    pub seq: u64,
    /// Side (bid or ask).
    pub side: Side,
    /// Price level.
    pub price: Price,
    /// New aggregate quantity (0 = delete level).
    pub quantity: Quantity,
    /// Exchange timestamp, if the frame carried one.
    pub exchange_time: Option<u64>,
}

/// Full replacement of one instrument's book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookSnapshot {
    /// Instrument identifier.
    pub instrument_id: String,
    /// Sequence number the book is current as of.
    pub seq: u64,
    /// Bid levels.
    pub bids: Vec<PriceLevel>,
    /// Ask levels.
    pub asks: Vec<PriceLevel>,
    /// Exchange timestamp, if the frame carried one.
    pub exchange_time: Option<u64>,
}

/// Executed trade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trade {
    /// Instrument identifier.
    pub instrument_id: String,
    /// Sequence number, when the feed assigns one to trades.
    pub seq: Option<u64>,
    /// Execution price.
    pub price: Price,
    /// Executed quantity.
    pub quantity: Quantity,
    /// Aggressor side.
    pub side: Side,
    /// Exchange timestamp, if the frame carried one.
    pub exchange_time: Option<u64>,
}

/// Latest candle series for one instrument.
///
/// Candles are carried through as the exchange sends them; the cache does not
/// interpret their fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandleUpdate {
    /// Instrument identifier.
    pub instrument_id: String,
    /// Whether the instrument is listed as tradeable.
    pub tradeable: bool,
    /// Candle records, oldest first.
    pub candles: Vec<serde_json::Value>,
    /// Exchange timestamp of the frame.
    pub exchange_time: Option<u64>,
}

/// Exchange notice with no effect on books, such as a settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketEvent {
    /// The event's own `"type"` tag.
    pub kind: String,
    /// Instrument the notice refers to, when it names one.
    pub instrument_id: Option<String>,
    /// Raw event body.
    pub payload: serde_json::Value,
    /// Exchange timestamp, if known.
    pub exchange_time: Option<u64>,
}

/// Closed set of events the order book store understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    /// A new instrument definition.
    InstrumentDefined(Instrument),
    /// A single level change.
    BookDelta(BookDelta),
    /// A full book replacement.
    BookSnapshot(BookSnapshot),
    /// A fill.
    Trade(Trade),
    /// Candle series refresh.
    Candles(CandleUpdate),
    /// Any other exchange notice.
    MarketEvent(MarketEvent),
    /// Keepalive with no market content.
    HeartbeatNoop {
        /// Exchange timestamp, if the frame carried one.
        exchange_time: Option<u64>,
    },
}

impl DomainEvent {
    /// Returns the instrument the event refers to, if any.
    #[must_use]
    pub fn instrument_id(&self) -> Option<&str> {
        match self {
            Self::InstrumentDefined(inst) => Some(&inst.id),
            Self::BookDelta(delta) => Some(&delta.instrument_id),
            Self::BookSnapshot(snapshot) => Some(&snapshot.instrument_id),
            Self::Trade(trade) => Some(&trade.instrument_id),
            Self::Candles(update) => Some(&update.instrument_id),
            Self::MarketEvent(event) => event.instrument_id.as_deref(),
            Self::HeartbeatNoop { .. } => None,
        }
    }

    /// Returns the exchange timestamp carried by the event.
    #[must_use]
    pub fn exchange_time(&self) -> Option<u64> {
        match self {
            Self::InstrumentDefined(_) => None,
            Self::BookDelta(delta) => delta.exchange_time,
            Self::BookSnapshot(snapshot) => snapshot.exchange_time,
            Self::Trade(trade) => trade.exchange_time,
            Self::Candles(update) => update.exchange_time,
            Self::MarketEvent(event) => event.exchange_time,
            Self::HeartbeatNoop { exchange_time } => *exchange_time,
        }
    }

    /// Short name used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::InstrumentDefined(_) => "instrument_defined",
            Self::BookDelta(_) => "book_delta",
            Self::BookSnapshot(_) => "book_snapshot",
            Self::Trade(_) => "trade",
            Self::Candles(_) => "candles",
            Self::MarketEvent(_) => "market_event",
            Self::HeartbeatNoop { .. } => "heartbeat",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_instrument_id_accessor() {
        let event = DomainEvent::BookDelta(BookDelta {
            instrument_id: "F-2025".to_string(),
            seq: 1,
            side: Side::Bid,
            price: dec!(100.00),
            quantity: 5,
            exchange_time: Some(7),
        });
        assert_eq!(event.instrument_id(), Some("F-2025"));
        assert_eq!(event.exchange_time(), Some(7));
        assert_eq!(event.name(), "book_delta");

        let heartbeat = DomainEvent::HeartbeatNoop {
            exchange_time: None,
        };
        assert_eq!(heartbeat.instrument_id(), None);
    }

    #[test]
    fn test_market_event_accessors() {
        let settlement = DomainEvent::MarketEvent(MarketEvent {
            kind: "settlement".to_string(),
            instrument_id: Some("F-2025".to_string()),
            payload: serde_json::json!({"type": "settlement", "price": 101}),
            exchange_time: Some(30),
        });
        assert_eq!(settlement.instrument_id(), Some("F-2025"));
        assert_eq!(settlement.exchange_time(), Some(30));
        assert_eq!(settlement.name(), "market_event");

        let notice = DomainEvent::MarketEvent(MarketEvent {
            kind: "halt".to_string(),
            instrument_id: None,
            payload: serde_json::Value::Null,
            exchange_time: None,
        });
        assert_eq!(notice.instrument_id(), None);
    }
}
