//! Feed frame decoder.
//!
//! Frames are JSON objects tagged by a `"type"` field. Decoding is total: any
//! malformed input becomes a [`DecodeError`], the failure counter is bumped and
//! the caller skips the frame.

use crate::event::{BookDelta, BookSnapshot, CandleUpdate, DomainEvent, MarketEvent, Trade};
use crate::types::{Instrument, InstrumentKind, Price, PriceLevel, Quantity, Side};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Error type for decoding operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Frame is not valid JSON or does not match the expected shape.
    #[error("malformed frame: {message}")]
    Malformed {
        /// Parser message.
        message: String,
    },

    /// The `"type"` tag is not one the decoder knows.
    #[error("unknown frame type: {tag}")]
    UnknownType {
        /// Tag found in the frame.
        tag: String,
    },

    /// A field required for this frame type is absent.
    #[error("missing field: {field}")]
    MissingField {
        /// Field name.
        field: &'static str,
    },

    /// Price could not be parsed or is not positive.
    #[error("invalid price: {value}")]
    InvalidPrice {
        /// Offending value as text.
        value: String,
    },

    /// Side is neither bid nor ask.
    #[error("invalid side: {value}")]
    InvalidSide {
        /// Offending value.
        value: String,
    },

    /// Instrument definition is inconsistent.
    #[error("invalid instrument {instrument_id}: {reason}")]
    InvalidInstrument {
        /// Instrument identifier.
        instrument_id: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Aggregate frame passed to the single-event decoder.
    #[error("frame carries {events} events, use decode_frame")]
    BatchFrame {
        /// Number of events in the frame.
        events: usize,
    },
}

impl DecodeError {
    fn malformed(err: serde_json::Error) -> Self {
        Self::Malformed {
            message: err.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
struct WireInstrument {
    instrument_id: String,
    kind: Option<String>,
    underlying: Option<String>,
    strike: Option<Price>,
    expiry: Option<u64>,
}

#[derive(Deserialize)]
struct WireDelta {
    instrument_id: String,
    seq: u64,
    side: String,
    price: Price,
    quantity: Quantity,
    time: Option<u64>,
}

#[derive(Deserialize)]
struct WireLevel {
    price: Price,
    quantity: Quantity,
}

#[derive(Deserialize)]
struct WireSnapshot {
    instrument_id: String,
    seq: u64,
    #[serde(default)]
    bids: Vec<WireLevel>,
    #[serde(default)]
    asks: Vec<WireLevel>,
    time: Option<u64>,
}

#[derive(Deserialize)]
struct WireTrade {
    instrument_id: String,
    seq: Option<u64>,
    price: Price,
    quantity: Quantity,
    side: String,
    time: Option<u64>,
}

#[derive(Deserialize)]
struct WireHeartbeat {
    time: Option<u64>,
}

#[derive(Deserialize)]
struct WireDepth {
    #[serde(default)]
    bids: BTreeMap<String, Quantity>,
    #[serde(default)]
    asks: BTreeMap<String, Quantity>,
}

#[derive(Deserialize, Default)]
struct WireCandles {
    #[serde(default)]
    tradeable: BTreeMap<String, Vec<serde_json::Value>>,
    #[serde(default)]
    untradeable: BTreeMap<String, Vec<serde_json::Value>>,
}

#[derive(Deserialize)]
struct WireMarketData {
    time: Option<u64>,
    #[serde(default)]
    candles: WireCandles,
    #[serde(default)]
    orderbook_depths: BTreeMap<String, WireDepth>,
    #[serde(default)]
    events: Vec<serde_json::Value>,
}

/// Decoder turning raw feed frames into [`DomainEvent`]s.
#[derive(Debug, Default)]
pub struct EventDecoder {
    errors: AtomicU64,
}

impl EventDecoder {
    /// Creates a new decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes a frame holding exactly one event.
    ///
    /// # Errors
    /// Returns [`DecodeError`] if the frame is malformed, has an unknown tag, or
    /// is an aggregate `market_data_update` frame.
    pub fn decode(&self, frame: &[u8]) -> Result<DomainEvent, DecodeError> {
        let result = match self.decode_inner(frame) {
            Ok(mut events) if events.len() == 1 => Ok(events.remove(0)),
            Ok(events) => Err(DecodeError::BatchFrame {
                events: events.len(),
            }),
            Err(e) => Err(e),
        };
        if result.is_err() {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Decodes any frame, including aggregate frames, into its events.
    ///
    /// # Errors
    /// Returns [`DecodeError`] if the frame is malformed or has an unknown tag.
    pub fn decode_frame(&self, frame: &[u8]) -> Result<Vec<DomainEvent>, DecodeError> {
        let result = self.decode_inner(frame);
        if result.is_err() {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Returns the number of frames rejected so far.
    #[must_use]
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Expands an aggregate frame. A bad embedded event is skipped and counted;
    /// the rest of the frame still applies.
    fn market_data_from_wire(
        &self,
        wire: WireMarketData,
    ) -> Result<Vec<DomainEvent>, DecodeError> {
        let time = wire.time.ok_or(DecodeError::MissingField { field: "time" })?;
        let mut events = Vec::with_capacity(
            wire.orderbook_depths.len()
                + wire.events.len()
                + wire.candles.tradeable.len()
                + wire.candles.untradeable.len(),
        );

        for (instrument_id, depth) in wire.orderbook_depths {
            events.push(DomainEvent::BookSnapshot(BookSnapshot {
                bids: depth_side(depth.bids)?,
                asks: depth_side(depth.asks)?,
                instrument_id,
                seq: time,
                exchange_time: Some(time),
            }));
        }

        let series = wire
            .candles
            .tradeable
            .into_iter()
            .map(|entry| (true, entry))
            .chain(wire.candles.untradeable.into_iter().map(|entry| (false, entry)));
        for (tradeable, (instrument_id, candles)) in series {
            events.push(DomainEvent::Candles(CandleUpdate {
                instrument_id,
                tradeable,
                candles,
                exchange_time: Some(time),
            }));
        }

        for raw in wire.events {
            let is_trade = raw.get("type").and_then(serde_json::Value::as_str) == Some("trade");
            let decoded = if is_trade {
                serde_json::from_value::<WireTrade>(raw)
                    .map_err(DecodeError::malformed)
                    .and_then(trade_from_wire)
                    .map(|mut trade| {
                        trade.exchange_time = trade.exchange_time.or(Some(time));
                        DomainEvent::Trade(trade)
                    })
            } else {
                market_event_from_wire(raw, Some(time)).map(DomainEvent::MarketEvent)
            };
            match decoded {
                Ok(event) => events.push(event),
                Err(e) => {
                    self.errors.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("skipping embedded event at {}: {}", time, e);
                }
            }
        }

        Ok(events)
    }

    fn decode_inner(&self, frame: &[u8]) -> Result<Vec<DomainEvent>, DecodeError> {
        let envelope: Envelope = serde_json::from_slice(frame).map_err(DecodeError::malformed)?;

        let event = match envelope.kind.as_str() {
            "instrument" | "instrument_defined" => {
                let wire: WireInstrument = parse(frame)?;
                DomainEvent::InstrumentDefined(instrument_from_wire(wire)?)
            }
            "book_delta" => {
                let wire: WireDelta = parse(frame)?;
                DomainEvent::BookDelta(BookDelta {
                    side: parse_side(&wire.side)?,
                    price: check_price(wire.price)?,
                    instrument_id: wire.instrument_id,
                    seq: wire.seq,
                    quantity: wire.quantity,
                    exchange_time: wire.time,
                })
            }
            "book_snapshot" => {
                let wire: WireSnapshot = parse(frame)?;
                DomainEvent::BookSnapshot(BookSnapshot {
                    bids: levels_from_wire(wire.bids)?,
                    asks: levels_from_wire(wire.asks)?,
                    instrument_id: wire.instrument_id,
                    seq: wire.seq,
                    exchange_time: wire.time,
                })
            }
            "trade" => {
                let wire: WireTrade = parse(frame)?;
                DomainEvent::Trade(trade_from_wire(wire)?)
            }
            "heartbeat" | "pong" => {
                let wire: WireHeartbeat = parse(frame)?;
                DomainEvent::HeartbeatNoop {
                    exchange_time: wire.time,
                }
            }
            "settlement" => {
                let raw: serde_json::Value = parse(frame)?;
                DomainEvent::MarketEvent(market_event_from_wire(raw, None)?)
            }
            "market_data_update" => {
                let wire: WireMarketData = parse(frame)?;
                return self.market_data_from_wire(wire);
            }
            other => {
                return Err(DecodeError::UnknownType {
                    tag: other.to_string(),
                });
            }
        };

        Ok(vec![event])
    }
}

fn parse<'a, T: Deserialize<'a>>(frame: &'a [u8]) -> Result<T, DecodeError> {
    serde_json::from_slice(frame).map_err(DecodeError::malformed)
}

fn parse_side(value: &str) -> Result<Side, DecodeError> {
    Side::from_str(value).map_err(|()| DecodeError::InvalidSide {
        value: value.to_string(),
    })
}

fn check_price(price: Price) -> Result<Price, DecodeError> {
    if price.is_sign_positive() && !price.is_zero() {
        Ok(price)
    } else {
        Err(DecodeError::InvalidPrice {
            value: price.to_string(),
        })
    }
}

fn parse_price(value: &str) -> Result<Price, DecodeError> {
    let price = Price::from_str(value).map_err(|_| DecodeError::InvalidPrice {
        value: value.to_string(),
    })?;
    check_price(price)
}

fn levels_from_wire(levels: Vec<WireLevel>) -> Result<Vec<PriceLevel>, DecodeError> {
    levels
        .into_iter()
        .map(|l| Ok(PriceLevel::new(check_price(l.price)?, l.quantity)))
        .collect()
}

fn depth_side(side: BTreeMap<String, Quantity>) -> Result<Vec<PriceLevel>, DecodeError> {
    side.into_iter()
        .map(|(price, quantity)| Ok(PriceLevel::new(parse_price(&price)?, quantity)))
        .collect()
}

fn instrument_from_wire(wire: WireInstrument) -> Result<Instrument, DecodeError> {
    let mut instrument = Instrument::from_id(wire.instrument_id);

    if let Some(kind) = wire.kind {
        instrument.kind =
            InstrumentKind::from_str(&kind).map_err(|()| DecodeError::InvalidInstrument {
                instrument_id: instrument.id.clone(),
                reason: format!("unknown kind {kind}"),
            })?;
    }
    if let Some(underlying) = wire.underlying {
        instrument.underlying = underlying;
    }
    if let Some(strike) = wire.strike {
        instrument.strike = Some(check_price(strike)?);
    }
    if wire.expiry.is_some() {
        instrument.expiry = wire.expiry;
    }

    if instrument.kind.is_option() && instrument.strike.is_none() {
        return Err(DecodeError::InvalidInstrument {
            instrument_id: instrument.id,
            reason: "option without strike".to_string(),
        });
    }
    Ok(instrument)
}

fn trade_from_wire(wire: WireTrade) -> Result<Trade, DecodeError> {
    Ok(Trade {
        side: parse_side(&wire.side)?,
        price: check_price(wire.price)?,
        instrument_id: wire.instrument_id,
        seq: wire.seq,
        quantity: wire.quantity,
        exchange_time: wire.time,
    })
}

fn market_event_from_wire(
    raw: serde_json::Value,
    frame_time: Option<u64>,
) -> Result<MarketEvent, DecodeError> {
    let kind = raw
        .get("type")
        .and_then(serde_json::Value::as_str)
        .ok_or(DecodeError::MissingField { field: "type" })?
        .to_string();
    let instrument_id = raw
        .get("instrument_id")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string);
    let exchange_time = raw
        .get("time")
        .and_then(serde_json::Value::as_u64)
        .or(frame_time);
    Ok(MarketEvent {
        kind,
        instrument_id,
        payload: raw,
        exchange_time,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_decode_book_delta() {
        let decoder = EventDecoder::new();
        let frame = br#"{"type":"book_delta","instrument_id":"F-2025","seq":3,"side":"bid","price":"100.00","quantity":5,"time":17}"#;

        let event = decoder.decode(frame).unwrap();
        assert_eq!(
            event,
            DomainEvent::BookDelta(BookDelta {
                instrument_id: "F-2025".to_string(),
                seq: 3,
                side: Side::Bid,
                price: dec!(100.00),
                quantity: 5,
                exchange_time: Some(17),
            })
        );
        assert_eq!(decoder.errors(), 0);
    }

    #[test]
    fn test_decode_numeric_price_and_side_alias() {
        let decoder = EventDecoder::new();
        let frame = br#"{"type":"book_delta","instrument_id":"X","seq":1,"side":"sell","price":101,"quantity":2}"#;

        match decoder.decode(frame).unwrap() {
            DomainEvent::BookDelta(delta) => {
                assert_eq!(delta.side, Side::Ask);
                assert_eq!(delta.price, dec!(101));
                assert_eq!(delta.exchange_time, None);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_decode_snapshot() {
        let decoder = EventDecoder::new();
        let frame = br#"{"type":"book_snapshot","instrument_id":"F-2025","seq":10,
            "bids":[{"price":"99.5","quantity":4}],"asks":[{"price":"100.5","quantity":3}]}"#;

        match decoder.decode(frame).unwrap() {
            DomainEvent::BookSnapshot(snapshot) => {
                assert_eq!(snapshot.seq, 10);
                assert_eq!(snapshot.bids, vec![PriceLevel::new(dec!(99.5), 4)]);
                assert_eq!(snapshot.asks, vec![PriceLevel::new(dec!(100.5), 3)]);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_decode_instrument_infers_from_id() {
        let decoder = EventDecoder::new();
        let frame = br#"{"type":"instrument","instrument_id":"$CARD_call_105_120"}"#;

        match decoder.decode(frame).unwrap() {
            DomainEvent::InstrumentDefined(inst) => {
                assert_eq!(inst.kind, InstrumentKind::Call);
                assert_eq!(inst.strike, Some(dec!(105)));
                assert_eq!(inst.expiry, Some(120));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_decode_instrument_explicit_fields() {
        let decoder = EventDecoder::new();
        let frame = br#"{"type":"instrument","instrument_id":"F-2025","kind":"future","underlying":"F","expiry":2025}"#;

        match decoder.decode(frame).unwrap() {
            DomainEvent::InstrumentDefined(inst) => {
                assert_eq!(inst, Instrument::future("F-2025", "F", 2025));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_decode_option_without_strike_rejected() {
        let decoder = EventDecoder::new();
        let frame = br#"{"type":"instrument","instrument_id":"OPT1","kind":"call"}"#;
        assert!(matches!(
            decoder.decode(frame),
            Err(DecodeError::InvalidInstrument { .. })
        ));
    }

    #[test]
    fn test_decode_trade_and_heartbeat() {
        let decoder = EventDecoder::new();
        let trade = br#"{"type":"trade","instrument_id":"F-2025","price":"100.25","quantity":1,"side":"buy","time":9}"#;
        assert!(matches!(
            decoder.decode(trade),
            Ok(DomainEvent::Trade(Trade { quantity: 1, side: Side::Bid, .. }))
        ));

        let heartbeat = br#"{"type":"heartbeat","time":11}"#;
        assert_eq!(
            decoder.decode(heartbeat).unwrap(),
            DomainEvent::HeartbeatNoop {
                exchange_time: Some(11)
            }
        );
    }

    #[test]
    fn test_decode_errors_are_counted() {
        let decoder = EventDecoder::new();

        assert!(matches!(
            decoder.decode(b"not json"),
            Err(DecodeError::Malformed { .. })
        ));
        assert!(matches!(
            decoder.decode(br#"{"type":"mystery"}"#),
            Err(DecodeError::UnknownType { tag }) if tag == "mystery"
        ));
        assert!(matches!(
            decoder.decode(br#"{"type":"book_delta","instrument_id":"X","seq":1,"side":"up","price":"1","quantity":1}"#),
            Err(DecodeError::InvalidSide { .. })
        ));
        assert!(matches!(
            decoder.decode(br#"{"type":"book_delta","instrument_id":"X","seq":1,"side":"bid","price":"-1","quantity":1}"#),
            Err(DecodeError::InvalidPrice { .. })
        ));
        assert!(matches!(
            decoder.decode(br#"{"type":"book_delta","instrument_id":"X","side":"bid","price":"1","quantity":1}"#),
            Err(DecodeError::Malformed { .. })
        ));
        assert!(matches!(
            decoder.decode(br#"{"type":"book_delta","instrument_id":"X","seq":1,"side":"bid","price":"1","quantity":-4}"#),
            Err(DecodeError::Malformed { .. })
        ));

        assert_eq!(decoder.errors(), 6);
    }

    #[test]
    fn test_decode_market_data_update() {
        let decoder = EventDecoder::new();
        let frame = br#"{"type":"market_data_update","time":500,
            "candles":{"tradeable":{},"untradeable":{}},
            "orderbook_depths":{
                "$CARD_future_60":{"bids":{"99":3,"98":1},"asks":{"101":2}},
                "$CARD_call_100_60":{"bids":{},"asks":{"5":7}}
            },
            "events":[
                {"type":"trade","instrument_id":"$CARD_future_60","price":100,"quantity":1,"side":"bid"},
                {"type":"settlement","instrument_id":"$CARD_future_30"}
            ]}"#;

        let events = decoder.decode_frame(frame).unwrap();
        assert_eq!(events.len(), 4);

        let snapshots: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                DomainEvent::BookSnapshot(s) => Some(s),
                _ => None,
            })
            .collect();
        assert_eq!(snapshots.len(), 2);
        assert!(snapshots.iter().all(|s| s.seq == 500));

        let future = snapshots
            .iter()
            .find(|s| s.instrument_id == "$CARD_future_60")
            .unwrap();
        assert_eq!(future.bids.len(), 2);
        assert_eq!(future.asks, vec![PriceLevel::new(dec!(101), 2)]);

        assert!(matches!(
            &events[2],
            DomainEvent::Trade(Trade { exchange_time: Some(500), .. })
        ));
        match &events[3] {
            DomainEvent::MarketEvent(event) => {
                assert_eq!(event.kind, "settlement");
                assert_eq!(event.instrument_id.as_deref(), Some("$CARD_future_30"));
                assert_eq!(event.exchange_time, Some(500));
            }
            other => panic!("unexpected event {other:?}"),
        }

        // The single-event entry point refuses aggregate frames.
        assert!(matches!(
            decoder.decode(frame),
            Err(DecodeError::BatchFrame { events: 4 })
        ));
    }

    #[test]
    fn test_market_data_update_requires_time() {
        let decoder = EventDecoder::new();
        assert_eq!(
            decoder.decode_frame(br#"{"type":"market_data_update","orderbook_depths":{}}"#),
            Err(DecodeError::MissingField { field: "time" })
        );
    }

    #[test]
    fn test_market_data_update_candles() {
        let decoder = EventDecoder::new();
        let frame = br#"{"type":"market_data_update","time":42,
            "candles":{
                "tradeable":{"$CARD_future_60":[{"open":99,"close":101}]},
                "untradeable":{"$CARD":[{"open":50,"close":52},{"open":52,"close":51}]}
            }}"#;

        let events = decoder.decode_frame(frame).unwrap();
        let updates: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                DomainEvent::Candles(update) => Some(update),
                _ => None,
            })
            .collect();
        assert_eq!(updates.len(), 2);
        assert!(updates[0].tradeable);
        assert_eq!(updates[0].instrument_id, "$CARD_future_60");
        assert!(!updates[1].tradeable);
        assert_eq!(updates[1].candles.len(), 2);
        assert_eq!(updates[1].exchange_time, Some(42));
    }

    #[test]
    fn test_bad_embedded_trade_is_counted_and_skipped() {
        let decoder = EventDecoder::new();
        let frame = br#"{"type":"market_data_update","time":7,
            "events":[
                {"type":"trade","instrument_id":"F-2025","price":"-3","quantity":1,"side":"bid"},
                {"type":"trade","instrument_id":"F-2025","price":100,"quantity":2,"side":"ask"},
                {"instrument_id":"F-2025"}
            ]}"#;

        let events = decoder.decode_frame(frame).unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            DomainEvent::Trade(Trade { quantity: 2, side: Side::Ask, .. })
        ));
        assert_eq!(decoder.errors(), 2);
    }

    #[test]
    fn test_decode_settlement() {
        let decoder = EventDecoder::new();
        let frame = br#"{"type":"settlement","instrument_id":"$CARD_future_30","price":104,"time":90}"#;

        match decoder.decode(frame).unwrap() {
            DomainEvent::MarketEvent(event) => {
                assert_eq!(event.kind, "settlement");
                assert_eq!(event.instrument_id.as_deref(), Some("$CARD_future_30"));
                assert_eq!(event.exchange_time, Some(90));
                assert_eq!(event.payload["price"], 104);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
