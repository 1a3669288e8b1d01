//! Synthetic feed frames.
//!
//! Prices walk around a fixed mid so generated books stay uncrossed.

use mdcache_core::{BookDelta, BookSnapshot, DomainEvent, Price, PriceLevel, Side};
use rand::SeedableRng;
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rust_decimal::Decimal;
use serde_json::json;

/// Mid price in ticks of 0.25.
const MID_TICKS: i64 = 20_000;

/// Deterministic generator of feed traffic for a set of instruments.
#[derive(Debug)]
pub struct FeedScenario {
    instruments: Vec<String>,
    depth: i64,
    rng: StdRng,
    seq: u64,
}

impl FeedScenario {
    /// Creates a scenario with `instruments` futures and `depth` levels per side.
    #[must_use]
    pub fn new(instruments: usize, depth: usize, seed: u64) -> Self {
        Self {
            instruments: (0..instruments)
                .map(|i| format!("BENCH{i}_future_20250321"))
                .collect(),
            depth: depth.max(1) as i64,
            rng: StdRng::seed_from_u64(seed),
            seq: 0,
        }
    }

    /// Returns the instrument identifiers.
    #[must_use]
    pub fn instruments(&self) -> &[String] {
        &self.instruments
    }

    /// Builds a full snapshot event for every instrument.
    pub fn snapshots(&mut self) -> Vec<DomainEvent> {
        self.seq += 1;
        let seq = self.seq;
        let depth = self.depth;
        self.instruments
            .iter()
            .map(|id| {
                DomainEvent::BookSnapshot(BookSnapshot {
                    instrument_id: id.clone(),
                    seq,
                    bids: (1..=depth)
                        .map(|i| PriceLevel::new(tick_price(MID_TICKS - i), 10))
                        .collect(),
                    asks: (1..=depth)
                        .map(|i| PriceLevel::new(tick_price(MID_TICKS + i), 10))
                        .collect(),
                    exchange_time: Some(seq),
                })
            })
            .collect()
    }

    /// Builds `count` deltas spread over the instruments.
    pub fn deltas(&mut self, count: usize) -> Vec<DomainEvent> {
        let instrument = Uniform::from(0..self.instruments.len());
        let offset = Uniform::from(1..=self.depth);
        let quantity = Uniform::from(0..50u64);

        (0..count)
            .map(|_| {
                self.seq += 1;
                let side = if self.seq % 2 == 0 { Side::Bid } else { Side::Ask };
                let ticks = match side {
                    Side::Bid => MID_TICKS - offset.sample(&mut self.rng),
                    Side::Ask => MID_TICKS + offset.sample(&mut self.rng),
                };
                DomainEvent::BookDelta(BookDelta {
                    instrument_id: self.instruments[instrument.sample(&mut self.rng)].clone(),
                    seq: self.seq,
                    side,
                    price: tick_price(ticks),
                    quantity: quantity.sample(&mut self.rng),
                    exchange_time: Some(self.seq),
                })
            })
            .collect()
    }

    /// Builds `count` wire frames for deltas.
    pub fn delta_frames(&mut self, count: usize) -> Vec<Vec<u8>> {
        self.deltas(count).iter().filter_map(delta_frame).collect()
    }

    /// Builds one wire snapshot frame for the first instrument.
    pub fn snapshot_frame(&mut self) -> Vec<u8> {
        let snapshots = self.snapshots();
        let Some(DomainEvent::BookSnapshot(snapshot)) = snapshots.first() else {
            return Vec::new();
        };
        let levels = |levels: &[PriceLevel]| {
            levels
                .iter()
                .map(|l| json!({"price": l.price.to_string(), "quantity": l.quantity}))
                .collect::<Vec<_>>()
        };
        json!({
            "type": "book_snapshot",
            "instrument_id": snapshot.instrument_id,
            "seq": snapshot.seq,
            "bids": levels(&snapshot.bids),
            "asks": levels(&snapshot.asks),
            "time": snapshot.seq,
        })
        .to_string()
        .into_bytes()
    }

    /// Builds one aggregate `market_data_update` frame covering every instrument.
    pub fn market_data_frame(&mut self) -> Vec<u8> {
        self.seq += 1;
        let depth = self.depth;
        let side = |sign: i64| {
            (1..=depth)
                .map(|i| (tick_price(MID_TICKS + sign * i).to_string(), json!(10)))
                .collect::<serde_json::Map<_, _>>()
        };
        let depths = self
            .instruments
            .iter()
            .map(|id| (id.clone(), json!({"bids": side(-1), "asks": side(1)})))
            .collect::<serde_json::Map<_, _>>();
        json!({
            "type": "market_data_update",
            "time": self.seq,
            "orderbook_depths": depths,
            "events": [],
        })
        .to_string()
        .into_bytes()
    }
}

/// Encodes a delta event as a wire frame.
#[must_use]
pub fn delta_frame(event: &DomainEvent) -> Option<Vec<u8>> {
    let DomainEvent::BookDelta(delta) = event else {
        return None;
    };
    Some(
        json!({
            "type": "book_delta",
            "instrument_id": delta.instrument_id,
            "seq": delta.seq,
            "side": delta.side.as_str(),
            "price": delta.price.to_string(),
            "quantity": delta.quantity,
            "time": delta.exchange_time,
        })
        .to_string()
        .into_bytes(),
    )
}

fn tick_price(ticks: i64) -> Price {
    Decimal::new(ticks * 25, 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdcache_core::EventDecoder;

    #[test]
    fn test_scenario_is_deterministic() {
        let a = FeedScenario::new(4, 10, 7).delta_frames(50);
        let b = FeedScenario::new(4, 10, 7).delta_frames(50);
        assert_eq!(a, b);
    }

    #[test]
    fn test_frames_decode() {
        let decoder = EventDecoder::new();
        let mut scenario = FeedScenario::new(3, 5, 1);

        for frame in scenario.delta_frames(20) {
            assert!(matches!(
                decoder.decode(&frame).unwrap(),
                DomainEvent::BookDelta(_)
            ));
        }

        let snapshot = decoder.decode(&scenario.snapshot_frame()).unwrap();
        let DomainEvent::BookSnapshot(snapshot) = snapshot else {
            panic!("expected snapshot");
        };
        assert_eq!(snapshot.bids.len(), 5);
        assert!(snapshot.bids[0].price < snapshot.asks[0].price);

        let events = decoder.decode_frame(&scenario.market_data_frame()).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(decoder.errors(), 0);
    }

    #[test]
    fn test_deltas_never_cross_mid() {
        let mut scenario = FeedScenario::new(1, 3, 42);
        let mid = tick_price(MID_TICKS);
        for event in scenario.deltas(200) {
            let DomainEvent::BookDelta(delta) = event else {
                panic!("expected delta");
            };
            match delta.side {
                Side::Bid => assert!(delta.price < mid),
                Side::Ask => assert!(delta.price > mid),
            }
        }
    }
}
