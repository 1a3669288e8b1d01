//! Store counters and aggregate statistics.

use chrono::{DateTime, Utc};
use mdcache_core::InstrumentId;
use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

/// Counters updated by the writer and read by anyone.
#[derive(Debug)]
pub(crate) struct StoreCounters {
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) events_received: AtomicU64,
    pub(crate) decode_errors: AtomicU64,
    pub(crate) reconnects: AtomicU64,
    pub(crate) consistency_warnings: AtomicU64,
    pub(crate) stale_deltas: AtomicU64,
    pub(crate) pending_overflows: AtomicU64,
    pub(crate) trades: AtomicU64,
    pub(crate) candle_updates: AtomicU64,
    pub(crate) market_events: AtomicU64,
    last_event_ms: AtomicI64,
    last_exchange_time: AtomicU64,
    connected_since_ms: AtomicI64,
}

impl StoreCounters {
    pub(crate) fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            events_received: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            consistency_warnings: AtomicU64::new(0),
            stale_deltas: AtomicU64::new(0),
            pending_overflows: AtomicU64::new(0),
            trades: AtomicU64::new(0),
            candle_updates: AtomicU64::new(0),
            market_events: AtomicU64::new(0),
            last_event_ms: AtomicI64::new(0),
            last_exchange_time: AtomicU64::new(0),
            connected_since_ms: AtomicI64::new(0),
        }
    }

    #[inline]
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    pub(crate) fn on_event(&self, now: DateTime<Utc>, exchange_time: Option<u64>) {
        Self::incr(&self.events_received);
        self.last_event_ms
            .store(now.timestamp_millis(), Ordering::Relaxed);
        if let Some(time) = exchange_time {
            self.last_exchange_time.store(time, Ordering::Relaxed);
        }
    }

    pub(crate) fn set_connected(&self, since: Option<DateTime<Utc>>) {
        let ms = since.map_or(0, |t| t.timestamp_millis());
        self.connected_since_ms.store(ms, Ordering::Relaxed);
    }

    pub(crate) fn last_event(&self) -> Option<DateTime<Utc>> {
        millis_to_time(self.last_event_ms.load(Ordering::Relaxed))
    }

    pub(crate) fn last_exchange_time(&self) -> Option<u64> {
        match self.last_exchange_time.load(Ordering::Relaxed) {
            0 => None,
            time => Some(time),
        }
    }

    pub(crate) fn connected_since(&self) -> Option<DateTime<Utc>> {
        millis_to_time(self.connected_since_ms.load(Ordering::Relaxed))
    }
}

fn millis_to_time(ms: i64) -> Option<DateTime<Utc>> {
    if ms == 0 {
        None
    } else {
        DateTime::from_timestamp_millis(ms)
    }
}

/// Returns `to - from` as a std duration, clamped at zero.
pub(crate) fn elapsed(from: DateTime<Utc>, to: DateTime<Utc>) -> Duration {
    (to - from).to_std().unwrap_or_default()
}

/// Update rate of one instrument's book.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstrumentRate {
    /// Instrument identifier.
    pub instrument_id: InstrumentId,
    /// Book updates applied since discovery.
    pub updates: u64,
    /// Average updates per second since discovery.
    pub updates_per_sec: f64,
}

/// Aggregate counters for the whole cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStatistics {
    /// When the store was created.
    pub started_at: DateTime<Utc>,
    /// Time since the store was created.
    pub uptime: Duration,
    /// Time since the current connection was established, if connected.
    pub connection_uptime: Option<Duration>,
    /// Domain events applied.
    pub events_received: u64,
    /// Frames that failed to decode.
    pub decode_errors: u64,
    /// Successful reconnections after the first connection.
    pub reconnects: u64,
    /// Crossed books detected.
    pub consistency_warnings: u64,
    /// Deltas dropped because their sequence did not advance the book.
    pub stale_deltas: u64,
    /// Queued deltas dropped while awaiting a snapshot.
    pub pending_overflows: u64,
    /// Trades recorded.
    pub trades: u64,
    /// Candle series refreshes.
    pub candle_updates: u64,
    /// Exchange notices such as settlements.
    pub market_events: u64,
    /// Instruments discovered.
    pub instruments: usize,
    /// Books with at least one level on either side.
    pub active_books: usize,
    /// Books waiting for a snapshot.
    pub awaiting_snapshot: usize,
    /// Events held in the recent-events buffer.
    pub recent_events: usize,
    /// Receive time of the last event.
    pub last_event_at: Option<DateTime<Utc>>,
    /// Exchange time of the last event that carried one.
    pub last_exchange_time: Option<u64>,
    /// Per-instrument update rates, in discovery order.
    pub update_rates: Vec<InstrumentRate>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn test_counters_on_event() {
        let counters = StoreCounters::new(Utc::now());
        assert!(counters.last_event().is_none());
        assert!(counters.last_exchange_time().is_none());

        let now = Utc::now();
        counters.on_event(now, Some(42));
        counters.on_event(now, None);

        assert_eq!(StoreCounters::get(&counters.events_received), 2);
        assert_eq!(counters.last_exchange_time(), Some(42));
        assert_eq!(
            counters.last_event().map(|t| t.timestamp_millis()),
            Some(now.timestamp_millis())
        );
    }

    #[test]
    fn test_connected_since() {
        let counters = StoreCounters::new(Utc::now());
        let now = Utc::now();

        counters.set_connected(Some(now));
        assert!(counters.connected_since().is_some());

        counters.set_connected(None);
        assert!(counters.connected_since().is_none());
    }

    #[test]
    fn test_elapsed_clamps_negative() {
        let now = Utc::now();
        assert_eq!(elapsed(now, now - TimeDelta::seconds(5)), Duration::ZERO);
        assert_eq!(
            elapsed(now, now + TimeDelta::seconds(5)),
            Duration::from_secs(5)
        );
    }
}
