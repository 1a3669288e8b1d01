//! Periodic market summary.
//!
//! The reporter only uses the read surface, so a slow reporter can never
//! hold up ingestion.

use mdcache_book::{CacheStatistics, StoreReader};
use mdcache_core::{InstrumentKind, Price, PriceLevel};
use std::fmt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Quotes of one instrument at summary time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentQuote {
    /// Instrument identifier.
    pub instrument_id: String,
    /// Contract kind.
    pub kind: InstrumentKind,
    /// Best bid level.
    pub bid: Option<PriceLevel>,
    /// Best ask level.
    pub ask: Option<PriceLevel>,
    /// Bid-ask spread.
    pub spread: Option<Price>,
    /// True while the book awaits a snapshot.
    pub stale: bool,
}

impl fmt::Display for InstrumentQuote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: Bid=", self.instrument_id)?;
        write_level(f, self.bid)?;
        f.write_str(", Ask=")?;
        write_level(f, self.ask)?;
        f.write_str(", Spread=")?;
        match self.spread {
            Some(spread) => write!(f, "{spread}")?,
            None => f.write_str("-")?,
        }
        if self.stale {
            f.write_str(" (stale)")?;
        }
        Ok(())
    }
}

fn write_level(f: &mut fmt::Formatter<'_>, level: Option<PriceLevel>) -> fmt::Result {
    match level {
        Some(level) => write!(f, "{}x{}", level.price, level.quantity),
        None => f.write_str("-"),
    }
}

/// Point-in-time summary of the cache.
#[derive(Debug, Clone)]
pub struct MarketSummary {
    /// Aggregate counters.
    pub statistics: CacheStatistics,
    /// Per-instrument quotes, sorted by instrument identifier.
    pub quotes: Vec<InstrumentQuote>,
}

impl MarketSummary {
    /// Returns the header line.
    #[must_use]
    pub fn headline(&self) -> String {
        let stats = &self.statistics;
        let connection = stats
            .connection_uptime
            .map_or_else(|| "down".to_string(), |up| format!("{:.1}s", up.as_secs_f64()));
        format!(
            "uptime {:.1}s, connection {}, updates {}, instruments {}, active books {}, \
             cached events {}, reconnects {}, decode errors {}, consistency warnings {}",
            stats.uptime.as_secs_f64(),
            connection,
            stats.events_received,
            stats.instruments,
            stats.active_books,
            stats.recent_events,
            stats.reconnects,
            stats.decode_errors,
            stats.consistency_warnings,
        )
    }
}

impl fmt::Display for MarketSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== MARKET DATA SUMMARY ===")?;
        writeln!(f, "{}", self.headline())?;
        for quote in &self.quotes {
            writeln!(f, "  {quote}")?;
        }
        Ok(())
    }
}

/// Logs a [`MarketSummary`] on a fixed interval.
#[derive(Debug, Clone)]
pub struct PeriodicReporter {
    reader: StoreReader,
    interval: Duration,
}

impl PeriodicReporter {
    /// Creates a reporter.
    #[must_use]
    pub fn new(reader: StoreReader, interval: Duration) -> Self {
        Self { reader, interval }
    }

    /// Builds a summary from the current state.
    #[must_use]
    pub fn summary(&self) -> MarketSummary {
        let statistics = self.reader.statistics();
        let mut quotes: Vec<InstrumentQuote> = self
            .reader
            .list_instruments()
            .into_iter()
            .filter_map(|instrument| {
                let book = self.reader.full_book(&instrument.id)?;
                Some(InstrumentQuote {
                    bid: book.best_bid(),
                    ask: book.best_ask(),
                    spread: book.spread(),
                    stale: book.is_stale(),
                    kind: instrument.kind,
                    instrument_id: instrument.id,
                })
            })
            .collect();
        quotes.sort_by(|a, b| a.instrument_id.cmp(&b.instrument_id));

        MarketSummary { statistics, quotes }
    }

    /// Logs one summary.
    pub fn report(&self) {
        let summary = self.summary();
        tracing::info!("=== MARKET DATA SUMMARY === {}", summary.headline());
        for quote in &summary.quotes {
            tracing::info!("  {}", quote);
        }
        match serde_json::to_string(&summary.statistics) {
            Ok(json) => tracing::debug!(statistics = %json, "cache statistics"),
            Err(e) => tracing::debug!("could not serialize statistics: {}", e),
        }
    }

    /// Spawns the reporting loop on the current runtime.
    ///
    /// The first summary is logged one interval after spawning.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => self.report(),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdcache_book::{OrderBookStore, StoreConfig};
    use mdcache_core::{BookDelta, DomainEvent, Side};
    use rust_decimal_macros::dec;

    fn delta(id: &str, seq: u64, side: Side, price: Price, quantity: u64) -> DomainEvent {
        DomainEvent::BookDelta(BookDelta {
            instrument_id: id.to_string(),
            seq,
            side,
            price,
            quantity,
            exchange_time: None,
        })
    }

    #[test]
    fn test_summary_sorted_with_quotes() {
        let mut store = OrderBookStore::new(StoreConfig::default());
        store.apply(delta("ZN_future_20250620", 1, Side::Bid, dec!(110.5), 4));
        store.apply(delta("ES_future_20250321", 1, Side::Bid, dec!(5000.25), 2));
        store.apply(delta("ES_future_20250321", 2, Side::Ask, dec!(5000.75), 3));

        let reporter = PeriodicReporter::new(store.reader(), Duration::from_secs(30));
        let summary = reporter.summary();

        assert_eq!(summary.statistics.instruments, 2);
        assert_eq!(summary.quotes.len(), 2);
        assert_eq!(summary.quotes[0].instrument_id, "ES_future_20250321");
        assert_eq!(summary.quotes[0].spread, Some(dec!(0.50)));
        assert_eq!(summary.quotes[0].kind, InstrumentKind::Future);
        assert_eq!(
            summary.quotes[0].to_string(),
            "ES_future_20250321: Bid=5000.25x2, Ask=5000.75x3, Spread=0.50"
        );
        assert_eq!(
            summary.quotes[1].to_string(),
            "ZN_future_20250620: Bid=110.5x4, Ask=-, Spread=-"
        );

        let text = summary.to_string();
        assert!(text.starts_with("=== MARKET DATA SUMMARY ==="));
        assert!(text.contains("instruments 2"));
        assert!(text.contains("connection down"));
    }

    #[test]
    fn test_summary_marks_stale_books() {
        let mut store = OrderBookStore::new(StoreConfig::default());
        store.apply(delta("F-2025", 1, Side::Bid, dec!(100), 1));
        store.on_connected(true);

        let summary = PeriodicReporter::new(store.reader(), Duration::from_secs(1)).summary();
        assert!(summary.quotes[0].stale);
        assert!(summary.quotes[0].to_string().ends_with("(stale)"));
        assert!(summary.headline().contains("reconnects 1"));
    }

    #[tokio::test]
    async fn test_spawn_stops_on_shutdown() {
        let store = OrderBookStore::new(StoreConfig::default());
        let reporter = PeriodicReporter::new(store.reader(), Duration::from_millis(10));
        let shutdown = CancellationToken::new();

        let handle = reporter.spawn(shutdown.clone());
        tokio::time::sleep(Duration::from_millis(35)).await;
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
