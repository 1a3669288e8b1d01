//! Single-writer order book store with lock-free readers.
//!
//! [`OrderBookStore`] is the writer half: it owns the mutable books and is
//! the only thing that ever calls [`apply`](OrderBookStore::apply). Every
//! change is published as a fresh [`BookView`] behind an atomically swapped
//! reference, so [`StoreReader`] handles never wait on the writer and never
//! observe a half-applied update.

use crate::book::{BookView, ConsistencyWarning, OrderBook, SyncState};
use crate::instruments::{CandleSeries, InstrumentSlot, Registry};
use crate::ring::{RecentEvent, RecentEventKind, RecentEvents};
use crate::stats::{CacheStatistics, InstrumentRate, StoreCounters, elapsed};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use mdcache_core::{
    BookDelta, BookSnapshot, CandleUpdate, DomainEvent, Instrument, InstrumentId, MarketEvent,
    Price, PriceLevel, Quantity, Trade,
};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Sizing for the store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Capacity of the recent-events buffer.
    pub recent_events_capacity: usize,
    /// Maximum deltas queued per instrument while awaiting a snapshot.
    /// At least one delta is always kept.
    pub pending_limit: usize,
    /// Past book views kept per instrument; zero disables history.
    pub book_history_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            recent_events_capacity: 10_000,
            pending_limit: 1024,
            book_history_capacity: 1000,
        }
    }
}

/// Result of applying one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A new instrument was registered.
    Defined,
    /// The instrument was already known; nothing changed.
    AlreadyDefined,
    /// A delta was applied and published.
    Applied,
    /// The delta's sequence did not advance the book and was dropped.
    Stale,
    /// The book awaits a snapshot; the delta was queued.
    Queued,
    /// A snapshot replaced the book, then queued deltas were replayed.
    Resynced {
        /// Number of queued deltas applied on top of the snapshot.
        replayed: usize,
    },
    /// A trade was recorded.
    Traded,
    /// An instrument's candle series was replaced.
    CandlesUpdated,
    /// An exchange notice was recorded.
    Noted,
    /// Keepalive; only timestamps changed.
    Heartbeat,
    /// The update crossed the book, which is now discarded.
    Inconsistent(ConsistencyWarning),
}

/// Best bid and ask of one instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopOfBook {
    /// Best bid level, if any.
    pub bid: Option<PriceLevel>,
    /// Best ask level, if any.
    pub ask: Option<PriceLevel>,
}

/// Summary of one instrument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentInfo {
    /// Definition.
    pub instrument: Instrument,
    /// First reference from the feed.
    pub first_seen: DateTime<Utc>,
    /// Last book change.
    pub last_updated: Option<DateTime<Utc>>,
    /// Best bid price.
    pub best_bid: Option<Price>,
    /// Best ask price.
    pub best_ask: Option<Price>,
    /// Total bid quantity.
    pub bid_volume: Quantity,
    /// Total ask quantity.
    pub ask_volume: Quantity,
    /// Book updates applied.
    pub updates: u64,
    /// Book sync state.
    pub sync: SyncState,
}

#[derive(Debug)]
struct Shared {
    registry: ArcSwap<Registry>,
    recent: RecentEvents,
    counters: StoreCounters,
    book_history: usize,
}

#[derive(Debug)]
struct BookEntry {
    book: OrderBook,
    pending: VecDeque<BookDelta>,
    slot: Arc<InstrumentSlot>,
}

enum DeltaResult {
    Applied,
    Stale,
    Crossed(ConsistencyWarning),
}

/// Writer half of the store.
#[derive(Debug)]
pub struct OrderBookStore {
    shared: Arc<Shared>,
    books: HashMap<InstrumentId, BookEntry>,
    config: StoreConfig,
}

impl OrderBookStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        let shared = Shared {
            registry: ArcSwap::from_pointee(Registry::new()),
            recent: RecentEvents::new(config.recent_events_capacity),
            counters: StoreCounters::new(Utc::now()),
            book_history: config.book_history_capacity,
        };
        Self {
            shared: Arc::new(shared),
            books: HashMap::new(),
            config,
        }
    }

    /// Returns a read handle.
    #[must_use]
    pub fn reader(&self) -> StoreReader {
        StoreReader {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Applies one event. Never called concurrently with itself.
    pub fn apply(&mut self, event: DomainEvent) -> ApplyOutcome {
        let now = Utc::now();
        self.shared.counters.on_event(now, event.exchange_time());

        match event {
            DomainEvent::InstrumentDefined(instrument) => {
                if self.books.contains_key(&instrument.id) {
                    ApplyOutcome::AlreadyDefined
                } else {
                    self.register(instrument, now);
                    ApplyOutcome::Defined
                }
            }
            DomainEvent::BookDelta(delta) => self.on_delta(delta, now),
            DomainEvent::BookSnapshot(snapshot) => self.on_snapshot(snapshot, now),
            DomainEvent::Trade(trade) => self.on_trade(trade, now),
            DomainEvent::Candles(update) => self.on_candles(update, now),
            DomainEvent::MarketEvent(event) => self.on_market_event(event, now),
            DomainEvent::HeartbeatNoop { .. } => ApplyOutcome::Heartbeat,
        }
    }

    /// Applies a batch of events in order.
    pub fn apply_all(&mut self, events: impl IntoIterator<Item = DomainEvent>) -> usize {
        let mut applied = 0;
        for event in events {
            self.apply(event);
            applied += 1;
        }
        applied
    }

    /// Marks the start of a feed session.
    ///
    /// Every known book moves to `AwaitingSnapshot`: its last levels stay
    /// readable but are flagged stale, and deltas queue until the new
    /// session's snapshot arrives.
    pub fn on_connected(&mut self, resumed: bool) {
        let now = Utc::now();
        self.shared.counters.set_connected(Some(now));
        if resumed {
            StoreCounters::incr(&self.shared.counters.reconnects);
        }

        for entry in self.books.values_mut() {
            entry.pending.clear();
            if entry.book.sync() != SyncState::AwaitingSnapshot {
                entry.book.set_sync(SyncState::AwaitingSnapshot);
                let view = entry.book.publish(now);
                entry.slot.publish(view, false);
            }
        }

        if !self.books.is_empty() {
            tracing::info!(
                "feed session started (resumed: {}), {} books awaiting snapshot",
                resumed,
                self.books.len()
            );
        }
    }

    /// Marks the end of a feed session.
    pub fn on_disconnected(&mut self) {
        self.shared.counters.set_connected(None);
    }

    /// Counts a frame that failed to decode.
    pub fn record_decode_error(&mut self) {
        self.record_decode_errors(1);
    }

    /// Counts several decode failures at once, such as bad events skipped
    /// inside one aggregate frame.
    pub fn record_decode_errors(&mut self, count: u64) {
        StoreCounters::add(&self.shared.counters.decode_errors, count);
    }

    fn register(&mut self, instrument: Instrument, now: DateTime<Utc>) -> &mut BookEntry {
        let id = instrument.id.clone();
        let entry = new_entry(&self.shared, instrument, now);
        self.books.entry(id).or_insert(entry)
    }

    fn entry(&mut self, id: &str, now: DateTime<Utc>) -> &mut BookEntry {
        match self.books.entry(id.to_owned()) {
            Entry::Occupied(occupied) => occupied.into_mut(),
            Entry::Vacant(vacant) => {
                let entry = new_entry(&self.shared, Instrument::from_id(id), now);
                vacant.insert(entry)
            }
        }
    }

    fn on_delta(&mut self, delta: BookDelta, now: DateTime<Utc>) -> ApplyOutcome {
        let pending_limit = self.config.pending_limit;
        let shared = Arc::clone(&self.shared);
        let entry = self.entry(&delta.instrument_id, now);

        if entry.book.sync() == SyncState::AwaitingSnapshot {
            if entry.pending.len() >= pending_limit.max(1)
                && entry.pending.pop_front().is_some()
            {
                StoreCounters::incr(&shared.counters.pending_overflows);
            }
            entry.pending.push_back(delta);
            return ApplyOutcome::Queued;
        }

        match apply_delta(&mut entry.book, &delta) {
            DeltaResult::Stale => {
                StoreCounters::incr(&shared.counters.stale_deltas);
                tracing::debug!(
                    "dropping stale delta for {}: seq {} <= {:?}",
                    delta.instrument_id,
                    delta.seq,
                    entry.book.version()
                );
                ApplyOutcome::Stale
            }
            DeltaResult::Crossed(warning) => {
                discard(entry, &shared, &warning, now);
                ApplyOutcome::Inconsistent(warning)
            }
            DeltaResult::Applied => {
                entry.slot.publish(entry.book.publish(now), true);
                shared.recent.push(
                    Some(delta.instrument_id),
                    now,
                    delta.exchange_time,
                    RecentEventKind::BookDelta {
                        seq: delta.seq,
                        side: delta.side,
                        price: delta.price,
                        quantity: delta.quantity,
                    },
                );
                ApplyOutcome::Applied
            }
        }
    }

    fn on_snapshot(&mut self, snapshot: BookSnapshot, now: DateTime<Utc>) -> ApplyOutcome {
        let shared = Arc::clone(&self.shared);
        let entry = self.entry(&snapshot.instrument_id, now);

        let pending = std::mem::take(&mut entry.pending);
        entry
            .book
            .apply_snapshot(snapshot.seq, &snapshot.bids, &snapshot.asks);

        if let Err(warning) = entry.book.check_crossed() {
            discard(entry, &shared, &warning, now);
            return ApplyOutcome::Inconsistent(warning);
        }

        shared.recent.push(
            Some(snapshot.instrument_id),
            now,
            snapshot.exchange_time,
            RecentEventKind::BookSnapshot {
                seq: snapshot.seq,
                bid_levels: snapshot.bids.len(),
                ask_levels: snapshot.asks.len(),
            },
        );

        let mut replayed = 0;
        for delta in pending {
            match apply_delta(&mut entry.book, &delta) {
                DeltaResult::Applied => replayed += 1,
                DeltaResult::Stale => {}
                DeltaResult::Crossed(warning) => {
                    discard(entry, &shared, &warning, now);
                    return ApplyOutcome::Inconsistent(warning);
                }
            }
        }

        entry.slot.publish(entry.book.publish(now), true);
        if replayed > 0 {
            tracing::debug!(
                "replayed {} queued deltas for {} after snapshot {}",
                replayed,
                entry.book.instrument_id(),
                snapshot.seq
            );
        }
        ApplyOutcome::Resynced { replayed }
    }

    fn on_trade(&mut self, trade: Trade, now: DateTime<Utc>) -> ApplyOutcome {
        let shared = Arc::clone(&self.shared);
        self.entry(&trade.instrument_id, now);

        StoreCounters::incr(&shared.counters.trades);
        shared.recent.push(
            Some(trade.instrument_id),
            now,
            trade.exchange_time,
            RecentEventKind::Trade {
                price: trade.price,
                quantity: trade.quantity,
                side: trade.side,
            },
        );
        ApplyOutcome::Traded
    }

    fn on_candles(&mut self, update: CandleUpdate, now: DateTime<Utc>) -> ApplyOutcome {
        let shared = Arc::clone(&self.shared);
        let entry = self.entry(&update.instrument_id, now);

        entry.slot.set_candles(CandleSeries {
            tradeable: update.tradeable,
            candles: update.candles,
            exchange_time: update.exchange_time,
            received_at: now,
        });
        StoreCounters::incr(&shared.counters.candle_updates);
        ApplyOutcome::CandlesUpdated
    }

    fn on_market_event(&mut self, event: MarketEvent, now: DateTime<Utc>) -> ApplyOutcome {
        if event.kind == "settlement" {
            tracing::info!(
                "settlement for {}: {}",
                event.instrument_id.as_deref().unwrap_or("market"),
                event.payload
            );
        } else {
            tracing::debug!("exchange event {}", event.kind);
        }

        StoreCounters::incr(&self.shared.counters.market_events);
        self.shared.recent.push(
            event.instrument_id,
            now,
            event.exchange_time,
            RecentEventKind::Market {
                kind: event.kind,
                payload: event.payload,
            },
        );
        ApplyOutcome::Noted
    }
}

fn new_entry(shared: &Shared, instrument: Instrument, now: DateTime<Utc>) -> BookEntry {
    tracing::info!("discovered instrument {} ({})", instrument.id, instrument.kind);

    let book = OrderBook::new(instrument.id.clone());
    let slot = Arc::new(InstrumentSlot::new(instrument, now, shared.book_history));
    if let Some(next) = shared.registry.load().with(Arc::clone(&slot)) {
        shared.registry.store(Arc::new(next));
    }

    BookEntry {
        book,
        pending: VecDeque::new(),
        slot,
    }
}

fn apply_delta(book: &mut OrderBook, delta: &BookDelta) -> DeltaResult {
    if book.is_stale(delta.seq) {
        return DeltaResult::Stale;
    }
    book.apply_delta(delta.seq, delta.side, delta.price, delta.quantity);
    match book.check_crossed() {
        Ok(()) => DeltaResult::Applied,
        Err(warning) => DeltaResult::Crossed(warning),
    }
}

fn discard(
    entry: &mut BookEntry,
    shared: &Shared,
    warning: &ConsistencyWarning,
    now: DateTime<Utc>,
) {
    StoreCounters::incr(&shared.counters.consistency_warnings);
    tracing::warn!(
        instrument = %warning.instrument_id,
        best_bid = %warning.best_bid,
        best_ask = %warning.best_ask,
        "{}; discarding book until next snapshot",
        warning
    );
    entry.pending.clear();
    entry.book.discard();
    entry.slot.publish(entry.book.publish(now), true);
}

/// Read handle to the store.
///
/// Cheap to clone and safe to use from any thread. Reads return the latest
/// published state; an absent result means the data is not available yet.
#[derive(Debug, Clone)]
pub struct StoreReader {
    shared: Arc<Shared>,
}

impl StoreReader {
    fn slot(&self, id: &str) -> Option<Arc<InstrumentSlot>> {
        self.shared.registry.load().get(id).cloned()
    }

    /// Returns all instruments in discovery order.
    #[must_use]
    pub fn list_instruments(&self) -> Vec<Instrument> {
        self.shared
            .registry
            .load()
            .iter()
            .map(|slot| slot.instrument().clone())
            .collect()
    }

    /// Returns one instrument definition.
    #[must_use]
    pub fn instrument(&self, id: &str) -> Option<Instrument> {
        self.slot(id).map(|slot| slot.instrument().clone())
    }

    /// Returns the best bid and ask, or `None` for an unknown instrument.
    #[must_use]
    pub fn best_bid_ask(&self, id: &str) -> Option<TopOfBook> {
        let book = self.slot(id)?.book();
        Some(TopOfBook {
            bid: book.best_bid(),
            ask: book.best_ask(),
        })
    }

    /// Returns the latest immutable book view.
    #[must_use]
    pub fn full_book(&self, id: &str) -> Option<Arc<BookView>> {
        self.slot(id).map(|slot| slot.book())
    }

    /// Returns the bid-ask spread.
    #[must_use]
    pub fn spread(&self, id: &str) -> Option<Price> {
        self.full_book(id)?.spread()
    }

    /// Returns the mid price.
    #[must_use]
    pub fn mid_price(&self, id: &str) -> Option<Price> {
        self.full_book(id)?.mid_price()
    }

    /// Returns a summary of one instrument.
    #[must_use]
    pub fn instrument_info(&self, id: &str) -> Option<InstrumentInfo> {
        let slot = self.slot(id)?;
        let book = slot.book();
        Some(InstrumentInfo {
            instrument: slot.instrument().clone(),
            first_seen: slot.first_seen(),
            last_updated: slot.last_updated(),
            best_bid: book.best_bid().map(|l| l.price),
            best_ask: book.best_ask().map(|l| l.price),
            bid_volume: book.bid_volume(),
            ask_volume: book.ask_volume(),
            updates: slot.updates(),
            sync: book.sync,
        })
    }

    /// Returns up to `limit` past views of one book, most recent first.
    #[must_use]
    pub fn book_history(&self, id: &str, limit: usize) -> Option<Vec<Arc<BookView>>> {
        self.slot(id).map(|slot| slot.history(limit))
    }

    /// Returns the latest candle series for one instrument.
    #[must_use]
    pub fn candles(&self, id: &str) -> Option<Arc<CandleSeries>> {
        self.slot(id)?.candles()
    }

    /// Returns up to `limit` recent events, most recent first.
    #[must_use]
    pub fn recent_events(&self, limit: usize) -> Vec<Arc<RecentEvent>> {
        self.shared.recent.recent(limit)
    }

    /// Returns aggregate counters.
    #[must_use]
    pub fn statistics(&self) -> CacheStatistics {
        let now = Utc::now();
        let counters = &self.shared.counters;
        let registry = self.shared.registry.load();

        let mut active_books = 0;
        let mut awaiting_snapshot = 0;
        let mut update_rates = Vec::with_capacity(registry.len());
        for slot in registry.iter() {
            let book = slot.book();
            if !book.is_empty() {
                active_books += 1;
            }
            if book.is_stale() {
                awaiting_snapshot += 1;
            }
            let updates = slot.updates();
            let secs = elapsed(slot.first_seen(), now).as_secs_f64();
            update_rates.push(InstrumentRate {
                instrument_id: slot.instrument().id.clone(),
                updates,
                updates_per_sec: if secs > 0.0 { updates as f64 / secs } else { 0.0 },
            });
        }

        CacheStatistics {
            started_at: counters.started_at,
            uptime: elapsed(counters.started_at, now),
            connection_uptime: counters.connected_since().map(|since| elapsed(since, now)),
            events_received: StoreCounters::get(&counters.events_received),
            decode_errors: StoreCounters::get(&counters.decode_errors),
            reconnects: StoreCounters::get(&counters.reconnects),
            consistency_warnings: StoreCounters::get(&counters.consistency_warnings),
            stale_deltas: StoreCounters::get(&counters.stale_deltas),
            pending_overflows: StoreCounters::get(&counters.pending_overflows),
            trades: StoreCounters::get(&counters.trades),
            candle_updates: StoreCounters::get(&counters.candle_updates),
            market_events: StoreCounters::get(&counters.market_events),
            instruments: registry.len(),
            active_books,
            awaiting_snapshot,
            recent_events: self.shared.recent.len(),
            last_event_at: counters.last_event(),
            last_exchange_time: counters.last_exchange_time(),
            update_rates,
        }
    }
}
