//! Instrument registry.
//!
//! The registry is copy-on-write: the writer clones it when a new instrument
//! is discovered and publishes the copy, so readers always iterate a
//! complete, discovery-ordered list.

use crate::book::BookView;
use crate::ring::{Indexed, Ring};
use arc_swap::{ArcSwap, ArcSwapOption};
use chrono::{DateTime, Utc};
use mdcache_core::{Instrument, InstrumentId};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Latest candle series received for an instrument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandleSeries {
    /// Whether the exchange listed the instrument as tradeable.
    pub tradeable: bool,
    /// Candle records as sent, oldest first.
    pub candles: Vec<serde_json::Value>,
    /// Exchange timestamp of the carrying frame.
    pub exchange_time: Option<u64>,
    /// Local receive time.
    pub received_at: DateTime<Utc>,
}

#[derive(Debug)]
struct HistoryEntry {
    index: u64,
    book: Arc<BookView>,
}

impl Indexed for HistoryEntry {
    fn index(&self) -> u64 {
        self.index
    }
}

/// Per-instrument state shared between the writer and readers.
#[derive(Debug)]
pub struct InstrumentSlot {
    instrument: Instrument,
    first_seen: DateTime<Utc>,
    book: ArcSwap<BookView>,
    history: Option<Ring<HistoryEntry>>,
    candles: ArcSwapOption<CandleSeries>,
    updates: AtomicU64,
    last_updated_ms: AtomicI64,
}

impl InstrumentSlot {
    /// `history_capacity` of zero disables book history.
    pub(crate) fn new(
        instrument: Instrument,
        first_seen: DateTime<Utc>,
        history_capacity: usize,
    ) -> Self {
        let book = BookView::empty(instrument.id.clone());
        Self {
            instrument,
            first_seen,
            book: ArcSwap::from_pointee(book),
            history: (history_capacity > 0).then(|| Ring::new(history_capacity)),
            candles: ArcSwapOption::empty(),
            updates: AtomicU64::new(0),
            last_updated_ms: AtomicI64::new(0),
        }
    }

    /// Returns the instrument definition.
    #[must_use]
    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    /// Returns when the instrument was first referenced by the feed.
    #[must_use]
    pub fn first_seen(&self) -> DateTime<Utc> {
        self.first_seen
    }

    /// Returns the latest published book.
    #[must_use]
    pub fn book(&self) -> Arc<BookView> {
        self.book.load_full()
    }

    /// Returns up to `limit` past views, most recent first.
    ///
    /// Every counted update is recorded, so the first entry is the current
    /// book once anything has been applied.
    #[must_use]
    pub fn history(&self, limit: usize) -> Vec<Arc<BookView>> {
        self.history.as_ref().map_or_else(Vec::new, |ring| {
            ring.recent(limit)
                .into_iter()
                .map(|entry| Arc::clone(&entry.book))
                .collect()
        })
    }

    /// Returns the latest candle series, if any arrived.
    #[must_use]
    pub fn candles(&self) -> Option<Arc<CandleSeries>> {
        self.candles.load_full()
    }

    /// Returns the number of book updates applied.
    #[must_use]
    pub fn updates(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }

    /// Returns when the book last changed.
    #[must_use]
    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        match self.last_updated_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }

    /// Publishes a new view. Writer only.
    pub(crate) fn publish(&self, view: BookView, counts_as_update: bool) {
        if let Some(updated_at) = view.updated_at {
            self.last_updated_ms
                .store(updated_at.timestamp_millis(), Ordering::Relaxed);
        }
        let view = Arc::new(view);
        if counts_as_update {
            self.updates.fetch_add(1, Ordering::Relaxed);
            if let Some(history) = &self.history {
                let book = Arc::clone(&view);
                history.push_with(|index| HistoryEntry { index, book });
            }
        }
        self.book.store(view);
    }

    /// Replaces the candle series. Writer only.
    pub(crate) fn set_candles(&self, series: CandleSeries) {
        self.candles.store(Some(Arc::new(series)));
    }
}

/// Discovery-ordered set of instruments.
#[derive(Debug, Default, Clone)]
pub struct Registry {
    slots: Vec<Arc<InstrumentSlot>>,
    index: HashMap<InstrumentId, usize>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy with one more instrument, or `None` if it is already known.
    #[must_use]
    pub fn with(&self, slot: Arc<InstrumentSlot>) -> Option<Self> {
        if self.index.contains_key(&slot.instrument.id) {
            return None;
        }
        let mut next = self.clone();
        next.index.insert(slot.instrument.id.clone(), next.slots.len());
        next.slots.push(slot);
        Some(next)
    }

    /// Gets an instrument slot by ID.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Arc<InstrumentSlot>> {
        self.index.get(id).and_then(|&idx| self.slots.get(idx))
    }

    /// Returns true if the instrument is known.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Returns the number of instruments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if there are no instruments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Iterates over all slots in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<InstrumentSlot>> {
        self.slots.iter()
    }
}
