//! Order book management.
//!
//! [`OrderBook`] is the writer's mutable working copy. Every change is
//! published as a [`BookView`]: an immutable snapshot whose side arrays are
//! shared with the previous view when that side did not change.

use chrono::{DateTime, Utc};
use mdcache_core::{InstrumentId, Price, PriceLevel, Quantity, Side};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Whether a book can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Deltas are being applied on top of a known state.
    Live,
    /// The book is stale or was discarded; deltas queue until a snapshot.
    AwaitingSnapshot,
}

/// A crossed book detected after an update.
///
/// Not returned to readers; the store logs it, counts it and discards the
/// book until the next snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("crossed book for {instrument_id} at seq {seq}: bid {best_bid} >= ask {best_ask}")]
pub struct ConsistencyWarning {
    /// Affected instrument.
    pub instrument_id: InstrumentId,
    /// Sequence number of the update that crossed the book.
    pub seq: u64,
    /// Best bid at detection time.
    pub best_bid: Price,
    /// Best ask at detection time.
    pub best_ask: Price,
}

/// One side of the order book.
#[derive(Debug)]
pub struct BookSide {
    levels: BTreeMap<Price, Quantity>,
    is_bid: bool,
}

impl BookSide {
    /// Creates a new book side.
    #[must_use]
    pub fn new(is_bid: bool) -> Self {
        Self {
            levels: BTreeMap::new(),
            is_bid,
        }
    }

    /// Applies an update to the book side. A zero quantity removes the level.
    #[inline]
    pub fn update(&mut self, price: Price, quantity: Quantity) {
        if quantity == 0 {
            self.levels.remove(&price);
        } else {
            self.levels.insert(price, quantity);
        }
    }

    /// Returns the top of book (best price).
    #[inline]
    #[must_use]
    pub fn top(&self) -> Option<PriceLevel> {
        let entry = if self.is_bid {
            self.levels.iter().next_back()
        } else {
            self.levels.iter().next()
        };
        entry.map(|(&price, &quantity)| PriceLevel::new(price, quantity))
    }

    /// Returns all levels, best first.
    #[must_use]
    pub fn best_first(&self) -> Vec<PriceLevel> {
        let level = |(&price, &quantity): (&Price, &Quantity)| PriceLevel::new(price, quantity);
        if self.is_bid {
            self.levels.iter().rev().map(level).collect()
        } else {
            self.levels.iter().map(level).collect()
        }
    }

    /// Returns the quantity at a specific price.
    #[must_use]
    pub fn get(&self, price: Price) -> Option<Quantity> {
        self.levels.get(&price).copied()
    }

    /// Clears all levels.
    pub fn clear(&mut self) {
        self.levels.clear();
    }

    /// Returns the number of price levels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    /// Returns true if there are no levels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

/// Writer-side order book for one instrument.
#[derive(Debug)]
pub struct OrderBook {
    instrument_id: InstrumentId,
    bids: BookSide,
    asks: BookSide,
    version: Option<u64>,
    sync: SyncState,
    published_bids: Arc<[PriceLevel]>,
    published_asks: Arc<[PriceLevel]>,
    bids_dirty: bool,
    asks_dirty: bool,
}

impl OrderBook {
    /// Creates an empty, live book.
    #[must_use]
    pub fn new(instrument_id: impl Into<InstrumentId>) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            bids: BookSide::new(true),
            asks: BookSide::new(false),
            version: None,
            sync: SyncState::Live,
            published_bids: Arc::from(Vec::new()),
            published_asks: Arc::from(Vec::new()),
            bids_dirty: false,
            asks_dirty: false,
        }
    }

    /// Returns the instrument identifier.
    #[must_use]
    pub fn instrument_id(&self) -> &str {
        &self.instrument_id
    }

    /// Returns the sequence number of the last applied update.
    #[must_use]
    pub fn version(&self) -> Option<u64> {
        self.version
    }

    /// Returns the sync state.
    #[must_use]
    pub fn sync(&self) -> SyncState {
        self.sync
    }

    /// Sets the sync state.
    pub fn set_sync(&mut self, sync: SyncState) {
        self.sync = sync;
    }

    /// Returns true if `seq` does not advance the book.
    #[must_use]
    pub fn is_stale(&self, seq: u64) -> bool {
        self.version.is_some_and(|version| seq <= version)
    }

    /// Applies a level change and advances the version.
    ///
    /// The caller is responsible for rejecting stale sequence numbers.
    pub fn apply_delta(&mut self, seq: u64, side: Side, price: Price, quantity: Quantity) {
        match side {
            Side::Bid => {
                self.bids.update(price, quantity);
                self.bids_dirty = true;
            }
            Side::Ask => {
                self.asks.update(price, quantity);
                self.asks_dirty = true;
            }
        }
        self.version = Some(seq);
    }

    /// Replaces the entire book.
    pub fn apply_snapshot(&mut self, seq: u64, bids: &[PriceLevel], asks: &[PriceLevel]) {
        self.bids.clear();
        self.asks.clear();

        for level in bids {
            self.bids.update(level.price, level.quantity);
        }
        for level in asks {
            self.asks.update(level.price, level.quantity);
        }

        self.bids_dirty = true;
        self.asks_dirty = true;
        self.version = Some(seq);
        self.sync = SyncState::Live;
    }

    /// Discards all levels; the version is kept so replays stay suppressed.
    pub fn discard(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.bids_dirty = true;
        self.asks_dirty = true;
        self.sync = SyncState::AwaitingSnapshot;
    }

    /// Returns the best bid level.
    #[inline]
    #[must_use]
    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.top()
    }

    /// Returns the best ask level.
    #[inline]
    #[must_use]
    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.top()
    }

    /// Checks that the best bid is strictly below the best ask.
    ///
    /// # Errors
    /// Returns a [`ConsistencyWarning`] if the book is crossed or locked.
    pub fn check_crossed(&self) -> Result<(), ConsistencyWarning> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) if bid.price >= ask.price => Err(ConsistencyWarning {
                instrument_id: self.instrument_id.clone(),
                seq: self.version.unwrap_or_default(),
                best_bid: bid.price,
                best_ask: ask.price,
            }),
            _ => Ok(()),
        }
    }

    /// Builds the immutable view for readers, reusing unchanged sides.
    pub fn publish(&mut self, updated_at: DateTime<Utc>) -> BookView {
        if self.bids_dirty {
            self.published_bids = Arc::from(self.bids.best_first());
            self.bids_dirty = false;
        }
        if self.asks_dirty {
            self.published_asks = Arc::from(self.asks.best_first());
            self.asks_dirty = false;
        }

        BookView {
            instrument_id: self.instrument_id.clone(),
            seq: self.version,
            bids: Arc::clone(&self.published_bids),
            asks: Arc::clone(&self.published_asks),
            sync: self.sync,
            updated_at: Some(updated_at),
        }
    }
}

/// Immutable, point-in-time view of one instrument's book.
///
/// Views outlive the cache that produced them; holding one never blocks the
/// writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookView {
    /// Instrument identifier.
    pub instrument_id: InstrumentId,
    /// Sequence number the view reflects.
    pub seq: Option<u64>,
    /// Bid levels, best (highest) first.
    pub bids: Arc<[PriceLevel]>,
    /// Ask levels, best (lowest) first.
    pub asks: Arc<[PriceLevel]>,
    /// Whether the levels are live or awaiting a snapshot.
    pub sync: SyncState,
    /// When the view was published.
    pub updated_at: Option<DateTime<Utc>>,
}

impl BookView {
    /// Creates an empty view for a newly discovered instrument.
    #[must_use]
    pub fn empty(instrument_id: impl Into<InstrumentId>) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            seq: None,
            bids: Arc::from(Vec::new()),
            asks: Arc::from(Vec::new()),
            sync: SyncState::Live,
            updated_at: None,
        }
    }

    /// Returns the best bid level.
    #[inline]
    #[must_use]
    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.first().copied()
    }

    /// Returns the best ask level.
    #[inline]
    #[must_use]
    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.first().copied()
    }

    /// Returns the bid-ask spread.
    #[inline]
    #[must_use]
    pub fn spread(&self) -> Option<Price> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask.price - bid.price),
            _ => None,
        }
    }

    /// Returns the mid price.
    #[inline]
    #[must_use]
    pub fn mid_price(&self) -> Option<Price> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid.price + ask.price) / Price::TWO),
            _ => None,
        }
    }

    /// Returns the total quantity resting on the bid side.
    #[must_use]
    pub fn bid_volume(&self) -> Quantity {
        self.bids.iter().map(|l| l.quantity).sum()
    }

    /// Returns the total quantity resting on the ask side.
    #[must_use]
    pub fn ask_volume(&self) -> Quantity {
        self.asks.iter().map(|l| l.quantity).sum()
    }

    /// Returns true if neither side has levels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// Returns true if the levels may be out of date.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.sync == SyncState::AwaitingSnapshot
    }
}
