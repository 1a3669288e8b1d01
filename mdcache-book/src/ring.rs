//! Bounded overwrite-oldest rings.
//!
//! The single writer stores into a slot and then advances the head; readers
//! walk backwards from the head and skip any slot that has already been
//! overwritten by a newer entry. [`RecentEvents`] is the store-wide event log;
//! the same ring backs each instrument's book history.

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use mdcache_core::{InstrumentId, Price, Quantity, Side};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// What happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecentEventKind {
    /// A fill.
    Trade {
        /// Execution price.
        price: Price,
        /// Executed quantity.
        quantity: Quantity,
        /// Aggressor side.
        side: Side,
    },
    /// A single level changed.
    BookDelta {
        /// Sequence number.
        seq: u64,
        /// Side changed.
        side: Side,
        /// Level price.
        price: Price,
        /// New quantity (0 = removed).
        quantity: Quantity,
    },
    /// The book was replaced by a snapshot.
    BookSnapshot {
        /// Snapshot sequence number.
        seq: u64,
        /// Number of bid levels.
        bid_levels: usize,
        /// Number of ask levels.
        ask_levels: usize,
    },
    /// Exchange notice that does not touch a book, such as a settlement.
    Market {
        /// The notice's own type tag.
        kind: String,
        /// Raw notice body.
        payload: serde_json::Value,
    },
}

/// Immutable record of a fill, book change or exchange notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecentEvent {
    /// Position in the stream of recorded events, starting at zero.
    pub index: u64,
    /// Instrument the event belongs to, if any.
    pub instrument_id: Option<InstrumentId>,
    /// Local receive time.
    pub received_at: DateTime<Utc>,
    /// Exchange timestamp, if provided.
    pub exchange_time: Option<u64>,
    /// What happened.
    pub kind: RecentEventKind,
}

/// Entries held by a [`Ring`] know their own position in the stream.
pub(crate) trait Indexed {
    fn index(&self) -> u64;
}

impl Indexed for RecentEvent {
    fn index(&self) -> u64 {
        self.index
    }
}

#[derive(Debug)]
pub(crate) struct Ring<T> {
    slots: Box<[ArcSwapOption<T>]>,
    head: AtomicU64,
}

impl<T: Indexed> Ring<T> {
    /// At least one slot is always allocated.
    pub(crate) fn new(capacity: usize) -> Self {
        let slots = (0..capacity.max(1))
            .map(|_| ArcSwapOption::empty())
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            head: AtomicU64::new(0),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        usize::try_from(head).map_or(self.capacity(), |h| h.min(self.capacity()))
    }

    pub(crate) fn total(&self) -> u64 {
        self.head.load(Ordering::Acquire)
    }

    /// Builds the entry for the next index and stores it. Writer only.
    pub(crate) fn push_with(&self, build: impl FnOnce(u64) -> T) {
        let index = self.head.load(Ordering::Relaxed);
        self.slots[self.slot_of(index)].store(Some(Arc::new(build(index))));
        self.head.store(index + 1, Ordering::Release);
    }

    pub(crate) fn recent(&self, limit: usize) -> Vec<Arc<T>> {
        let head = self.head.load(Ordering::Acquire);
        let window = (self.capacity() as u64).min(head);
        let wanted = (limit as u64).min(window);

        let mut entries = Vec::with_capacity(usize::try_from(wanted).unwrap_or_default());
        for index in (head - window..head).rev() {
            if entries.len() as u64 == wanted {
                break;
            }
            if let Some(entry) = self.slots[self.slot_of(index)].load_full() {
                if entry.index() == index {
                    entries.push(entry);
                }
            }
        }
        entries
    }

    fn slot_of(&self, index: u64) -> usize {
        (index % self.slots.len() as u64) as usize
    }
}

/// Lock-free ring of recent events.
#[derive(Debug)]
pub struct RecentEvents {
    ring: Ring<RecentEvent>,
}

impl RecentEvents {
    /// Creates a ring holding at most `capacity` events (at least one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Ring::new(capacity),
        }
    }

    /// Returns the capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Returns the number of events currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Returns true if nothing was recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.total() == 0
    }

    /// Returns the total number of events ever recorded.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.ring.total()
    }

    /// Records an event, overwriting the oldest when full. Writer only.
    pub(crate) fn push(
        &self,
        instrument_id: Option<InstrumentId>,
        received_at: DateTime<Utc>,
        exchange_time: Option<u64>,
        kind: RecentEventKind,
    ) {
        self.ring.push_with(|index| RecentEvent {
            index,
            instrument_id,
            received_at,
            exchange_time,
            kind,
        });
    }

    /// Returns up to `limit` events, most recent first.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<Arc<RecentEvent>> {
        self.ring.recent(limit)
    }
}
