//! Connection state machine bookkeeping.

use mdcache_core::ConnectionState;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};

/// Connection state readable from any thread.
#[derive(Debug, Default)]
pub struct SharedConnectionState {
    state: AtomicU8,
}

impl SharedConnectionState {
    /// Creates a new cell in the `Disconnected` state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current state.
    #[must_use]
    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: ConnectionState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }
}

/// Recorded state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// State left.
    pub from: ConnectionState,
    /// State entered.
    pub to: ConnectionState,
}

/// Bounded history of state changes.
#[derive(Debug)]
pub(crate) struct TransitionLog {
    entries: VecDeque<Transition>,
    capacity: usize,
}

impl TransitionLog {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub(crate) fn push(&mut self, transition: Transition) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(transition);
    }

    pub(crate) fn to_vec(&self) -> Vec<Transition> {
        self.entries.iter().copied().collect()
    }
}
