//! Published sequence and snapshot pins
//!
//! Readers pin the sequence they read at. Tree versions and retired page
//! slots are only released once no pin at or below them remains. The
//! registry also owns the published sequence so that taking a pin at the
//! current sequence and computing the release horizon never race.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Default)]
struct PinState {
    published: u64,
    pins: BTreeMap<u64, usize>,
}

/// Registry of pinned read sequences
#[derive(Debug, Default)]
pub struct PinRegistry {
    state: Mutex<PinState>,
}

impl PinRegistry {
    /// Registry starting at `published`
    pub fn new(published: u64) -> Arc<Self> {
        Arc::new(PinRegistry {
            state: Mutex::new(PinState {
                published,
                pins: BTreeMap::new(),
            }),
        })
    }

    /// Latest published sequence
    pub fn published(&self) -> u64 {
        self.state.lock().published
    }

    /// Make `sequence` visible to new readers
    pub fn publish(&self, sequence: u64) {
        let mut state = self.state.lock();
        debug_assert!(sequence >= state.published);
        state.published = sequence;
    }

    /// Pin the latest published sequence
    pub fn pin_published(self: &Arc<Self>) -> SequencePin {
        let mut state = self.state.lock();
        let sequence = state.published;
        *state.pins.entry(sequence).or_insert(0) += 1;
        SequencePin {
            inner: Arc::new(PinInner {
                registry: Arc::clone(self),
                sequence,
            }),
        }
    }

    /// Oldest sequence any current or future reader can observe
    pub fn horizon(&self) -> u64 {
        let state = self.state.lock();
        match state.pins.keys().next() {
            Some(&oldest) => oldest.min(state.published),
            None => state.published,
        }
    }

    /// Number of live pins
    pub fn pin_count(&self) -> usize {
        self.state.lock().pins.values().sum()
    }

    fn release(&self, sequence: u64) {
        let mut state = self.state.lock();
        if let Some(count) = state.pins.get_mut(&sequence) {
            *count -= 1;
            if *count == 0 {
                state.pins.remove(&sequence);
            }
        }
    }
}

#[derive(Debug)]
struct PinInner {
    registry: Arc<PinRegistry>,
    sequence: u64,
}

impl Drop for PinInner {
    fn drop(&mut self) {
        self.registry.release(self.sequence);
    }
}

/// A pinned read sequence; released when the last clone drops
#[derive(Debug, Clone)]
pub struct SequencePin {
    inner: Arc<PinInner>,
}

impl SequencePin {
    /// The pinned sequence
    pub fn sequence(&self) -> u64 {
        self.inner.sequence
    }
}
