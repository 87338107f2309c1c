//! Bounded in-memory window of recent samples
//!
//! Ingestion appends, the flush worker drains, the live view reads a
//! defensive copy. The window never grows past its capacity: when full,
//! new samples are dropped so ingest stays non-blocking.

use crate::models::Sample;
use std::sync::RwLock;

/// Default window capacity.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Fixed-capacity sample window shared between ingestion, the flush
/// worker, and the live view.
pub struct RingWindow {
    samples: RwLock<Vec<Sample>>,
    capacity: usize,
}

impl RingWindow {
    /// Create a window holding at most `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: RwLock::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append a sample. Returns false when the window is full and the
    /// sample was dropped.
    pub fn add(&self, sample: Sample) -> bool {
        let mut samples = self.samples.write().expect("ring window lock poisoned");
        if samples.len() >= self.capacity {
            return false;
        }
        samples.push(sample);
        true
    }

    /// Swap the current contents out for a fresh backing vector with the
    /// same capacity, returning everything accumulated so far.
    pub fn flush(&self) -> Vec<Sample> {
        let mut samples = self.samples.write().expect("ring window lock poisoned");
        std::mem::replace(&mut *samples, Vec::with_capacity(self.capacity))
    }

    /// Defensive copy for concurrent readers.
    pub fn read_all(&self) -> Vec<Sample> {
        self.samples.read().expect("ring window lock poisoned").clone()
    }

    /// Current occupancy.
    pub fn len(&self) -> usize {
        self.samples.read().expect("ring window lock poisoned").len()
    }

    /// Whether the window holds no samples.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum occupancy.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for RingWindow {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
