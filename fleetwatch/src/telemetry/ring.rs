use std::fmt;

use chrono::{DateTime, Utc};

use crate::model::Sample;

/// Fixed-capacity circular buffer. Once full, each `add` overwrites the oldest item; storage never
/// grows past the capacity given at construction.
#[derive(Clone, PartialEq)]
pub struct RingBuffer<T> {
    items: Vec<T>,
    capacity: usize,
    start: usize,
}

impl<T: fmt::Debug> fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .field("latest", &self.latest())
            .finish()
    }
}

impl<T> RingBuffer<T> {
    /// Capacity is at least one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { items: Vec::with_capacity(capacity), capacity, start: 0 }
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn add(&mut self, item: T) {
        if self.items.len() < self.capacity {
            self.items.push(item);
            return;
        }

        self.items[self.start] = item;
        self.start = (self.start + 1) % self.capacity;
    }

    pub fn latest(&self) -> Option<&T> {
        if self.items.is_empty() {
            return None;
        }
        let idx = (self.start + self.items.len() - 1) % self.capacity;
        self.items.get(idx)
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + '_ {
        let (wrapped, head) = self.items.split_at(self.start);
        head.iter().chain(wrapped.iter())
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.start = 0;
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Chronological copy of the contents.
    pub fn values(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }
}

impl RingBuffer<Sample> {
    /// Chronological copy of samples at or after the cutoff; `None` keeps everything.
    pub fn values_since(&self, cutoff: Option<DateTime<Utc>>) -> Vec<Sample> {
        match cutoff {
            None => self.values(),
            Some(cutoff) => self.iter().filter(|s| cutoff <= s.timestamp).copied().collect(),
        }
    }
}
