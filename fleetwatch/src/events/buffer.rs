use crate::model::Event;
use crate::telemetry::RingBuffer;

/// Recent events for display, oldest first. Once full, each new event evicts the oldest.
#[derive(Debug, Clone)]
pub struct EventBuffer {
    ring: RingBuffer<Event>,
}

impl EventBuffer {
    pub fn new(size: usize) -> Self {
        Self { ring: RingBuffer::new(size) }
    }

    pub fn add(&mut self, event: Event) {
        self.ring.add(event);
    }

    /// Independent copy of the buffered events.
    pub fn items(&self) -> Vec<Event> {
        self.ring.values()
    }

    pub fn latest(&self) -> Option<&Event> {
        self.ring.latest()
    }

    pub fn clear(&mut self) {
        self.ring.clear();
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        self.ring.capacity()
    }
}
