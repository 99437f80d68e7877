//! Relay queue: messages this node has agreed to forward, pending a
//! viable next hop or expiry.

use std::collections::VecDeque;

use meshphone_core::{Identity, MeshError, Message};

/// One message awaiting relay, plus the next hop learned when it was
/// enqueued and the wall-clock time it arrived (for the age cap).
pub struct RelayQueueEntry {
    pub message: Message,
    pub next_hop: Identity,
    pub enqueued_at: u64,
}

/// Bounded FIFO of `RelayQueueEntry`. Capacity is enforced only on
/// `enqueue`; `take_all`/`put_back` move entries through a processing
/// tick without re-checking capacity, since those entries already held
/// a slot.
pub struct RelayQueue {
    capacity: usize,
    entries: VecDeque<RelayQueueEntry>,
}

impl RelayQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn enqueue(
        &mut self,
        message: Message,
        next_hop: Identity,
        now: u64,
    ) -> Result<(), MeshError> {
        if self.is_full() {
            return Err(MeshError::QueueFull);
        }
        self.entries.push_back(RelayQueueEntry {
            message,
            next_hop,
            enqueued_at: now,
        });
        Ok(())
    }

    /// Remove and return every entry, for one tick's worth of
    /// processing. Entries the tick decides to keep are returned to the
    /// queue via `put_back`.
    pub fn take_all(&mut self) -> Vec<RelayQueueEntry> {
        std::mem::take(&mut self.entries).into()
    }

    pub fn put_back(&mut self, entry: RelayQueueEntry) {
        self.entries.push_back(entry);
    }
}
