//! The ordered sequence of decoded chunks awaiting playout, keyed by
//! their target local play-out instant. Stable on equal keys (FIFO within
//! a tie), capacity-bounded with drop-oldest overflow.

use std::collections::VecDeque;

use resonate_proto::{LocalMicros, ServerMicros};

/// One decoded PCM chunk waiting for its play-out instant. Owned
/// exclusively by the queue until it is popped and handed to the
/// consumer — never shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledChunk {
    pub pcm: Vec<u8>,
    pub play_at_local: LocalMicros,
    pub source_server_ts: ServerMicros,
}

/// Ascending-by-`play_at_local`, FIFO-on-ties, capacity-bounded queue.
#[derive(Debug, Default)]
pub struct SchedulerQueue {
    entries: VecDeque<ScheduledChunk>,
    capacity: usize,
}

impl SchedulerQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
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

    /// If the queue is at capacity, evicts the earliest-keyed entry and
    /// returns `true` — the caller should count it as a dropped-overflow
    /// chunk. Must be called before [`Self::insert`] on every `schedule`.
    pub fn evict_if_full(&mut self) -> bool {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
            true
        } else {
            false
        }
    }

    /// Inserts `chunk` in ascending-`play_at_local` order. Ties keep
    /// arrival order (the new chunk goes after any existing entries with
    /// the same key).
    pub fn insert(&mut self, chunk: ScheduledChunk) {
        let pos = self
            .entries
            .partition_point(|existing| existing.play_at_local <= chunk.play_at_local);
        self.entries.insert(pos, chunk);
    }

    pub fn peek_front(&self) -> Option<&ScheduledChunk> {
        self.entries.front()
    }

    pub fn pop_front(&mut self) -> Option<ScheduledChunk> {
        self.entries.pop_front()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
