//! Back-pressure bookkeeping. Tracks how many PCM bytes are committed to
//! future play-out so the Session Controller can refuse ingest before the
//! Sink itself would run out of room, rather than discovering it only
//! after scheduling.

use std::collections::VecDeque;

use resonate_proto::LocalMicros;

struct Entry {
    end_time_local: LocalMicros,
    bytes: usize,
}

/// FIFO `(end_time_local, bytes)` ledger. Capacity is client-configured
/// (typical 1-2 MiB).
pub struct BufferManager {
    capacity: usize,
    used: usize,
    entries: VecDeque<Entry>,
}

impl BufferManager {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            used: 0,
            entries: VecDeque::new(),
        }
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn has_capacity(&self, additional_bytes: usize) -> bool {
        self.used + additional_bytes <= self.capacity
    }

    /// Records `bytes` as committed through `end_time_local`. Callers
    /// should gate this behind [`Self::has_capacity`].
    pub fn register(&mut self, end_time_local: LocalMicros, bytes: usize) {
        self.used += bytes;
        self.entries.push_back(Entry {
            end_time_local,
            bytes,
        });
    }

    /// Removes the FIFO prefix of entries whose play-out has already
    /// finished as of `now`. Strictly FIFO: a late arrival further back
    /// in the queue is never reordered ahead of an earlier one.
    pub fn prune(&mut self, now: LocalMicros) {
        while let Some(front) = self.entries.front() {
            if front.end_time_local <= now {
                self.used -= front.bytes;
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    /// How far into the future, in milliseconds, playback is already
    /// committed — the buffer's "fill level".
    pub fn fill_ms(&self, now: LocalMicros) -> i64 {
        self.entries
            .back()
            .map(|e| ((e.end_time_local - now).max(0)) / 1000)
            .unwrap_or(0)
    }

    pub fn clear(&mut self) {
        self.used = 0;
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_capacity_respects_limit() {
        let buf = BufferManager::new(100);
        assert!(buf.has_capacity(100));
        assert!(!buf.has_capacity(101));
    }

    #[test]
    fn register_increases_used_and_prune_releases_it() {
        let mut buf = BufferManager::new(100);
        buf.register(LocalMicros::new(1_000), 40);
        assert_eq!(buf.used(), 40);
        buf.prune(LocalMicros::new(500));
        assert_eq!(buf.used(), 40);
        buf.prune(LocalMicros::new(1_000));
        assert_eq!(buf.used(), 0);
    }

    #[test]
    fn prune_is_strictly_fifo_not_reordering_late_arrivals() {
        let mut buf = BufferManager::new(1000);
        buf.register(LocalMicros::new(2_000), 10);
        buf.register(LocalMicros::new(1_000), 20);
        // Even though the second entry's end_time is earlier, FIFO order
        // means it is not pruned until the first (still in front) is.
        buf.prune(LocalMicros::new(1_500));
        assert_eq!(buf.used(), 30);
        buf.prune(LocalMicros::new(2_000));
        assert_eq!(buf.used(), 0);
    }

    #[test]
    fn used_never_negative_after_gated_registers() {
        let mut buf = BufferManager::new(10);
        for _ in 0..5 {
            if buf.has_capacity(3) {
                buf.register(LocalMicros::new(0), 3);
            }
        }
        buf.prune(LocalMicros::new(1));
        assert!(buf.used() <= buf.capacity());
    }

    #[test]
    fn clear_resets_everything() {
        let mut buf = BufferManager::new(100);
        buf.register(LocalMicros::new(1_000), 40);
        buf.clear();
        assert_eq!(buf.used(), 0);
        assert_eq!(buf.fill_ms(LocalMicros::new(0)), 0);
    }
}
