//! Scheduler: orders decoded PCM chunks by their target play-out instant,
//! emits them on a fixed tick inside a tolerance window, and drops
//! whatever falls outside it.
//!
//! Separating "ingest with a capacity check" ([`Scheduler::schedule`])
//! from "tick-driven play-out" (the background tick task) gives exactly
//! one queue ordering and one drop policy — playing chunks the instant
//! they arrive cannot enforce inter-chunk timing under bursty delivery,
//! and cannot tolerate reordered frames.

mod buffer;
mod queue;

pub use buffer::BufferManager;
pub use queue::{ScheduledChunk, SchedulerQueue};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use resonate_proto::{LocalMicros, ServerMicros};
use resonate_sync::ClockSync;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A source of the current local monotonic time, in microseconds. Boxed
/// so the scheduler doesn't need to know how the caller tracks its clock
/// (a real `Instant`-based source in production, a controllable fake in
/// tests).
pub type NowFn = Arc<dyn Fn() -> LocalMicros + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub tick: Duration,
    pub window: Duration,
    pub queue_capacity: usize,
    pub buffer_capacity_bytes: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(10),
            window: Duration::from_millis(50),
            queue_capacity: 100,
            buffer_capacity_bytes: 1_500_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub received: u64,
    pub played: u64,
    pub dropped_late: u64,
    pub dropped_overflow: u64,
    pub queue_len: usize,
    pub buffer_fill_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Scheduled,
    /// Accepted, but caused the earliest-keyed queued chunk to be evicted.
    ScheduledWithOverflow,
    /// Refused: the back-pressure buffer has no room for this chunk.
    BackPressure,
}

struct Inner {
    queue: SchedulerQueue,
    buffer: BufferManager,
    received: u64,
    played: u64,
    dropped_late: u64,
    dropped_overflow: u64,
}

/// Timestamp-ordered playout scheduler with a background tick task.
pub struct Scheduler {
    inner: Arc<Mutex<Inner>>,
    config: SchedulerConfig,
    now_fn: NowFn,
    emit_tx: Mutex<Option<mpsc::Sender<ScheduledChunk>>>,
    emit_rx: Mutex<Option<mpsc::Receiver<ScheduledChunk>>>,
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
    tick_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(now_fn: NowFn, config: SchedulerConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        Self {
            inner: Arc::new(Mutex::new(Inner {
                queue: SchedulerQueue::new(config.queue_capacity),
                buffer: BufferManager::new(config.buffer_capacity_bytes),
                received: 0,
                played: 0,
                dropped_late: 0,
                dropped_overflow: 0,
            })),
            config,
            now_fn,
            emit_tx: Mutex::new(Some(tx)),
            emit_rx: Mutex::new(Some(rx)),
            running: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
            tick_handle: Mutex::new(None),
        }
    }

    /// Converts `source_server_ts` to local time via `clock`, then inserts
    /// the chunk in play-time order behind the capacity-gated back-pressure
    /// check. Both the arrival count and (on eviction) the overflow count
    /// are updated atomically with the insert, preserving the invariant
    /// `received - played - dropped_late - dropped_overflow == queue_len`.
    pub fn schedule(
        &self,
        pcm: Vec<u8>,
        source_server_ts: ServerMicros,
        clock: &ClockSync,
    ) -> ScheduleOutcome {
        let play_at_local = clock.server_to_local(source_server_ts);
        let mut inner = self.inner.lock().unwrap();

        if !inner.buffer.has_capacity(pcm.len()) {
            return ScheduleOutcome::BackPressure;
        }

        inner.received += 1;
        let overflowed = inner.queue.evict_if_full();
        if overflowed {
            inner.dropped_overflow += 1;
        }
        inner.buffer.register(play_at_local, pcm.len());
        inner.queue.insert(ScheduledChunk {
            pcm,
            play_at_local,
            source_server_ts,
        });

        if overflowed {
            ScheduleOutcome::ScheduledWithOverflow
        } else {
            ScheduleOutcome::Scheduled
        }
    }

    /// Takes the emission channel's receiver. `None` if already taken —
    /// there is exactly one consumer (the Audio Sink adapter) per
    /// scheduler lifetime.
    pub fn emitted(&self) -> Option<mpsc::Receiver<ScheduledChunk>> {
        self.emit_rx.lock().unwrap().take()
    }

    /// Starts (or resumes, after [`Self::stop`]) the tick task.
    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
        let mut handle_guard = self.tick_handle.lock().unwrap();
        if handle_guard.is_some() {
            return;
        }
        let Some(tx) = self.emit_tx.lock().unwrap().take() else {
            return;
        };
        let inner = self.inner.clone();
        let now_fn = self.now_fn.clone();
        let running = self.running.clone();
        let cancel = self.cancel.clone();
        let config = self.config;
        let window_us = config.window.as_micros() as i64;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(config.tick);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }

                if !running.load(Ordering::SeqCst) {
                    continue;
                }

                let now = now_fn();
                let mut to_emit = Vec::new();
                {
                    let mut state = inner.lock().unwrap();
                    state.buffer.prune(now);
                    loop {
                        let Some(head) = state.queue.peek_front() else {
                            break;
                        };
                        let delta = head.play_at_local - now;
                        if delta > window_us {
                            break;
                        } else if delta < -window_us {
                            state.queue.pop_front();
                            state.dropped_late += 1;
                        } else {
                            let chunk = state.queue.pop_front().expect("head just peeked");
                            state.played += 1;
                            to_emit.push(chunk);
                        }
                    }
                }

                for chunk in to_emit {
                    if tx.send(chunk).await.is_err() {
                        return;
                    }
                }
            }
        });
        *handle_guard = Some(handle);
    }

    /// Pauses the tick: the queue stops being drained, but the emission
    /// channel stays open so [`Self::start`] can resume without the
    /// consumer ever seeing a closed channel.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Permanently closes the emission channel and ends the tick task.
    /// Idempotent and cancellation-safe: awaits the task so no partial
    /// send is ever observable after this returns.
    pub async fn finish(&self) {
        self.cancel.cancel();
        self.running.store(false, Ordering::SeqCst);
        let handle = self.tick_handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Empties the queue and buffer ledger — used on `stream/end` to drop
    /// whatever was in flight for the ending stream. Cumulative counters
    /// are left untouched; they are session-lifetime telemetry, not
    /// per-stream state.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.queue.clear();
        inner.buffer.clear();
    }

    pub fn stats(&self) -> SchedulerStats {
        let now = (self.now_fn)();
        let inner = self.inner.lock().unwrap();
        SchedulerStats {
            received: inner.received,
            played: inner.played,
            dropped_late: inner.dropped_late,
            dropped_overflow: inner.dropped_overflow,
            queue_len: inner.queue.len(),
            buffer_fill_ms: inner.buffer.fill_ms(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resonate_proto::{LocalMicros, ServerMicros};
    use std::sync::atomic::AtomicI64;

    fn fixed_clock(start: i64) -> (NowFn, Arc<AtomicI64>) {
        let now = Arc::new(AtomicI64::new(start));
        let now_for_closure = now.clone();
        let f: NowFn = Arc::new(move || LocalMicros::new(now_for_closure.load(Ordering::SeqCst)));
        (f, now)
    }

    #[test]
    fn ordering_by_server_timestamp_with_zero_offset() {
        let (now_fn, _now) = fixed_clock(0);
        let scheduler = Scheduler::new(now_fn, SchedulerConfig::default());
        let clock = ClockSync::new();
        for ts in [3_000_000i64, 1_000_000, 2_000_000] {
            let outcome = scheduler.schedule(vec![0u8; 4], ServerMicros::new(ts), &clock);
            assert_eq!(outcome, ScheduleOutcome::Scheduled);
        }
        let stats = scheduler.stats();
        assert_eq!(stats.queue_len, 3);
        assert_eq!(stats.dropped_overflow, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn drop_late_when_play_at_is_in_the_past() {
        let (now_fn, now) = fixed_clock(1_000_000);
        let scheduler = Scheduler::new(now_fn, SchedulerConfig::default());
        let clock = ClockSync::new();
        // play_at_local = now - 100ms, outside the 50ms window.
        scheduler.schedule(
            vec![0u8; 4],
            ServerMicros::new(now.load(Ordering::SeqCst) - 100_000),
            &clock,
        );
        scheduler.start();
        tokio::time::advance(Duration::from_millis(20)).await;
        scheduler.finish().await;
        let stats = scheduler.stats();
        assert_eq!(stats.dropped_late, 1);
        assert_eq!(stats.played, 0);
    }

    #[test]
    fn overflow_policy_drops_oldest() {
        let (now_fn, _now) = fixed_clock(0);
        let config = SchedulerConfig {
            queue_capacity: 3,
            ..SchedulerConfig::default()
        };
        let scheduler = Scheduler::new(now_fn, config);
        let clock = ClockSync::new();
        let outcomes: Vec<_> = [1_000_000i64, 2_000_000, 3_000_000, 4_000_000]
            .into_iter()
            .map(|ts| scheduler.schedule(vec![0u8; 1], ServerMicros::new(ts), &clock))
            .collect();
        assert_eq!(
            outcomes,
            vec![
                ScheduleOutcome::Scheduled,
                ScheduleOutcome::Scheduled,
                ScheduleOutcome::Scheduled,
                ScheduleOutcome::ScheduledWithOverflow,
            ]
        );
        let stats = scheduler.stats();
        assert_eq!(stats.queue_len, 3);
        assert_eq!(stats.dropped_overflow, 1);
    }

    #[test]
    fn back_pressure_refuses_when_buffer_is_full() {
        let (now_fn, _now) = fixed_clock(0);
        let config = SchedulerConfig {
            buffer_capacity_bytes: 4,
            ..SchedulerConfig::default()
        };
        let scheduler = Scheduler::new(now_fn, config);
        let clock = ClockSync::new();
        assert_eq!(
            scheduler.schedule(vec![0u8; 4], ServerMicros::new(0), &clock),
            ScheduleOutcome::Scheduled
        );
        assert_eq!(
            scheduler.schedule(vec![0u8; 1], ServerMicros::new(1), &clock),
            ScheduleOutcome::BackPressure
        );
    }

    #[test]
    fn accounting_invariant_holds_after_schedule_calls() {
        let (now_fn, _now) = fixed_clock(0);
        let config = SchedulerConfig {
            queue_capacity: 2,
            ..SchedulerConfig::default()
        };
        let scheduler = Scheduler::new(now_fn, config);
        let clock = ClockSync::new();
        for ts in [1_000_000i64, 2_000_000, 3_000_000] {
            scheduler.schedule(vec![0u8; 1], ServerMicros::new(ts), &clock);
        }
        let stats = scheduler.stats();
        assert_eq!(
            stats.received - stats.played - stats.dropped_late - stats.dropped_overflow,
            stats.queue_len as u64
        );
    }
}
