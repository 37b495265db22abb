//! Audio Sink adapter: takes already-scheduled, already-decoded PCM off
//! the Scheduler's emit channel and hands it to the host OS audio output
//! device — a byte-stream sink with a known sample-rate contract — with a
//! host-clock conversion seam for deadline-aware backends.

mod cpal_sink;
mod timebase;

pub use cpal_sink::CpalAudioSink;
pub use timebase::{RatioTimebase, Timebase};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use resonate_scheduler::ScheduledChunk;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("no audio output device available")]
    NoOutputDevice,
    #[error("failed to build audio output stream: {0}")]
    StreamBuild(String),
}

/// A byte-stream sink with a known sample-rate contract. No
/// resampling, remixing, or format negotiation — the caller must already
/// be producing canonical PCM at the device's native rate and channel
/// count.
pub trait AudioSink: Send + Sync {
    fn push(&self, pcm: &[u8]) -> Result<(), SinkError>;
    fn underrun_count(&self) -> u64;
}

/// Consumes segments without playing them. Used in tests and headless
/// deployments where no output device exists.
#[derive(Default)]
pub struct NullAudioSink {
    frames_pushed: AtomicU64,
}

impl NullAudioSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_pushed(&self) -> u64 {
        self.frames_pushed.load(Ordering::Relaxed)
    }
}

impl AudioSink for NullAudioSink {
    fn push(&self, _pcm: &[u8]) -> Result<(), SinkError> {
        self.frames_pushed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn underrun_count(&self) -> u64 {
        0
    }
}

/// Drains the Scheduler's emit channel and pushes each chunk's PCM into
/// `sink`. `cpal` (and most host APIs reachable without a deadline-aware
/// backend) pulls samples at its own callback cadence rather than at a
/// scheduled deadline, so chunks are pushed as soon as the Scheduler
/// yields them — the Scheduler's ±50ms window already bounds how far off
/// that cadence can drift, matching the fallback behavior this module documents.
pub async fn drive_sink(
    sink: Arc<dyn AudioSink>,
    mut emitted: mpsc::Receiver<ScheduledChunk>,
    stop: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            chunk = emitted.recv() => {
                match chunk {
                    Some(chunk) => {
                        if let Err(e) = sink.push(&chunk.pcm) {
                            tracing::warn!(error = %e, "sink rejected chunk");
                        }
                    }
                    None => return,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resonate_proto::{LocalMicros, ServerMicros};

    #[tokio::test]
    async fn drive_sink_forwards_chunks_until_channel_closes() {
        let sink = Arc::new(NullAudioSink::new());
        let (tx, rx) = mpsc::channel(4);
        let stop = CancellationToken::new();

        for i in 0..3 {
            tx.send(ScheduledChunk {
                pcm: vec![0u8; 4],
                play_at_local: LocalMicros::new(i),
                source_server_ts: ServerMicros::new(i),
            })
            .await
            .unwrap();
        }
        drop(tx);

        drive_sink(sink.clone(), rx, stop).await;
        assert_eq!(sink.frames_pushed(), 3);
    }

    #[tokio::test]
    async fn drive_sink_stops_on_cancellation() {
        let sink = Arc::new(NullAudioSink::new());
        let (tx, rx) = mpsc::channel(4);
        let stop = CancellationToken::new();
        stop.cancel();
        // tx kept alive so recv() would otherwise block forever.
        let _tx = tx;

        drive_sink(sink.clone(), rx, stop).await;
        assert_eq!(sink.frames_pushed(), 0);
    }
}
