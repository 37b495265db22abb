//! Default [`AudioSink`] backend: plays canonical 32-bit signed PCM on the
//! host's default output device via `cpal`. `cpal::Stream` is not `Send`,
//! so the stream lives on its own dedicated thread and is driven through a
//! small command channel.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::{AudioSink, SinkError};

struct SharedBuffer {
    samples: VecDeque<f32>,
}

impl SharedBuffer {
    fn new() -> Self {
        Self {
            samples: VecDeque::new(),
        }
    }

    /// `bytes` is canonical little-endian 32-bit signed PCM, interleaved.
    fn push_pcm(&mut self, bytes: &[u8]) {
        for chunk in bytes.chunks_exact(4) {
            let sample = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            self.samples.push_back(sample as f32 / i32::MAX as f32);
        }
    }

    fn pop(&mut self) -> Option<f32> {
        self.samples.pop_front()
    }
}

/// Plays canonical PCM on the default output device. Detects the
/// hardware's native sample format (I16, U16, F32) and converts on the
/// callback thread; the caller is responsible for configuring the source
/// stream (channels/sample rate) to match what this device reports, since
/// this sink performs no resampling or channel remixing.
pub struct CpalAudioSink {
    buffer: Arc<Mutex<SharedBuffer>>,
    underruns: Arc<AtomicU64>,
    stream_cmd_tx: std_mpsc::Sender<()>,
    stream_thread: Option<thread::JoinHandle<()>>,
}

impl CpalAudioSink {
    pub fn open_default() -> Result<Self, SinkError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(SinkError::NoOutputDevice)?;

        tracing::debug!(
            device = %device.name().unwrap_or_else(|_| "unknown".into()),
            "opening default audio output device"
        );

        let config = device
            .default_output_config()
            .map_err(|e| SinkError::StreamBuild(e.to_string()))?;
        let sample_format = config.sample_format();

        let buffer = Arc::new(Mutex::new(SharedBuffer::new()));
        let underruns = Arc::new(AtomicU64::new(0));
        let (stream_cmd_tx, stream_cmd_rx) = std_mpsc::channel::<()>();

        let buffer_for_thread = buffer.clone();
        let underruns_for_thread = underruns.clone();
        let stream_thread = thread::spawn(move || {
            let err_fn = |err| tracing::error!(error = %err, "audio stream error");
            let stream = match sample_format {
                cpal::SampleFormat::I16 => device.build_output_stream(
                    &config.into(),
                    move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                        let mut buf = buffer_for_thread.lock().unwrap();
                        for sample in data.iter_mut() {
                            match buf.pop() {
                                Some(s) => *sample = (s * i16::MAX as f32) as i16,
                                None => {
                                    *sample = 0;
                                    underruns_for_thread.fetch_add(1, Ordering::Relaxed);
                                }
                            }
                        }
                    },
                    err_fn,
                    None,
                ),
                cpal::SampleFormat::U16 => device.build_output_stream(
                    &config.into(),
                    move |data: &mut [u16], _: &cpal::OutputCallbackInfo| {
                        let mut buf = buffer_for_thread.lock().unwrap();
                        for sample in data.iter_mut() {
                            match buf.pop() {
                                Some(s) => *sample = ((s + 1.0) * (u16::MAX as f32 / 2.0)) as u16,
                                None => {
                                    *sample = u16::MAX / 2;
                                    underruns_for_thread.fetch_add(1, Ordering::Relaxed);
                                }
                            }
                        }
                    },
                    err_fn,
                    None,
                ),
                cpal::SampleFormat::F32 => device.build_output_stream(
                    &config.into(),
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let mut buf = buffer_for_thread.lock().unwrap();
                        for sample in data.iter_mut() {
                            match buf.pop() {
                                Some(s) => *sample = s,
                                None => {
                                    *sample = 0.0;
                                    underruns_for_thread.fetch_add(1, Ordering::Relaxed);
                                }
                            }
                        }
                    },
                    err_fn,
                    None,
                ),
                other => {
                    tracing::error!(format = ?other, "unsupported hardware sample format");
                    return;
                }
            };

            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(error = %e, "failed to build output stream");
                    return;
                }
            };
            if let Err(e) = stream.play() {
                tracing::error!(error = %e, "failed to start output stream");
                return;
            }
            let _ = stream_cmd_rx.recv();
        });

        Ok(Self {
            buffer,
            underruns,
            stream_cmd_tx,
            stream_thread: Some(stream_thread),
        })
    }
}

impl AudioSink for CpalAudioSink {
    fn push(&self, pcm: &[u8]) -> Result<(), SinkError> {
        self.buffer.lock().unwrap().push_pcm(pcm);
        Ok(())
    }

    fn underrun_count(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }
}

impl Drop for CpalAudioSink {
    fn drop(&mut self) {
        let _ = self.stream_cmd_tx.send(());
        if let Some(handle) = self.stream_thread.take() {
            let _ = handle.join();
        }
    }
}
