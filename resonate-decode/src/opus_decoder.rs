//! Per-frame Opus decode. Unlike `pmoflac::opus`, which decodes a whole
//! Ogg/Opus container, each Resonate `AudioChunk` frame is already one
//! Opus packet — decode is stateful only in the codec's own sense (it
//! tracks the packet-loss-concealment history internally).

use opus::{Channels, Decoder as OpusDecoder};
use resonate_proto::AudioFormat;

use crate::DecodeError;

/// Largest Opus frame at 48 kHz is 120 ms; allocate generously so we never
/// truncate a valid decode.
const MAX_FRAME_SAMPLES_PER_CHANNEL: usize = 5760;

pub struct OpusFrameDecoder {
    decoder: OpusDecoder,
    channels: usize,
}

impl OpusFrameDecoder {
    pub fn new(format: AudioFormat) -> Result<Self, DecodeError> {
        let channels = match format.channels {
            1 => Channels::Mono,
            2 => Channels::Stereo,
            other => {
                return Err(DecodeError::UnsupportedChannelLayout { channels: other });
            }
        };
        let decoder = OpusDecoder::new(format.sample_rate, channels)
            .map_err(|e| DecodeError::Codec(e.to_string()))?;
        Ok(Self {
            decoder,
            channels: format.channels as usize,
        })
    }

    pub fn decode(&mut self, frame: &[u8]) -> Result<Vec<u8>, DecodeError> {
        let mut pcm_i16 = vec![0i16; MAX_FRAME_SAMPLES_PER_CHANNEL * self.channels];
        let decoded_samples_per_channel = self
            .decoder
            .decode(frame, &mut pcm_i16, false)
            .map_err(|e| DecodeError::Codec(e.to_string()))?;
        let total_samples = decoded_samples_per_channel * self.channels;

        // Widen 16-bit Opus output into the canonical 32-bit signed
        // format by shifting into the high bits, preserving full scale.
        let mut out = Vec::with_capacity(total_samples * 4);
        for &sample in &pcm_i16[..total_samples] {
            let widened = (sample as i32) << 16;
            out.extend_from_slice(&widened.to_le_bytes());
        }
        Ok(out)
    }
}
