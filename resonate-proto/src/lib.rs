//! Wire data model for the Resonate synchronized multi-room audio protocol.
//!
//! This crate owns every type that crosses the session boundary: the two
//! timestamp domains, the audio format descriptor, the JSON text envelope
//! and its recognized message payloads, and the binary frame codec. It has
//! no opinion on transport, decoding, or scheduling — those live in their
//! own crates.

pub mod frame;
pub mod message;
pub mod timestamp;

pub use frame::{BinaryFrame, FrameKind};
pub use timestamp::{LocalMicros, ServerMicros};

use serde::{Deserialize, Serialize};

/// Codec carried by a stream. Values match the wire's lowercase strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Pcm,
    Opus,
    Flac,
}

/// Protocol roles a client may advertise in `client/hello.supported_roles`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Player,
    Controller,
    Metadata,
    Artwork,
    Visualizer,
}

/// Bit depth of a PCM sample as advertised on the wire. Only these three
/// values are legal; `AudioFormat::new` rejects anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BitDepth {
    B16 = 16,
    B24 = 24,
    B32 = 32,
}

impl BitDepth {
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            16 => Some(BitDepth::B16),
            24 => Some(BitDepth::B24),
            32 => Some(BitDepth::B32),
            _ => None,
        }
    }

    pub const fn bits(self) -> u8 {
        self as u8
    }

    /// Bit depth used for samples once decode-time normalization has run.
    /// 24-bit input is unpacked to 32-bit signed samples inside the sink;
    /// every other depth passes through unchanged.
    pub const fn normalized_bits(self) -> u8 {
        match self {
            BitDepth::B24 => 32,
            other => other.bits(),
        }
    }
}

/// Immutable description of a stream's audio layout, set once at
/// `stream/start` and held for the lifetime of the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    pub codec: Codec,
    pub channels: u16,
    pub sample_rate: u32,
    pub bit_depth: BitDepth,
}

impl AudioFormat {
    pub fn new(codec: Codec, channels: u16, sample_rate: u32, bit_depth: BitDepth) -> Self {
        Self {
            codec,
            channels,
            sample_rate,
            bit_depth,
        }
    }

    /// Format synthesized when a server omits `stream/start` and a chunk
    /// arrives anyway (see spec §4.4 "auto-start" wart).
    pub fn default_auto_start() -> Self {
        Self::new(Codec::Pcm, 2, 48_000, BitDepth::B16)
    }

    /// Bytes occupied by one frame (one sample per channel) once the
    /// decoder has normalized the sample width. Always a power-of-two
    /// sized quantity inside the sink (2 or 4 bytes per channel).
    pub fn bytes_per_frame(&self) -> usize {
        let bytes_per_sample = (self.bit_depth.normalized_bits() as usize).div_ceil(8);
        self.channels as usize * bytes_per_sample
    }
}
