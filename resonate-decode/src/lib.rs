//! Decode Pipeline: translates opaque codec frames plus a stream-start
//! descriptor into canonical PCM.
//!
//! PCM 16/32-bit pass through unchanged. PCM 24-bit is unpacked to 32-bit
//! signed samples. Opus and FLAC decode to interleaved 32-bit signed PCM
//! regardless of their advertised bit depth, so downstream consumers
//! (the Scheduler, the Sink) only ever see one canonical sample format.

mod pcm;

#[cfg(feature = "opus")]
mod opus_decoder;

#[cfg(feature = "flac")]
mod flac_decoder;

use resonate_proto::{AudioFormat, Codec};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame is malformed for its declared codec")]
    InvalidFrame,
    #[error("codec_header is required to initialize this decoder but was not provided")]
    MissingCodecHeader,
    #[error("codec_header is malformed: {0}")]
    InvalidCodecHeader(String),
    #[error("{channels} channels are not supported by this codec backend")]
    UnsupportedChannelLayout { channels: u16 },
    #[error("codec decode failed: {0}")]
    Codec(String),
    #[cfg(not(feature = "opus"))]
    #[error("opus support was not compiled into this client")]
    OpusUnavailable,
    #[cfg(not(feature = "flac"))]
    #[error("flac support was not compiled into this client")]
    FlacUnavailable,
}

/// Stateful per-stream decoder. One instance is created per `stream/start`
/// and fed every subsequent `AudioChunk` frame for that stream.
pub enum Decoder {
    /// 16-bit and 32-bit PCM need no state; both pass through unchanged.
    PcmPassthrough,
    /// 24-bit PCM is stateless too, but needs its own arm since it
    /// unpacks rather than passes through.
    Pcm24,
    #[cfg(feature = "opus")]
    Opus(opus_decoder::OpusFrameDecoder),
    #[cfg(feature = "flac")]
    Flac(flac_decoder::FlacDecoder),
}

impl Decoder {
    /// Builds the decoder appropriate for `format`, seeding codec state
    /// from `codec_header` where the codec requires it (FLAC's STREAMINFO
    /// block; Opus needs none).
    pub fn new(format: AudioFormat, codec_header: Option<&[u8]>) -> Result<Self, DecodeError> {
        match format.codec {
            Codec::Pcm => match format.bit_depth.bits() {
                24 => Ok(Decoder::Pcm24),
                _ => Ok(Decoder::PcmPassthrough),
            },
            Codec::Opus => {
                #[cfg(feature = "opus")]
                {
                    Ok(Decoder::Opus(opus_decoder::OpusFrameDecoder::new(format)?))
                }
                #[cfg(not(feature = "opus"))]
                {
                    Err(DecodeError::OpusUnavailable)
                }
            }
            Codec::Flac => {
                #[cfg(feature = "flac")]
                {
                    let header = codec_header.ok_or(DecodeError::MissingCodecHeader)?;
                    Ok(Decoder::Flac(flac_decoder::FlacDecoder::new(header)?))
                }
                #[cfg(not(feature = "flac"))]
                {
                    Err(DecodeError::FlacUnavailable)
                }
            }
        }
    }

    /// Decodes one frame's payload into canonical interleaved PCM bytes
    /// (32-bit signed little-endian samples for anything but PCM16/32
    /// passthrough, which keep their wire width).
    pub fn decode(&mut self, frame: &[u8]) -> Result<Vec<u8>, DecodeError> {
        match self {
            Decoder::PcmPassthrough => Ok(frame.to_vec()),
            Decoder::Pcm24 => pcm::unpack_24_to_32(frame),
            #[cfg(feature = "opus")]
            Decoder::Opus(decoder) => decoder.decode(frame),
            #[cfg(feature = "flac")]
            Decoder::Flac(decoder) => decoder.decode(frame),
        }
    }
}

/// Codecs a client actually has decoders compiled in for — used to build
/// the `supported_roles`/`player_support.supported_codecs` advertisement
/// in `client/hello` so an unavailable codec is never offered.
pub fn available_codecs() -> Vec<Codec> {
    let mut codecs = vec![Codec::Pcm];
    #[cfg(feature = "opus")]
    codecs.push(Codec::Opus);
    #[cfg(feature = "flac")]
    codecs.push(Codec::Flac);
    codecs
}
