//! Per-frame FLAC decode. `codec_header` is the raw 34-byte STREAMINFO
//! metadata block body (as sent, base64-encoded, in `stream/start`); each
//! incoming frame is prefixed with a synthetic minimal FLAC stream header
//! (`fLaC` marker + that STREAMINFO block) so `claxon` can decode it as a
//! one-block stream without ever seeing the whole program.

use std::io::Cursor;

use crate::DecodeError;

const STREAMINFO_LEN: usize = 34;

pub struct FlacDecoder {
    streaminfo: Vec<u8>,
}

impl FlacDecoder {
    pub fn new(codec_header: &[u8]) -> Result<Self, DecodeError> {
        if codec_header.len() != STREAMINFO_LEN {
            return Err(DecodeError::InvalidCodecHeader(format!(
                "expected {STREAMINFO_LEN}-byte STREAMINFO block, got {} bytes",
                codec_header.len()
            )));
        }
        Ok(Self {
            streaminfo: codec_header.to_vec(),
        })
    }

    fn synthetic_stream(&self, frame: &[u8]) -> Vec<u8> {
        let mut stream = Vec::with_capacity(4 + 4 + self.streaminfo.len() + frame.len());
        stream.extend_from_slice(b"fLaC");
        // Metadata block header: high bit set = last metadata block,
        // remaining 7 bits = block type 0 (STREAMINFO), then a 24-bit
        // big-endian length.
        stream.push(0x80);
        let len = self.streaminfo.len() as u32;
        stream.extend_from_slice(&len.to_be_bytes()[1..]);
        stream.extend_from_slice(&self.streaminfo);
        stream.extend_from_slice(frame);
        stream
    }

    pub fn decode(&mut self, frame: &[u8]) -> Result<Vec<u8>, DecodeError> {
        let stream = self.synthetic_stream(frame);
        let mut reader = claxon::FlacReader::new(Cursor::new(stream))
            .map_err(|e| DecodeError::Codec(e.to_string()))?;

        let mut blocks = reader.blocks();
        let block = blocks
            .read_next_or_eof(Vec::new())
            .map_err(|e| DecodeError::Codec(e.to_string()))?
            .ok_or(DecodeError::InvalidFrame)?;

        let channels = block.channels();
        let mut out = Vec::with_capacity(block.duration() as usize * channels as usize * 4);
        for i in 0..block.duration() {
            for ch in 0..channels {
                out.extend_from_slice(&block.sample(ch, i).to_le_bytes());
            }
        }
        Ok(out)
    }
}
