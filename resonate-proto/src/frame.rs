//! Binary frame framing: big-endian `uint8 kind || int64 server_ts_us ||
//! payload…`, minimum length 9 bytes.

use crate::timestamp::ServerMicros;

/// Discriminator for a binary frame's payload kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    AudioChunk,
    /// Artwork channel, `0..=3`.
    Artwork(u8),
    Visualizer,
}

impl FrameKind {
    /// `1` is canonical for currently deployed servers; `0` is accepted as
    /// a legacy alias on ingress.
    fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            0 | 1 => Some(FrameKind::AudioChunk),
            4..=7 => Some(FrameKind::Artwork(byte - 4)),
            8 => Some(FrameKind::Visualizer),
            _ => None,
        }
    }

    /// The value this client would emit, were it ever to produce a frame
    /// of this kind: the canonical, server-matching discriminator, never
    /// the legacy `0` alias.
    fn to_wire(self) -> Option<u8> {
        match self {
            FrameKind::AudioChunk => Some(1),
            FrameKind::Artwork(ch) if ch <= 3 => Some(4 + ch),
            FrameKind::Visualizer => Some(8),
            _ => None,
        }
    }
}

/// One decoded binary frame: a kind, the server-domain timestamp it was
/// tagged with, and its opaque payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryFrame {
    pub kind: FrameKind,
    pub server_ts: ServerMicros,
    pub payload: Vec<u8>,
}

const HEADER_LEN: usize = 9;

impl BinaryFrame {
    pub fn new(kind: FrameKind, server_ts: ServerMicros, payload: Vec<u8>) -> Self {
        Self {
            kind,
            server_ts,
            payload,
        }
    }

    /// Decodes a wire frame. Returns `None` for frames shorter than the
    /// 9-byte header, unknown kind discriminators, or negative timestamps
    /// — all non-fatal, silently-ignored conditions.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_LEN {
            return None;
        }
        let kind = FrameKind::from_wire(bytes[0])?;
        let ts = i64::from_be_bytes(bytes[1..9].try_into().ok()?);
        if ts < 0 {
            return None;
        }
        Some(BinaryFrame {
            kind,
            server_ts: ServerMicros::new(ts),
            payload: bytes[HEADER_LEN..].to_vec(),
        })
    }

    /// Encodes this frame back to wire bytes, using the canonical
    /// (server-matching) kind discriminator. Returns `None` only for an
    /// out-of-range artwork channel, which cannot occur for frames this
    /// client decoded itself.
    pub fn encode(&self) -> Option<Vec<u8>> {
        let kind_byte = self.kind.to_wire()?;
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.push(kind_byte);
        out.extend_from_slice(&self.server_ts.get().to_be_bytes());
        out.extend_from_slice(&self.payload);
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_audio_chunk() {
        let bytes: [u8; 13] = [
            0x01, 0x00, 0x00, 0x00, 0x00, 0x49, 0x96, 0x02, 0xD2, 0x01, 0x02, 0x03, 0x04,
        ];
        let frame = BinaryFrame::decode(&bytes).unwrap();
        assert_eq!(frame.kind, FrameKind::AudioChunk);
        assert_eq!(frame.server_ts, ServerMicros::new(1_234_567_890));
        assert_eq!(frame.payload, vec![1, 2, 3, 4]);
    }

    #[test]
    fn legacy_zero_kind_is_audio_chunk() {
        let mut bytes = vec![0x00];
        bytes.extend_from_slice(&1_000i64.to_be_bytes());
        let frame = BinaryFrame::decode(&bytes).unwrap();
        assert_eq!(frame.kind, FrameKind::AudioChunk);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let mut bytes = vec![0xFF];
        bytes.extend_from_slice(&1_000i64.to_be_bytes());
        assert!(BinaryFrame::decode(&bytes).is_none());
    }

    #[test]
    fn too_short_is_rejected() {
        assert!(BinaryFrame::decode(&[1, 2, 3, 4]).is_none());
    }

    #[test]
    fn negative_timestamp_is_rejected() {
        let mut bytes = vec![0x01];
        bytes.extend_from_slice(&(-1i64).to_be_bytes());
        assert!(BinaryFrame::decode(&bytes).is_none());
    }

    #[test]
    fn artwork_channel_roundtrip() {
        let frame = BinaryFrame::new(FrameKind::Artwork(2), ServerMicros::new(42), vec![9, 9]);
        let bytes = frame.encode().unwrap();
        assert_eq!(bytes[0], 6);
        let back = BinaryFrame::decode(&bytes).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn encode_emits_canonical_kind_one_never_legacy_zero() {
        let frame = BinaryFrame::new(FrameKind::AudioChunk, ServerMicros::new(0), vec![]);
        assert_eq!(frame.encode().unwrap()[0], 1);
    }

    #[test]
    fn decode_is_inverse_of_encode_for_valid_inputs() {
        let original = BinaryFrame::new(
            FrameKind::Visualizer,
            ServerMicros::new(9_000_000),
            vec![1, 2, 3, 4, 5],
        );
        let encoded = original.encode().unwrap();
        let decoded = BinaryFrame::decode(&encoded).unwrap();
        assert_eq!(decoded, original);
    }
}
