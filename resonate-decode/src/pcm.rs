//! PCM passthrough/unpack. 16- and 32-bit PCM need no conversion; 24-bit
//! is unpacked to 32-bit signed little-endian samples so the sink always
//! sees a power-of-two sample width.

use crate::DecodeError;

pub fn unpack_24_to_32(frame: &[u8]) -> Result<Vec<u8>, DecodeError> {
    if frame.len() % 3 != 0 {
        return Err(DecodeError::InvalidFrame);
    }
    let mut out = Vec::with_capacity(frame.len() / 3 * 4);
    for sample in frame.chunks_exact(3) {
        // Sign-extend the 24-bit little-endian sample into an i32 by
        // shifting it into the top three bytes, then arithmetic-shifting
        // back down: this preserves the sign bit correctly.
        let raw = (sample[0] as i32) | ((sample[1] as i32) << 8) | ((sample[2] as i32) << 16);
        let sign_extended = (raw << 8) >> 8;
        out.extend_from_slice(&sign_extended.to_le_bytes());
    }
    Ok(out)
}
