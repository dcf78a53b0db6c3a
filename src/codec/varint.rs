//! Variable-width length integers.
//!
//! Lengths on the wire are 2 or 3 bytes, little-endian. Values below
//! `0x8000` fit in two bytes with the top bit clear. Larger values set the
//! top bit of the low word and spill the remaining bits into a third byte:
//!
//! ```text
//! value < 0x8000:   [ lo, hi ]                       hi < 0x80
//! value >= 0x8000:  [ lo, hi | 0x80, value >> 15 ]
//! ```
//!
//! The third byte holds at most 255, which caps encodable values at
//! [`MAX_VALUE`]. Frames that would need more than that cannot be
//! expressed and are rejected before they reach the socket.

/// Values below this limit encode in two bytes.
pub const TWO_BYTE_LIMIT: usize = 0x8000;

/// Largest value the encoding can express: 15 low bits plus an 8-bit
/// extension byte.
pub const MAX_VALUE: usize = 0x7FFF + 255 * TWO_BYTE_LIMIT;

/// Number of bytes [`encode`] will write for `value`.
#[inline]
pub fn encoded_len(value: usize) -> usize {
    if value < TWO_BYTE_LIMIT {
        2
    } else {
        3
    }
}

/// Encode `value` at the start of `buf`, returning the number of bytes
/// written.
///
/// # Panics
///
/// Debug builds assert that `value` does not exceed [`MAX_VALUE`] and that
/// `buf` has room; callers validate sizes before encoding.
pub fn encode(value: usize, buf: &mut [u8]) -> usize {
    debug_assert!(value <= MAX_VALUE, "value {value} exceeds varint range");
    if value < TWO_BYTE_LIMIT {
        buf[..2].copy_from_slice(&(value as u16).to_le_bytes());
        2
    } else {
        let low = ((value & 0x7FFF) | 0x8000) as u16;
        buf[..2].copy_from_slice(&low.to_le_bytes());
        buf[2] = (value >> 15) as u8;
        3
    }
}

/// Decode a varint from the start of `buf`, returning
/// `(bytes_consumed, value)`.
///
/// The caller must supply at least [`encoded_len`] bytes; use
/// [`try_decode`] when the buffer may be short.
pub fn decode(buf: &[u8]) -> (usize, usize) {
    let low = u16::from_le_bytes([buf[0], buf[1]]) as usize;
    if low < TWO_BYTE_LIMIT {
        (2, low)
    } else {
        (3, (low & 0x7FFF) + ((buf[2] as usize) << 15))
    }
}

/// Decode a varint from a possibly short buffer.
///
/// Returns `None` when more bytes are needed to tell the value (fewer than
/// two bytes available, or two bytes with the continuation bit set).
pub fn try_decode(buf: &[u8]) -> Option<(usize, usize)> {
    if buf.len() < 2 {
        return None;
    }
    let low = u16::from_le_bytes([buf[0], buf[1]]) as usize;
    if low < TWO_BYTE_LIMIT {
        Some((2, low))
    } else if buf.len() < 3 {
        None
    } else {
        Some((3, (low & 0x7FFF) + ((buf[2] as usize) << 15)))
    }
}

/// Total frame length and length-prefix width for a frame whose section
/// after the prefix is `size` bytes.
///
/// The prefix value counts the whole frame, its own bytes included, so the
/// prefix width feeds back into the total: a frame tips over to a 3-byte
/// prefix exactly when `size + 4 >= 0x8002`.
pub fn frame_total(size: usize) -> (usize, usize) {
    let padded = size + 4;
    if padded >= TWO_BYTE_LIMIT + 2 {
        (padded - 1, 3)
    } else {
        (padded - 2, 2)
    }
}
