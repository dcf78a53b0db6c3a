//! On-wire frame layout.
//!
//! Every message on the worker socket travels in one frame:
//!
//! ```text
//! ┌───────────────┬────────────┬──────────────┬─────────────────┬─────────┐
//! │ varint(total) │ service id │ operation id │ varint(content) │ content │
//! │ 2-3 bytes     │ u16 LE     │ u16 LE       │ 2-3 bytes       │ N bytes │
//! └───────────────┴────────────┴──────────────┴─────────────────┴─────────┘
//! ```
//!
//! The leading varint's value counts the whole frame, its own bytes
//! included. The operation id here is a frame-level stamp
//! ([`ops::COMMON_REQUEST`] outbound, [`ops::COMMON_RESPONSE`] inbound);
//! routing goes by the operation inside the decoded content, never by this
//! field.

use bytes::{Bytes, BytesMut};

use crate::codec::varint;
use crate::error::{Result, RtmlinkError};
use crate::protocol::header::{Header, HeaderCodec};
use crate::protocol::ops;

/// Smallest expressible frame: length prefix, service id, operation id,
/// and a 2-byte zero content length.
pub const MIN_FRAME_SIZE: usize = 8;

/// One frame as read off the socket, sliced but not yet decoded.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Service id from the frame envelope.
    pub service_id: u16,
    /// Frame-level operation id stamp.
    pub operation: u16,
    /// Serialized header content (zero-copy slice of the read buffer).
    pub content: Bytes,
}

/// Encode `header` into a complete outbound frame.
///
/// Fails with [`RtmlinkError::Protocol`] when the serialized content is too
/// large for the length encoding, and with [`RtmlinkError::Codec`] when the
/// codec's `size` and `serialize_into` disagree. Both tear the connection
/// down at the call site.
pub fn encode_frame(codec: &dyn HeaderCodec, header: &Header) -> Result<Bytes> {
    let content_len = codec.size(header);
    let inner = 4 + varint::encoded_len(content_len) + content_len;
    let (total, prefix_len) = varint::frame_total(inner);
    if total > varint::MAX_VALUE {
        return Err(RtmlinkError::Protocol(format!(
            "frame of {total} bytes exceeds the {} byte wire limit",
            varint::MAX_VALUE
        )));
    }

    let mut buf = BytesMut::zeroed(total);
    let mut offset = varint::encode(total, &mut buf);
    debug_assert_eq!(offset, prefix_len);
    buf[offset..offset + 2].copy_from_slice(&ops::SERVICE_ID.to_le_bytes());
    offset += 2;
    buf[offset..offset + 2].copy_from_slice(&ops::COMMON_REQUEST.to_le_bytes());
    offset += 2;
    offset += varint::encode(content_len, &mut buf[offset..]);

    let written = codec.serialize_into(header, &mut buf[offset..])?;
    if written != content_len {
        return Err(RtmlinkError::Codec(format!(
            "codec wrote {written} bytes for a header sized at {content_len}"
        )));
    }
    Ok(buf.freeze())
}

/// Slice a complete frame into a [`RawFrame`].
///
/// `frame` holds exactly the bytes the length prefix promised and
/// `prefix_len` is the width of that prefix. The inner content length must
/// land the content flush against the end of the frame.
pub fn parse_frame(frame: Bytes, prefix_len: usize) -> Result<RawFrame> {
    if frame.len() < MIN_FRAME_SIZE {
        return Err(RtmlinkError::Protocol(format!(
            "frame of {} bytes is below the {MIN_FRAME_SIZE} byte minimum",
            frame.len()
        )));
    }

    let service_id = u16::from_le_bytes([frame[prefix_len], frame[prefix_len + 1]]);
    let operation = u16::from_le_bytes([frame[prefix_len + 2], frame[prefix_len + 3]]);

    let clen_at = prefix_len + 4;
    let (clen_width, content_len) = varint::try_decode(&frame[clen_at..]).ok_or_else(|| {
        RtmlinkError::Protocol("frame too short for its content length".to_string())
    })?;

    let content_at = clen_at + clen_width;
    if content_at + content_len != frame.len() {
        return Err(RtmlinkError::Protocol(format!(
            "content length {content_len} disagrees with frame length {}",
            frame.len()
        )));
    }

    Ok(RawFrame {
        service_id,
        operation,
        content: frame.slice(content_at..),
    })
}
