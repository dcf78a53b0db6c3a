//! The correlation header and the payload codec seams.
//!
//! A [`Header`] is the unit this crate moves around: an operation id and
//! the sequence number that pairs a response with its caller, wrapped
//! around an opaque payload. How a header looks in bytes belongs to the
//! generated messaging library, which plugs in through [`HeaderCodec`] and
//! [`MessageCodec`].

use bytes::Bytes;

use crate::error::Result;
use crate::protocol::ops;

/// One decoded protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Backend operation this message targets, or the event kind it carries.
    pub operation: u16,
    /// Per-connection id correlating a request to its response. Assigned by
    /// the connection on send; echoed by the worker; zero on events.
    pub sequence: i64,
    /// Application error code; zero means success.
    pub error_code: i32,
    /// Serialized operation payload, opaque to this crate.
    pub payload: Bytes,
}

impl Header {
    /// A request header for `operation`. The sequence id is filled in when
    /// the connection accepts the header.
    pub fn request(operation: u16, payload: Bytes) -> Self {
        Self {
            operation,
            sequence: 0,
            error_code: 0,
            payload,
        }
    }

    /// Whether this header carries a worker-initiated event.
    #[inline]
    pub fn is_event(&self) -> bool {
        ops::is_event(self.operation)
    }
}

/// Wire form of a [`Header`], implemented by the generated messaging
/// library.
///
/// `size` and `serialize_into` are split so the connection can account for
/// frame lengths before any bytes are produced; the two must agree on the
/// byte count for every header.
pub trait HeaderCodec: Send + Sync + 'static {
    /// Exact serialized size of `header` in bytes.
    fn size(&self, header: &Header) -> usize;

    /// Serialize `header` into `buf`, returning the bytes written. `buf` is
    /// at least [`size`](HeaderCodec::size) bytes long.
    fn serialize_into(&self, header: &Header, buf: &mut [u8]) -> Result<usize>;

    /// Serialize `header` to a fresh buffer.
    fn serialize(&self, header: &Header) -> Result<Bytes> {
        let mut buf = vec![0u8; self.size(header)];
        let written = self.serialize_into(header, &mut buf)?;
        buf.truncate(written);
        Ok(buf.into())
    }

    /// Decode a header from its wire form.
    fn deserialize(&self, buf: &[u8]) -> Result<Header>;
}

/// A request value that knows how to put itself on the wire.
///
/// Implemented by the generated request types; the invoker only needs the
/// target operation id and the encoded payload.
pub trait Invocable {
    /// Operation id this request targets.
    fn operation(&self) -> u16;

    /// Encode the request payload.
    fn encode(&self) -> Result<Bytes>;
}

/// Typed decoding of inbound payloads, keyed by operation id.
///
/// Extends [`HeaderCodec`] with the mapping from raw payload bytes to the
/// event and response types the application sees.
pub trait MessageCodec: HeaderCodec {
    /// Decoded event type.
    type Event: Send + 'static;
    /// Decoded response type.
    type Response: Send + 'static;

    /// Decode an inbound event payload.
    ///
    /// `Ok(None)` means the codec has no mapping for this operation id; the
    /// event is logged and dropped rather than failing the connection.
    fn decode_event(&self, operation: u16, payload: &[u8]) -> Result<Option<Self::Event>>;

    /// Decode a response payload for the operation that produced it.
    fn decode_response(&self, operation: u16, payload: &[u8]) -> Result<Option<Self::Response>>;
}

/// Fixed-layout codec used by unit tests across the crate: operation and
/// error code around a little-endian sequence id, payload trailing.
#[cfg(test)]
pub(crate) mod plain {
    use super::*;
    use crate::error::RtmlinkError;

    pub(crate) const FIXED_LEN: usize = 14;

    pub(crate) struct PlainCodec;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) struct PlainEvent {
        pub operation: u16,
        pub data: Bytes,
    }

    impl HeaderCodec for PlainCodec {
        fn size(&self, header: &Header) -> usize {
            FIXED_LEN + header.payload.len()
        }

        fn serialize_into(&self, header: &Header, buf: &mut [u8]) -> Result<usize> {
            let total = self.size(header);
            if buf.len() < total {
                return Err(RtmlinkError::Codec("buffer too small".to_string()));
            }
            buf[0..2].copy_from_slice(&header.operation.to_le_bytes());
            buf[2..10].copy_from_slice(&header.sequence.to_le_bytes());
            buf[10..14].copy_from_slice(&header.error_code.to_le_bytes());
            buf[14..total].copy_from_slice(&header.payload);
            Ok(total)
        }

        fn deserialize(&self, buf: &[u8]) -> Result<Header> {
            if buf.len() < FIXED_LEN {
                return Err(RtmlinkError::Codec(format!(
                    "header truncated at {} bytes",
                    buf.len()
                )));
            }
            Ok(Header {
                operation: u16::from_le_bytes([buf[0], buf[1]]),
                sequence: i64::from_le_bytes(buf[2..10].try_into().map_err(|_| {
                    RtmlinkError::Codec("bad sequence field".to_string())
                })?),
                error_code: i32::from_le_bytes(buf[10..14].try_into().map_err(|_| {
                    RtmlinkError::Codec("bad error code field".to_string())
                })?),
                payload: Bytes::copy_from_slice(&buf[FIXED_LEN..]),
            })
        }
    }

    impl MessageCodec for PlainCodec {
        type Event = PlainEvent;
        type Response = Bytes;

        fn decode_event(&self, operation: u16, payload: &[u8]) -> Result<Option<Self::Event>> {
            // Only the message event has a typed mapping here; other event
            // ids exercise the log-and-drop path.
            if operation == ops::MESSAGE_EVENT {
                Ok(Some(PlainEvent {
                    operation,
                    data: Bytes::copy_from_slice(payload),
                }))
            } else {
                Ok(None)
            }
        }

        fn decode_response(&self, _operation: u16, payload: &[u8]) -> Result<Option<Self::Response>> {
            Ok(Some(Bytes::copy_from_slice(payload)))
        }
    }
}
