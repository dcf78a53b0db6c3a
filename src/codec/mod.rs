//! Codec module - length encodings used by the wire format.
//!
//! Payload serialization belongs to the generated messaging library and
//! stays behind the traits in [`crate::protocol`]; what lives here is the
//! one encoding this crate owns end to end:
//!
//! - [`varint`] - the 2/3-byte little-endian length integers framing every
//!   message on the worker socket

pub mod varint;
