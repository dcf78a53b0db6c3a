//! Protocol module - operation ids, the correlation header, and framing.
//!
//! This module implements the binary protocol spoken to the worker:
//! - the operation id table and event classification
//! - the [`Header`] type and the codec seams the generated messaging
//!   library implements
//! - frame encoding and the buffer for accumulating partial reads

mod frame;
mod frame_buffer;
mod header;
pub mod ops;

pub use frame::{encode_frame, parse_frame, RawFrame, MIN_FRAME_SIZE};
pub use frame_buffer::FrameBuffer;
pub use header::{Header, HeaderCodec, Invocable, MessageCodec};

#[cfg(test)]
pub(crate) use header::plain;
