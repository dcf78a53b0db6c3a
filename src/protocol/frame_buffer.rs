//! Frame buffer for accumulating partial reads.
//!
//! Socket reads hand back arbitrary byte runs; this buffer stitches them
//! together and hands out complete frames. The leading varint tells both
//! how wide it is and how long the frame runs, so extraction is a peek at
//! up to three bytes followed by a zero-copy split once enough bytes are
//! in.
//!
//! # Example
//!
//! ```ignore
//! use rtmlink::protocol::FrameBuffer;
//!
//! let mut buffer = FrameBuffer::new();
//!
//! // Data arrives in chunks from the socket
//! let frames = buffer.push(&chunk)?;
//! for raw in frames {
//!     println!("frame for operation {}", raw.operation);
//! }
//! ```

use bytes::BytesMut;

use crate::codec::varint;
use crate::error::{Result, RtmlinkError};
use crate::protocol::frame::{parse_frame, RawFrame, MIN_FRAME_SIZE};

/// Buffer accumulating incoming bytes and extracting complete frames.
///
/// All data lives in a single `BytesMut`; completed frames are split off
/// and frozen without copying.
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Upper bound on a single frame's total length.
    max_frame: usize,
}

impl FrameBuffer {
    /// Create a frame buffer accepting any frame the length encoding can
    /// express.
    pub fn new() -> Self {
        Self::with_max_frame(varint::MAX_VALUE)
    }

    /// Create a frame buffer with a tighter frame length cap.
    pub fn with_max_frame(max_frame: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            max_frame,
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Returns the frames completed by this chunk, which may be none.
    /// Partial data stays buffered for the next push.
    ///
    /// # Errors
    ///
    /// Returns [`RtmlinkError::Protocol`] when a frame length is outside
    /// the valid range or the frame's inner content length disagrees with
    /// it. The stream has no way to resynchronize after that, so the
    /// caller must drop the connection.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<RawFrame>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Try to extract a single frame from the front of the buffer.
    fn try_extract_one(&mut self) -> Result<Option<RawFrame>> {
        // Peek the length prefix; fewer than prefix-width bytes means wait.
        let Some((prefix_len, total)) = varint::try_decode(&self.buffer) else {
            return Ok(None);
        };

        // Validate the claimed length before waiting on it. A length short
        // of the minimum can never complete and would stall the stream.
        if total < MIN_FRAME_SIZE {
            return Err(RtmlinkError::Protocol(format!(
                "frame length {total} below the {MIN_FRAME_SIZE} byte minimum"
            )));
        }
        if total > self.max_frame {
            return Err(RtmlinkError::Protocol(format!(
                "frame length {total} exceeds maximum {}",
                self.max_frame
            )));
        }

        if self.buffer.len() < total {
            return Ok(None);
        }

        let frame = self.buffer.split_to(total).freeze();
        parse_frame(frame, prefix_len).map(Some)
    }

    /// Number of buffered bytes not yet part of a completed frame.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Discard any buffered bytes.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
