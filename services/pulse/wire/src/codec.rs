//! Length-prefixed JSON framing.
//!
//! This module provides frame encoding and the incremental decoder driven
//! by the session read loop.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::WireError;
use crate::frame::{Frame, RawFrame, DEFAULT_MAX_FRAME_SIZE, HARD_MAX_FRAME_SIZE};

/// Encode a typed frame to wire bytes.
pub fn encode_frame(frame: &Frame, max_frame_size: usize) -> Result<Bytes, WireError> {
    let body = serde_json::to_vec(frame)?;
    let total_size = 4 + body.len();
    if total_size > max_frame_size {
        return Err(WireError::Size(total_size));
    }

    let mut buf = BytesMut::with_capacity(total_size);
    buf.put_u32(body.len() as u32);
    buf.put_slice(&body);
    Ok(buf.freeze())
}

/// Frame decoder for parsing incoming frames
#[derive(Debug)]
pub struct FrameDecoder {
    max_frame_size: usize,
}

impl FrameDecoder {
    /// Create a new frame decoder
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Create a decoder with a custom frame size cap, bounded by
    /// [`HARD_MAX_FRAME_SIZE`]
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size: max_frame_size.min(HARD_MAX_FRAME_SIZE),
        }
    }

    /// Decode one frame from a buffer.
    ///
    /// Returns `Ok(None)` when more bytes are needed. A body-level error
    /// ([`WireError::is_recoverable`]) consumes the offending frame and
    /// leaves the buffer at the next frame boundary; a size violation is
    /// unrecoverable because the next boundary cannot be found.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RawFrame>, WireError> {
        // Need at least 4 bytes for the body length
        if buf.len() < 4 {
            return Ok(None);
        }

        // Peek at the body length
        let body_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

        // Check frame size limits
        if 4 + body_len > self.max_frame_size {
            return Err(WireError::Size(body_len));
        }

        // Check if we have the complete frame
        if buf.len() < 4 + body_len {
            return Ok(None);
        }

        // Consume the frame before parsing so a malformed body never
        // stalls the stream.
        buf.advance(4);
        let body = buf.split_to(body_len);

        RawFrame::parse(&body).map(Some)
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
