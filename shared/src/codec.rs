//! Length-prefixed codec for TCP framing
//!
//! All messages are framed as:
//! ```text
//! [ 4 bytes: length (u32, big-endian) ][ N bytes: JSON body ]
//! ```
//!
//! This ensures message boundaries are preserved over TCP streams.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Maximum message size (10 MB) to prevent memory exhaustion
pub const MAX_MESSAGE_SIZE: u32 = 10 * 1024 * 1024;

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Message too large: {0} bytes (max: {MAX_MESSAGE_SIZE})")]
    MessageTooLarge(usize),

    #[error("Invalid message length prefix: {0}")]
    InvalidLength(u32),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode a message into a length-prefixed byte buffer
pub fn encode<T: Serialize>(message: &T) -> Result<Bytes, CodecError> {
    let body = serde_json::to_vec(message)?;

    if body.len() > MAX_MESSAGE_SIZE as usize {
        return Err(CodecError::MessageTooLarge(body.len()));
    }

    let mut buf = BytesMut::with_capacity(4 + body.len());
    buf.put_u32(body.len() as u32);
    buf.put_slice(&body);

    Ok(buf.freeze())
}

/// Try to decode a length-prefixed message from a buffer
///
/// Returns:
/// - `Ok(Some(message))` if a complete message was decoded
/// - `Ok(None)` if more data is needed
/// - `Err(...)` if the data is invalid
pub fn decode<T: DeserializeOwned>(buf: &mut BytesMut) -> Result<Option<T>, CodecError> {
    if buf.len() < 4 {
        return Ok(None);
    }

    // Peek at the length prefix without consuming
    let msg_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);

    if msg_len > MAX_MESSAGE_SIZE {
        return Err(CodecError::InvalidLength(msg_len));
    }

    let total_len = 4 + msg_len as usize;
    if buf.len() < total_len {
        return Ok(None);
    }

    buf.advance(4);
    let body = buf.split_to(msg_len as usize);

    Ok(Some(serde_json::from_slice(&body)?))
}

/// Decoder state for streaming decoding
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Partial frame data being accumulated
    buffer: BytesMut,
}

impl FrameDecoder {
    /// Create a new frame decoder
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Add data to the decoder buffer
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next frame from the buffer
    ///
    /// Call this repeatedly until it returns `Ok(None)` to drain all complete frames
    pub fn decode_next<T: DeserializeOwned>(&mut self) -> Result<Option<T>, CodecError> {
        decode(&mut self.buffer)
    }

    /// Get the current buffer length
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }
}
