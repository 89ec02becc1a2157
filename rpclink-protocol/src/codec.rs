//! Stream encoder and decoder for rpclink frames.

use crate::error::ProtocolError;
use crate::frame::Frame;
use bytes::{Bytes, BytesMut};

/// Encodes frames for the wire.
pub struct Encoder;

impl Encoder {
    /// Encodes a single frame.
    pub fn encode_frame(frame: &Frame) -> Result<BytesMut, ProtocolError> {
        frame.encode()
    }

    /// Encodes a sequence of frames back to back into one buffer.
    pub fn encode_frames(frames: &[Frame]) -> Result<BytesMut, ProtocolError> {
        let mut buf = BytesMut::new();
        for frame in frames {
            buf.extend_from_slice(&frame.encode()?);
        }
        Ok(buf)
    }
}

/// Incremental frame decoder over a byte stream.
pub struct Decoder {
    buffer: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Appends bytes to the internal buffer.
    pub fn extend_bytes(&mut self, data: Bytes) {
        self.buffer.extend_from_slice(&data);
    }

    /// Attempts to decode the next frame from the buffer.
    pub fn decode_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        Frame::decode(&mut self.buffer)
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
