//! Binary frame format for rpclink.
//!
//! Frame layout (24 bytes header + context + body):
//!
//! ```text
//! +--------+---------+-------+------------+-------------+----------+--------+
//! | magic  | version | flags | request_id | context_len | body_len | crc32c |
//! | 4 bytes| 1 byte  |1 byte |  8 bytes   |   2 bytes   | 4 bytes  | 4 bytes|
//! +--------+---------+-------+------------+-------------+----------+--------+
//! | context (context_len bytes) | body (body_len bytes)                     |
//! +-----------------------------+-------------------------------------------+
//! ```
//!
//! The CRC covers `context ++ body`.

use crate::error::ProtocolError;
use crate::MAX_BODY_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

/// Magic bytes identifying rpclink frames: "RLNK"
pub const MAGIC: [u8; 4] = *b"RLNK";

/// Size of the fixed frame header in bytes (4+1+1+8+2+4+4 = 24).
pub const FRAME_HEADER_SIZE: usize = 24;

/// Correlation key shared by every frame of one logical call and its reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fixed per-frame header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Header {
    pub request_id: RequestId,
}

impl Header {
    pub fn new(request_id: impl Into<RequestId>) -> Self {
        Self {
            request_id: request_id.into(),
        }
    }
}

/// Frame flags bitfield.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// Frame carries a reply to a call issued by the receiving side.
    pub const RESULT_MODE: u8 = 1 << 0;
    /// Last frame of a logically complete message.
    pub const FINISH: u8 = 1 << 1;

    /// Valid flags mask for protocol version 1.
    const VALID_V1_MASK: u8 = 0x03;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn with_result_mode(mut self) -> Self {
        self.0 |= Self::RESULT_MODE;
        self
    }

    pub fn with_finish(mut self) -> Self {
        self.0 |= Self::FINISH;
        self
    }

    pub fn is_result_mode(&self) -> bool {
        self.0 & Self::RESULT_MODE != 0
    }

    pub fn is_finish(&self) -> bool {
        self.0 & Self::FINISH != 0
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn from_bits(bits: u8) -> Result<Self, ProtocolError> {
        if bits & !Self::VALID_V1_MASK != 0 {
            return Err(ProtocolError::InvalidFlags(bits));
        }
        Ok(Self(bits))
    }
}

/// A parsed rpclink frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Protocol version.
    pub version: u8,
    /// Frame flags.
    pub flags: FrameFlags,
    /// Correlation header.
    pub header: Header,
    /// Opaque routing metadata, echoed back on replies.
    pub context: Bytes,
    /// One chunk of a (possibly larger) logical message.
    pub body: Bytes,
}

impl Frame {
    /// Creates a single-frame message with the given flags.
    pub fn new(header: Header, flags: FrameFlags, body: Bytes) -> Self {
        Self {
            version: crate::PROTOCOL_VERSION,
            flags,
            header,
            context: Bytes::new(),
            body,
        }
    }

    pub fn with_context(mut self, context: Bytes) -> Self {
        self.context = context;
        self
    }

    /// Splits a logical message into frames of at most `max_body` bytes.
    ///
    /// Every frame carries `header`, `context` and `flags`; only the last one
    /// is marked `FINISH`. An empty message still produces one frame.
    pub fn split(
        header: Header,
        context: Bytes,
        flags: FrameFlags,
        mut message: Bytes,
        max_body: usize,
    ) -> Vec<Frame> {
        let max_body = max_body.max(1);
        let mut frames = Vec::with_capacity(message.len() / max_body + 1);

        while message.len() > max_body {
            let chunk = message.split_to(max_body);
            frames.push(Frame::new(header, flags, chunk).with_context(context.clone()));
        }
        frames.push(Frame::new(header, flags.with_finish(), message).with_context(context));

        frames
    }

    /// Encodes the frame into bytes.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let body_len = self.body.len() as u32;
        if self.body.len() > MAX_BODY_SIZE as usize {
            return Err(ProtocolError::FrameTooLarge {
                size: body_len,
                max: MAX_BODY_SIZE,
            });
        }
        if self.context.len() > u16::MAX as usize {
            return Err(ProtocolError::ContextTooLarge(self.context.len()));
        }

        let context_len = self.context.len() as u16;
        let total_size = FRAME_HEADER_SIZE + self.context.len() + self.body.len();
        let mut buf = BytesMut::with_capacity(total_size);

        buf.put_slice(&MAGIC);
        buf.put_u8(self.version);
        buf.put_u8(self.flags.bits());
        buf.put_u64(self.header.request_id.get());
        buf.put_u16(context_len);
        buf.put_u32(body_len);
        buf.put_u32(checksum(&self.context, &self.body));

        buf.put_slice(&self.context);
        buf.put_slice(&self.body);

        Ok(buf)
    }

    /// Decodes a frame from bytes.
    ///
    /// Returns `Ok(Some(frame))` if a complete frame was decoded,
    /// `Ok(None)` if more data is needed, or `Err` on protocol errors.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        // Peek at header without consuming
        let magic = [buf[0], buf[1], buf[2], buf[3]];
        if magic != MAGIC {
            return Err(ProtocolError::InvalidMagic(magic));
        }

        let version = buf[4];
        if version != crate::PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }

        let flags = FrameFlags::from_bits(buf[5])?;

        let mut fields = &buf[6..FRAME_HEADER_SIZE];
        let request_id = RequestId::new(fields.get_u64());
        let context_len = fields.get_u16() as usize;
        let body_len = fields.get_u32() as usize;
        let crc_expected = fields.get_u32();

        if body_len > MAX_BODY_SIZE as usize {
            return Err(ProtocolError::FrameTooLarge {
                size: body_len as u32,
                max: MAX_BODY_SIZE,
            });
        }

        let total_len = FRAME_HEADER_SIZE + context_len + body_len;
        if buf.len() < total_len {
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        let context = buf.split_to(context_len).freeze();
        let body = buf.split_to(body_len).freeze();

        let crc_actual = checksum(&context, &body);
        if crc_actual != crc_expected {
            return Err(ProtocolError::CrcMismatch {
                expected: crc_expected,
                actual: crc_actual,
            });
        }

        Ok(Some(Self {
            version,
            flags,
            header: Header { request_id },
            context,
            body,
        }))
    }
}

fn checksum(context: &[u8], body: &[u8]) -> u32 {
    crc32c::crc32c_append(crc32c::crc32c(context), body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Decoder, Encoder};
    use proptest::prelude::*;

    fn reply(id: u64, body: &'static [u8]) -> Frame {
        Frame::new(
            Header::new(id),
            FrameFlags::new().with_result_mode().with_finish(),
            Bytes::from_static(body),
        )
    }

    #[test]
    fn test_frame_roundtrip() {
        let frame = reply(42, b"R\"pong\"z").with_context(Bytes::from_static(b"ctx"));

        let mut buf = frame.encode().unwrap();
        let decoded = Frame::decode(&mut buf).unwrap().unwrap();

        assert_eq!(decoded, frame);
        assert_eq!(decoded.header.request_id.get(), 42);
        assert!(decoded.flags.is_result_mode());
        assert!(decoded.flags.is_finish());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_large_request_id_preserved() {
        let frame = reply(u64::MAX - 1, b"x");
        let mut buf = frame.encode().unwrap();
        let decoded = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.header.request_id, RequestId::new(u64::MAX - 1));
    }

    #[test]
    fn test_crc_validation() {
        let mut encoded = reply(1, b"payload").encode().unwrap();

        let len = encoded.len();
        encoded[len - 1] ^= 0xFF;

        let result = Frame::decode(&mut encoded);
        assert!(matches!(result, Err(ProtocolError::CrcMismatch { .. })));
    }

    #[test]
    fn test_invalid_magic() {
        let mut buf = BytesMut::from(&[0u8; FRAME_HEADER_SIZE][..]);
        buf[..4].copy_from_slice(b"BADX");
        let result = Frame::decode(&mut buf);
        assert!(matches!(result, Err(ProtocolError::InvalidMagic(_))));
    }

    #[test]
    fn test_incomplete_frame() {
        let encoded = reply(3, b"body").encode().unwrap();

        let mut buf = BytesMut::from(&encoded[..10]);
        assert!(Frame::decode(&mut buf).unwrap().is_none());

        let mut buf = BytesMut::from(&encoded[..encoded.len() - 1]);
        assert!(Frame::decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_unsupported_version() {
        let mut encoded = reply(3, b"body").encode().unwrap();
        encoded[4] = 99;
        let result = Frame::decode(&mut encoded);
        assert!(matches!(result, Err(ProtocolError::UnsupportedVersion(99))));
    }

    #[test]
    fn test_frame_flags() {
        let flags = FrameFlags::new().with_result_mode();
        assert!(flags.is_result_mode());
        assert!(!flags.is_finish());

        let flags = flags.with_finish();
        assert_eq!(flags.bits(), FrameFlags::RESULT_MODE | FrameFlags::FINISH);
    }

    #[test]
    fn test_invalid_flags() {
        let result = FrameFlags::from_bits(0x80);
        assert!(matches!(result, Err(ProtocolError::InvalidFlags(0x80))));
    }

    #[test]
    fn test_frame_too_large() {
        let huge = vec![0u8; (MAX_BODY_SIZE + 1) as usize];
        let frame = Frame::new(Header::new(1), FrameFlags::new(), Bytes::from(huge));
        let result = frame.encode();
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_split_marks_only_last_frame_finish() {
        let message = Bytes::from_static(b"abcdefghij");
        let frames = Frame::split(
            Header::new(7),
            Bytes::from_static(b"ctx"),
            FrameFlags::new().with_result_mode(),
            message,
            4,
        );

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].body.as_ref(), b"abcd");
        assert_eq!(frames[1].body.as_ref(), b"efgh");
        assert_eq!(frames[2].body.as_ref(), b"ij");
        assert!(!frames[0].flags.is_finish());
        assert!(!frames[1].flags.is_finish());
        assert!(frames[2].flags.is_finish());
        for frame in &frames {
            assert!(frame.flags.is_result_mode());
            assert_eq!(frame.header.request_id.get(), 7);
            assert_eq!(frame.context.as_ref(), b"ctx");
        }
    }

    #[test]
    fn test_split_exact_and_empty() {
        let frames = Frame::split(
            Header::new(1),
            Bytes::new(),
            FrameFlags::new(),
            Bytes::from_static(b"abcd"),
            4,
        );
        assert_eq!(frames.len(), 1);
        assert!(frames[0].flags.is_finish());

        let frames = Frame::split(Header::new(1), Bytes::new(), FrameFlags::new(), Bytes::new(), 4);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].body.is_empty());
        assert!(frames[0].flags.is_finish());
    }

    #[test]
    fn test_multiple_frames_in_buffer() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&reply(1, b"one").encode().unwrap());
        buf.extend_from_slice(&reply(2, b"two").encode().unwrap());

        let first = Frame::decode(&mut buf).unwrap().unwrap();
        let second = Frame::decode(&mut buf).unwrap().unwrap();

        assert_eq!(first.header.request_id.get(), 1);
        assert_eq!(second.body.as_ref(), b"two");
        assert!(Frame::decode(&mut buf).unwrap().is_none());
    }

    proptest! {
        #[test]
        fn prop_split_frames_decode_back_to_message(
            message in proptest::collection::vec(any::<u8>(), 0..4096),
            context in proptest::collection::vec(any::<u8>(), 0..32),
            max_body in 1usize..512,
            request_id in any::<u64>(),
            read_size in 1usize..200,
        ) {
            let frames = Frame::split(
                Header::new(request_id),
                Bytes::from(context.clone()),
                FrameFlags::new().with_result_mode(),
                Bytes::from(message.clone()),
                max_body,
            );
            let wire = Encoder::encode_frames(&frames).unwrap();

            // Feed the wire bytes in arbitrary read sizes.
            let mut decoder = Decoder::new();
            let mut decoded = Vec::new();
            for chunk in wire.chunks(read_size) {
                decoder.extend(chunk);
                while let Some(frame) = decoder.decode_frame().unwrap() {
                    decoded.push(frame);
                }
            }

            prop_assert_eq!(decoded.len(), frames.len());
            let (last, rest) = decoded.split_last().unwrap();
            prop_assert!(last.flags.is_finish());
            for frame in rest {
                prop_assert!(!frame.flags.is_finish());
                prop_assert!(frame.body.len() == max_body);
            }
            for frame in &decoded {
                prop_assert!(frame.flags.is_result_mode());
                prop_assert_eq!(frame.header.request_id.get(), request_id);
                prop_assert_eq!(frame.context.as_ref(), context.as_slice());
            }

            let body: Vec<u8> = decoded.iter().flat_map(|f| f.body.to_vec()).collect();
            prop_assert_eq!(body, message);
        }
    }
}
