//! Tokio codec for framing transport messages on a byte stream.
//!
//! The session exchanges two kinds of frames with the server: JSON text
//! frames and binary firmware chunks. On a raw byte stream each frame is
//! written as
//!
//! ```text
//! +------+----------------+-----------------+
//! | kind | length (u32be) | payload         |
//! +------+----------------+-----------------+
//!   1 B        4 B          `length` bytes
//! ```
//!
//! with kind `0x01` for text and `0x02` for binary.
//!
//! # Usage with Tokio Framed
//!
//! ```rust,no_run
//! use tokio::net::TcpStream;
//! use tokio_util::codec::Framed;
//! use attractap_protocol::{Frame, FrameCodec};
//! use futures::{SinkExt, StreamExt};
//!
//! # async fn example() -> attractap_protocol::Result<()> {
//! let stream = TcpStream::connect("127.0.0.1:3000").await?;
//! let mut framed = Framed::new(stream, FrameCodec::new());
//!
//! framed.send(Frame::text(r#"{"event":"HEARTBEAT","data":{}}"#)).await?;
//!
//! if let Some(Ok(frame)) = framed.next().await {
//!     println!("Received: {:?}", frame);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # DoS Protection
//!
//! Frames announcing a length above the configured maximum (default 64 KiB)
//! are rejected as soon as the header has been read, before any payload is
//! buffered.

use crate::error::{ProtocolError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Default maximum frame size in bytes (64 KiB).
const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

const HEADER_LEN: usize = 5;
const KIND_TEXT: u8 = 0x01;
const KIND_BINARY: u8 = 0x02;

/// One transport frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 JSON envelope.
    Text(String),
    /// Raw bytes, used for firmware chunks.
    Binary(Bytes),
}

impl Frame {
    pub fn text(text: impl Into<String>) -> Self {
        Frame::Text(text.into())
    }

    pub fn binary(bytes: impl Into<Bytes>) -> Self {
        Frame::Binary(bytes.into())
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Frame::Text(_))
    }
}

/// Length-prefixed frame codec.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    /// Frames with a larger payload are rejected in both directions.
    max_frame_size: usize,
}

impl FrameCodec {
    /// Codec with the default 64 KiB limit.
    ///
    /// ```
    /// use attractap_protocol::FrameCodec;
    ///
    /// assert_eq!(FrameCodec::new().max_frame_size(), 64 * 1024);
    /// ```
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let kind = src[0];
        if kind != KIND_TEXT && kind != KIND_BINARY {
            return Err(ProtocolError::UnknownFrameKind(kind));
        }

        let len = u32::from_be_bytes([src[1], src[2], src[3], src[4]]) as usize;
        if len > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: len,
                max_size: self.max_frame_size,
            });
        }

        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let payload = src.split_to(len).freeze();

        let frame = if kind == KIND_TEXT {
            let text = String::from_utf8(payload.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)?;
            Frame::Text(text)
        } else {
            Frame::Binary(payload)
        };
        Ok(Some(frame))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<()> {
        let len = item.len();
        if len > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: len,
                max_size: self.max_frame_size,
            });
        }
        let len_prefix = u32::try_from(len).map_err(|_| ProtocolError::FrameTooLarge {
            size: len,
            max_size: self.max_frame_size,
        })?;

        dst.reserve(HEADER_LEN + len);
        match item {
            Frame::Text(text) => {
                dst.put_u8(KIND_TEXT);
                dst.put_u32(len_prefix);
                dst.extend_from_slice(text.as_bytes());
            }
            Frame::Binary(bytes) => {
                dst.put_u8(KIND_BINARY);
                dst.put_u32(len_prefix);
                dst.extend_from_slice(&bytes);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_new() {
        let codec = FrameCodec::new();
        assert_eq!(codec.max_frame_size(), DEFAULT_MAX_FRAME_SIZE);
    }

    #[test]
    fn test_codec_with_custom_max_size() {
        let codec = FrameCodec::with_max_frame_size(128);
        assert_eq!(codec.max_frame_size(), 128);
    }

    #[test]
    fn test_encode_text_layout() {
        let mut codec = FrameCodec::new();
        let mut buffer = BytesMut::new();
        codec.encode(Frame::text("hi"), &mut buffer).unwrap();
        assert_eq!(&buffer[..], &[0x01, 0, 0, 0, 2, b'h', b'i']);
    }

    #[test]
    fn test_decode_partial_header() {
        let mut codec = FrameCodec::new();
        let mut buffer = BytesMut::from(&[0x01, 0, 0][..]);
        assert!(codec.decode(&mut buffer).unwrap().is_none());
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn test_decode_partial_payload() {
        let mut codec = FrameCodec::new();
        let mut buffer = BytesMut::from(&[0x02, 0, 0, 0, 4, 0xde, 0xad][..]);
        assert!(codec.decode(&mut buffer).unwrap().is_none());

        buffer.extend_from_slice(&[0xbe, 0xef]);
        let frame = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(frame, Frame::binary(vec![0xde, 0xad, 0xbe, 0xef]));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_decode_multiple_frames_in_buffer() {
        let mut codec = FrameCodec::new();
        let mut buffer = BytesMut::new();
        codec.encode(Frame::text("a"), &mut buffer).unwrap();
        codec.encode(Frame::text("b"), &mut buffer).unwrap();

        assert_eq!(codec.decode(&mut buffer).unwrap(), Some(Frame::text("a")));
        assert_eq!(codec.decode(&mut buffer).unwrap(), Some(Frame::text("b")));
        assert_eq!(codec.decode(&mut buffer).unwrap(), None);
    }

    #[test]
    fn test_decode_unknown_kind() {
        let mut codec = FrameCodec::new();
        let mut buffer = BytesMut::from(&[0x09, 0, 0, 0, 0][..]);
        assert!(matches!(
            codec.decode(&mut buffer),
            Err(ProtocolError::UnknownFrameKind(0x09))
        ));
    }

    #[test]
    fn test_decode_frame_too_large() {
        let mut codec = FrameCodec::with_max_frame_size(10);
        let mut buffer = BytesMut::from(&[0x02, 0, 0, 0, 11][..]);
        match codec.decode(&mut buffer) {
            Err(ProtocolError::FrameTooLarge { size, max_size }) => {
                assert_eq!(size, 11);
                assert_eq!(max_size, 10);
            }
            other => panic!("Expected FrameTooLarge error, got {other:?}"),
        }
    }

    #[test]
    fn test_encode_frame_too_large() {
        let mut codec = FrameCodec::with_max_frame_size(4);
        let mut buffer = BytesMut::new();
        let result = codec.encode(Frame::binary(vec![0u8; 5]), &mut buffer);
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { .. })));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_decode_invalid_utf8() {
        let mut codec = FrameCodec::new();
        let mut buffer = BytesMut::from(&[0x01, 0, 0, 0, 2, 0xff, 0xfe][..]);
        assert!(matches!(
            codec.decode(&mut buffer),
            Err(ProtocolError::InvalidUtf8)
        ));
    }

    #[test]
    fn test_empty_binary_frame() {
        let mut codec = FrameCodec::new();
        let mut buffer = BytesMut::new();
        codec.encode(Frame::binary(Bytes::new()), &mut buffer).unwrap();
        let frame = codec.decode(&mut buffer).unwrap().unwrap();
        assert!(frame.is_empty());
        assert!(!frame.is_text());
    }
}
