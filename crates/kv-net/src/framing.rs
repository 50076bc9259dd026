//! Length-prefixed message framing for the sync wire protocol.
//!
//! The codec itself is payload-agnostic: a frame is just an opaque byte
//! blob, one big-endian u32 length prefix followed by that many bytes.
//! [`kv_sync`](../kv_sync/index.html)'s message enum is encoded into that
//! payload with the shared byte codec, so framing and message semantics
//! stay cleanly separated.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Maximum frame size (16 MB). A sync peer sending more than this in one
/// message is treated as misbehaving rather than given an unbounded buffer.
const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Framing errors
#[derive(Debug, Error)]
pub enum FrameError {
    /// A frame's declared length exceeded [`MAX_FRAME_SIZE`]
    #[error("frame too large: {0} bytes (max {MAX_FRAME_SIZE})")]
    TooLarge(usize),
    /// The underlying stream failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Length-delimited framing codec: `length(u32 BE) | payload`.
#[derive(Default)]
pub struct FrameCodec;

impl FrameCodec {
    /// Build a new codec.
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for FrameCodec {
    type Item = Vec<u8>;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 4 {
            return Ok(None);
        }
        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if length > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge(length));
        }
        if src.len() < 4 + length {
            src.reserve(4 + length - src.len());
            return Ok(None);
        }
        src.advance(4);
        Ok(Some(src.split_to(length).to_vec()))
    }
}

impl Encoder<Vec<u8>> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Vec<u8>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() > MAX_FRAME_SIZE {
            return Err(FrameError::TooLarge(item.len()));
        }
        dst.reserve(4 + item.len());
        dst.put_u32(item.len() as u32);
        dst.put_slice(&item);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_a_single_frame() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(vec![1, 2, 3, 4, 5], &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn partial_frame_returns_none() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(vec![1, 2, 3], &mut buf).unwrap();
        let mut partial = buf.split_to(buf.len() - 1);
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_FRAME_SIZE + 1) as u32);
        assert!(matches!(codec.decode(&mut buf), Err(FrameError::TooLarge(_))));
    }

    #[test]
    fn two_frames_back_to_back_decode_independently() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(vec![1], &mut buf).unwrap();
        codec.encode(vec![2, 2], &mut buf).unwrap();
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(vec![1]));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(vec![2, 2]));
    }
}
