//! Length-prefixed binary framing.
//!
//! Each frame is a 4-byte big-endian payload length followed by the
//! serializer's payload.

use crate::domain::error::RpcError;
use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

pub const LENGTH_FIELD_BYTES: usize = 4;

#[derive(Debug)]
pub struct BinaryFraming {
    inner: LengthDelimitedCodec,
}

impl BinaryFraming {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .length_field_length(LENGTH_FIELD_BYTES)
                .big_endian()
                .max_frame_length(max_frame_size)
                .new_codec(),
        }
    }
}

impl Decoder for BinaryFraming {
    type Item = BytesMut;
    type Error = RpcError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>, RpcError> {
        self.inner
            .decode(src)
            .map_err(|e| RpcError::Protocol(format!("bad frame: {e}")))
    }
}

impl Encoder<Bytes> for BinaryFraming {
    type Error = RpcError;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> Result<(), RpcError> {
        self.inner
            .encode(payload, dst)
            .map_err(|e| RpcError::Serialization(format!("cannot frame payload: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout() {
        let mut framing = BinaryFraming::new(1024);
        let mut buf = BytesMut::new();
        framing.encode(Bytes::from_static(b"hello"), &mut buf).unwrap();
        assert_eq!(&buf[..4], &[0, 0, 0, 5]);
        assert_eq!(&buf[4..], b"hello");

        let frame = framing.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&frame[..], b"hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_frame_waits() {
        let mut framing = BinaryFraming::new(1024);
        let mut buf = BytesMut::from(&[0u8, 0, 0, 5, b'h', b'e'][..]);
        assert!(framing.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"llo");
        assert!(framing.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut framing = BinaryFraming::new(8);
        let mut buf = BytesMut::from(&[0u8, 0, 1, 0][..]);
        assert!(matches!(framing.decode(&mut buf), Err(RpcError::Protocol(_))));
    }
}
