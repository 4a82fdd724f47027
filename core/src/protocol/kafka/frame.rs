//! Length-prefixed framing
//!
//! Every Kafka message on the wire is a signed big-endian int32 size followed
//! by exactly that many bytes. [`KafkaFrameCodec`] plugs this into
//! `tokio_util::codec::Framed`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use super::codec::{CodecError, Result};

/// Upper bound on a frame accepted by default (100 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

const LENGTH_PREFIX: usize = 4;

#[derive(Debug, Clone, Copy)]
pub struct KafkaFrameCodec {
    max_frame_size: usize,
}

impl KafkaFrameCodec {
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for KafkaFrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for KafkaFrameCodec {
    type Item = Bytes;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < LENGTH_PREFIX {
            return Ok(None);
        }

        // Peek at the length without consuming it
        let mut prefix = [0u8; LENGTH_PREFIX];
        prefix.copy_from_slice(&src[..LENGTH_PREFIX]);
        let message_length = i32::from_be_bytes(prefix);

        if message_length < 0 {
            return Err(CodecError::InvalidLength {
                kind: "frame",
                length: message_length as i64,
            });
        }
        let message_length = message_length as usize;
        if message_length > self.max_frame_size {
            return Err(CodecError::FrameTooLarge {
                size: message_length,
                max: self.max_frame_size,
            });
        }

        let total_length = LENGTH_PREFIX + message_length;
        if src.len() < total_length {
            src.reserve(total_length - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX);
        let frame = src.split_to(message_length).freeze();
        trace!(frame_len = message_length, "decoded frame");
        Ok(Some(frame))
    }
}

impl Encoder<Bytes> for KafkaFrameCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        if item.len() > self.max_frame_size || item.len() > i32::MAX as usize {
            return Err(CodecError::FrameTooLarge {
                size: item.len(),
                max: self.max_frame_size,
            });
        }
        dst.reserve(LENGTH_PREFIX + item.len());
        dst.put_i32(item.len() as i32);
        dst.put_slice(&item);
        Ok(())
    }
}
