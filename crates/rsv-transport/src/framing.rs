//! Length-prefixed framing for reliable message delimiting.

use bytes::{Buf, BufMut, BytesMut};
use std::io;
use thiserror::Error;

/// Default maximum frame size (1 MiB)
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Size of the length prefix
pub const LENGTH_PREFIX: usize = 4;

/// Framing error
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("Frame too large: {0} bytes (max: {1})")]
    TooLarge(usize, usize),

    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Length-prefixed frame codec
#[derive(Debug, Clone, Copy)]
pub struct LengthCodec {
    max_frame_size: usize,
}

impl Default for LengthCodec {
    fn default() -> Self {
        Self::new(MAX_FRAME_SIZE)
    }
}

impl LengthCodec {
    /// Create a new codec with the specified maximum frame size
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Encode data with length prefix
    /// Format: length (4 bytes BE) || data
    pub fn encode(&self, data: &[u8]) -> Result<Vec<u8>, FramingError> {
        self.check_len(data.len())?;

        let mut encoded = Vec::with_capacity(LENGTH_PREFIX + data.len());
        encoded.put_u32(data.len() as u32);
        encoded.extend_from_slice(data);
        Ok(encoded)
    }

    /// Decode a single complete frame
    pub fn decode(&self, framed: &[u8]) -> Result<Vec<u8>, FramingError> {
        if framed.len() < LENGTH_PREFIX {
            return Err(FramingError::Incomplete(LENGTH_PREFIX - framed.len()));
        }

        let mut buf = framed;
        let len = buf.get_u32() as usize;
        self.check_len(len)?;

        if buf.remaining() < len {
            return Err(FramingError::Incomplete(len - buf.remaining()));
        }

        Ok(buf[..len].to_vec())
    }

    /// Streaming decoder for partial reads
    /// Returns Some(data) when a complete frame is available, None if more data needed
    pub fn decode_stream(&self, buf: &mut BytesMut) -> Result<Option<Vec<u8>>, FramingError> {
        if buf.len() < LENGTH_PREFIX {
            return Ok(None);
        }

        let len = {
            let mut len_buf = &buf[..LENGTH_PREFIX];
            len_buf.get_u32() as usize
        };
        self.check_len(len)?;

        if buf.len() < LENGTH_PREFIX + len {
            // Reserve up front so large frames are not read in small steps.
            buf.reserve(LENGTH_PREFIX + len - buf.len());
            return Ok(None);
        }

        buf.advance(LENGTH_PREFIX);
        let frame = buf.split_to(len).to_vec();
        Ok(Some(frame))
    }

    /// Bytes still missing before the frame at the head of `buf` is complete.
    pub fn missing(&self, buf: &[u8]) -> usize {
        if buf.len() < LENGTH_PREFIX {
            return LENGTH_PREFIX - buf.len();
        }
        let mut len_buf = &buf[..LENGTH_PREFIX];
        let len = len_buf.get_u32() as usize;
        (LENGTH_PREFIX + len).saturating_sub(buf.len())
    }

    fn check_len(&self, len: usize) -> Result<(), FramingError> {
        if len > self.max_frame_size {
            return Err(FramingError::TooLarge(len, self.max_frame_size));
        }
        Ok(())
    }
}
