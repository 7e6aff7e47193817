//! Async frame reader and writer over tokio byte streams.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::framing::{FramingError, LengthCodec};

const READ_CHUNK: usize = 8 * 1024;

/// Reads whole frames from the read half of a stream.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    codec: LengthCodec,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, codec: LengthCodec) -> Self {
        Self {
            inner,
            codec,
            buf: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    /// Wait for the next complete frame.
    ///
    /// Returns `Ok(None)` when the peer closes the stream between frames and
    /// `FramingError::Incomplete` when it closes in the middle of one.
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, FramingError> {
        loop {
            if let Some(frame) = self.codec.decode_stream(&mut self.buf)? {
                return Ok(Some(frame));
            }

            self.buf.reserve(READ_CHUNK);
            let n = self.inner.read_buf(&mut self.buf).await?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                let missing = self.codec.missing(&self.buf);
                tracing::debug!(missing, "stream closed mid-frame");
                return Err(FramingError::Incomplete(missing));
            }
        }
    }
}

/// Writes whole frames to the write half of a stream.
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
    codec: LengthCodec,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W, codec: LengthCodec) -> Self {
        Self { inner, codec }
    }

    /// Write one frame and flush it.
    pub async fn write_frame(&mut self, data: &[u8]) -> Result<(), FramingError> {
        let encoded = self.codec.encode(data)?;
        self.inner.write_all(&encoded).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Close the write direction of the stream.
    pub async fn shutdown(&mut self) -> Result<(), FramingError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

/// Split a TCP stream into a framed reader and writer.
pub fn split_framed(
    stream: TcpStream,
    codec: LengthCodec,
) -> (FrameReader<OwnedReadHalf>, FrameWriter<OwnedWriteHalf>) {
    let (read, write) = stream.into_split();
    (FrameReader::new(read, codec), FrameWriter::new(write, codec))
}
