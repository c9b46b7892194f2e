//! Async helpers for reading and writing length-prefixed frames

use crate::error::Result;
use metal_shared::codec::{self, FrameDecoder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Reads frames off a stream, buffering partial data between calls
pub struct FrameReader<R> {
    reader: R,
    decoder: FrameDecoder,
    read_buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            decoder: FrameDecoder::new(),
            read_buf: vec![0u8; 4096],
        }
    }

    /// Read the next complete frame. Returns `Ok(None)` once the peer closes
    /// the stream.
    pub async fn next<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        loop {
            if let Some(message) = self.decoder.decode_next()? {
                return Ok(Some(message));
            }

            let n = self.reader.read(&mut self.read_buf).await?;
            if n == 0 {
                return Ok(None);
            }
            self.decoder.extend(&self.read_buf[..n]);
        }
    }
}

/// Encode `message` and write it as one frame
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let encoded = codec::encode(message)?;
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}
