//! Transport reader and writer.
//!
//! The reader turns a byte channel that delivers arbitrarily sized,
//! arbitrarily timed pieces into a sequence of [`RawChunk`]s. Only the
//! calling task suspends on a read; every connection has its own reader.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::TransportError;

/// Bytes produced by one read. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChunk(Bytes);

impl RawChunk {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always `false`: a zero-byte read is reported as end of stream instead.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

/// Result of a single read.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    Chunk(RawChunk),
    /// The peer closed its write side.
    EndOfStream,
}

/// Incremental reader over one connection.
pub struct TransportReader<R> {
    inner: R,
    scratch: Vec<u8>,
}

impl<R: AsyncRead + Unpin> TransportReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            scratch: Vec::new(),
        }
    }

    /// Perform one underlying read of at most `max_size` bytes.
    pub async fn read_chunk(&mut self, max_size: usize) -> Result<ReadOutcome, TransportError> {
        let max_size = max_size.max(1);
        if self.scratch.len() < max_size {
            self.scratch.resize(max_size, 0);
        }

        let n = self.inner.read(&mut self.scratch[..max_size]).await?;
        if n == 0 {
            return Ok(ReadOutcome::EndOfStream);
        }

        Ok(ReadOutcome::Chunk(RawChunk(Bytes::copy_from_slice(
            &self.scratch[..n],
        ))))
    }
}

/// Writer half of one connection.
pub struct TransportWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> TransportWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Write every byte and flush, so encrypting transports emit their records.
    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.inner.write_all(bytes).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Close the write side (sends TLS close_notify on secured streams).
    pub async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
