//! Pluggable security transform.
//!
//! A transform takes the raw accepted stream, completes whatever key
//! negotiation it needs, and hands back a stream that decrypts on read and
//! encrypts on write. The pipeline above never knows which one it got.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::SecurityError;

/// Duplex byte stream the pipeline can run over.
pub trait IoStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> IoStream for T {}

/// Type-erased stream handed between the listener, the transform and the pipeline.
pub type BoxedStream = Box<dyn IoStream>;

/// Handshake capability wrapped around every accepted connection.
#[async_trait]
pub trait SecurityTransform: Send + Sync + 'static {
    /// Label used in logs.
    fn name(&self) -> &'static str;

    /// Complete key negotiation and return the plaintext view of `stream`.
    ///
    /// No application bytes are released before this returns `Ok`.
    async fn handshake(&self, stream: BoxedStream) -> Result<BoxedStream, SecurityError>;
}

/// Identity transform for plaintext listeners.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

#[async_trait]
impl SecurityTransform for PassThrough {
    fn name(&self) -> &'static str {
        "plaintext"
    }

    async fn handshake(&self, stream: BoxedStream) -> Result<BoxedStream, SecurityError> {
        Ok(stream)
    }
}
