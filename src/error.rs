//! Error taxonomy for the ingestion pipeline.
//!
//! # Classes
//! ```text
//! ListenerFatal    BindError / AcceptError        → stop the server
//! ConnectionFatal  Transport / Security / idle     → close this connection only
//! ProtocolFatal    framing errors / body timeout   → best-effort error response, then close
//! Recoverable      DecodeError / handler failures  → connection stays open
//! ```
//!
//! # Design Decisions
//! - One `thiserror` enum per layer; `ConnectionError` wraps the layers a
//!   pipeline can fail in
//! - Callers branch on [`ErrorClass`], never on individual variants

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Boxed error returned by external handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// How far an error propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Stops the accept loop.
    ListenerFatal,
    /// Closes the affected connection without a response.
    ConnectionFatal,
    /// Closes the affected connection after a best-effort error response.
    ProtocolFatal,
    /// Reported to the handler or the client; the connection stays open.
    Recoverable,
}

/// Failure of the underlying byte channel.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer reset the connection.
    #[error("connection reset by peer: {0}")]
    Reset(#[source] io::Error),

    /// The peer stopped reading while we were writing.
    #[error("broken pipe: {0}")]
    BrokenPipe(#[source] io::Error),

    /// Any other I/O failure.
    #[error("transport I/O error: {0}")]
    Io(#[source] io::Error),
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
                TransportError::Reset(err)
            }
            io::ErrorKind::BrokenPipe => TransportError::BrokenPipe(err),
            _ => TransportError::Io(err),
        }
    }
}

/// Failure of the security transform.
#[derive(Debug, Error)]
pub enum SecurityError {
    /// The handshake failed (bad certificate, protocol mismatch, peer abort).
    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] io::Error),

    /// The peer did not complete the handshake in time.
    #[error("TLS handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// Certificate or key material could not be loaded.
    #[error("invalid TLS material: {0}")]
    Material(String),
}

/// Framing failures. All of them are fatal to the connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("malformed start line: {0}")]
    MalformedStartLine(String),

    #[error("malformed header: {0}")]
    MalformedHeader(String),

    /// The stream ended before the declared `Content-Length` arrived.
    #[error("body ended after {received} of {expected} declared bytes")]
    BodyLengthMismatch { expected: usize, received: usize },

    #[error("chunk format error: {0}")]
    ChunkFormatError(String),

    #[error("request exceeds the {limit} byte buffering limit")]
    RequestTooLarge { limit: usize },

    #[error("request carries more than {limit} header fields")]
    TooManyHeaders { limit: usize },
}

impl ProtocolError {
    /// Status code of the best-effort error response.
    pub fn status(&self) -> u16 {
        match self {
            ProtocolError::RequestTooLarge { .. } => 413,
            ProtocolError::TooManyHeaders { .. } => 431,
            _ => 400,
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProtocolError::MalformedStartLine(_) => "malformed_start_line",
            ProtocolError::MalformedHeader(_) => "malformed_header",
            ProtocolError::BodyLengthMismatch { .. } => "body_length_mismatch",
            ProtocolError::ChunkFormatError(_) => "chunk_format",
            ProtocolError::RequestTooLarge { .. } => "request_too_large",
            ProtocolError::TooManyHeaders { .. } => "too_many_headers",
        }
    }
}

/// Body decoding failures. Recoverable: surfaced to the handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The body is not well-formed for its content type.
    #[error("syntax error: {0}")]
    Syntax(String),

    /// The body is well-formed but does not fit the requested shape.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// The content type or charset cannot be decoded.
    #[error("unsupported content: {0}")]
    Unsupported(String),
}

impl DecodeError {
    pub fn class(&self) -> ErrorClass {
        ErrorClass::Recoverable
    }
}

/// Anything that ends a single connection's pipeline.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Security(#[from] SecurityError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// No bytes arrived between messages within the idle timeout.
    #[error("connection idle for {0:?}")]
    IdleTimeout(Duration),

    /// A message was partially received when the idle timeout fired.
    #[error("request not completed within {0:?} of the last byte")]
    BodyTimeout(Duration),
}

impl ConnectionError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ConnectionError::Transport(_)
            | ConnectionError::Security(_)
            | ConnectionError::IdleTimeout(_) => ErrorClass::ConnectionFatal,
            ConnectionError::Protocol(_) | ConnectionError::BodyTimeout(_) => {
                ErrorClass::ProtocolFatal
            }
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ConnectionError::Transport(_) => "transport",
            ConnectionError::Security(_) => "security",
            ConnectionError::Protocol(err) => err.kind(),
            ConnectionError::IdleTimeout(_) => "idle_timeout",
            ConnectionError::BodyTimeout(_) => "body_timeout",
        }
    }
}
