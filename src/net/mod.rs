//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (backlog, accept loop, connection limits)
//!     → security.rs / tls.rs (handshake; plaintext or TLS)
//!     → transport.rs (chunked reads, flushed writes)
//!     → connection.rs (identity, lifecycle state, open-connection count)
//!     → Hand off to HTTP layer
//!
//! Connection States:
//!     Handshaking → Established → Closing → Closed
//! ```
//!
//! # Design Decisions
//! - The OS owns the accept backlog; we only size it
//! - Each connection tracked for graceful shutdown
//! - TLS is optional and handled transparently behind `SecurityTransform`

pub mod connection;
pub mod listener;
pub mod security;
pub mod tls;
pub mod transport;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionState, ConnectionTracker};
pub use listener::{Accepted, Listener, ListenerError};
pub use security::{BoxedStream, IoStream, PassThrough, SecurityTransform};
pub use tls::TlsTransform;
pub use transport::{RawChunk, ReadOutcome, TransportReader, TransportWriter};
