//! TCP listener implementation with backpressure.
//!
//! # Responsibilities
//! - Bind to the configured address with the configured accept backlog
//! - Accept incoming TCP connections
//! - Enforce max_connections limit via semaphore
//! - Absorb per-peer accept failures and back off on resource exhaustion;
//!   surface only listener-fatal ones

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::Semaphore;

use crate::config::ListenerConfig;
use crate::error::ErrorClass;

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to bind to address (in use, invalid, not permitted).
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    /// The listening socket itself failed.
    #[error("Failed to accept: {0}")]
    Accept(#[source] io::Error),

    /// The listener was closed.
    #[error("Listener closed")]
    Closed,
}

impl ListenerError {
    pub fn class(&self) -> ErrorClass {
        ErrorClass::ListenerFatal
    }

    fn bind(address: &str, source: io::Error) -> Self {
        ListenerError::Bind {
            address: address.to_string(),
            source,
        }
    }
}

/// A bounded TCP listener that limits concurrent connections.
///
/// The OS owns the backlog queue; its capacity is fixed at bind time. On top
/// of it a semaphore enforces `max_connections`: when the limit is reached,
/// `accept_next` waits until a slot becomes available and new peers queue in
/// the backlog.
pub struct Listener {
    /// The underlying TCP listener.
    inner: TcpListener,
    /// Semaphore to limit concurrent connections.
    connection_limit: Arc<Semaphore>,
    /// Configured maximum connections.
    max_connections: usize,
    /// Configured backlog capacity.
    backlog: u32,
}

/// An accepted connection and the slot it occupies.
#[derive(Debug)]
pub struct Accepted {
    pub stream: TcpStream,
    pub peer_addr: SocketAddr,
    pub permit: ConnectionPermit,
}

impl Listener {
    /// Bind to the configured address with the configured backlog.
    pub fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
            ListenerError::bind(
                &config.bind_address,
                io::Error::new(io::ErrorKind::InvalidInput, e),
            )
        })?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(|e| ListenerError::bind(&config.bind_address, e))?;

        #[cfg(unix)]
        socket
            .set_reuseaddr(true)
            .map_err(|e| ListenerError::bind(&config.bind_address, e))?;

        socket
            .bind(addr)
            .map_err(|e| ListenerError::bind(&config.bind_address, e))?;

        let listener = socket
            .listen(config.backlog)
            .map_err(|e| ListenerError::bind(&config.bind_address, e))?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| ListenerError::bind(&config.bind_address, e))?;

        tracing::info!(
            address = %local_addr,
            backlog = config.backlog,
            max_connections = config.max_connections,
            "Listener bound"
        );

        Ok(Self {
            inner: listener,
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
            max_connections: config.max_connections,
            backlog: config.backlog,
        })
    }

    /// Accept the next connection, respecting the connection limit.
    ///
    /// Waits if the connection limit has been reached. Failures caused by a
    /// single peer (reset or aborted before we got to it) are logged and
    /// skipped, descriptor or buffer exhaustion is retried after a short
    /// pause; only failures of the listening socket are returned.
    pub async fn accept_next(&self) -> Result<Accepted, ListenerError> {
        // Acquire permit first (backpressure)
        let permit = self
            .connection_limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;

        loop {
            match self.inner.accept().await {
                Ok((stream, peer_addr)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!(peer_addr = %peer_addr, error = %e, "Failed to set TCP_NODELAY");
                    }

                    tracing::debug!(
                        peer_addr = %peer_addr,
                        available_permits = self.connection_limit.available_permits(),
                        "Connection accepted"
                    );

                    return Ok(Accepted {
                        stream,
                        peer_addr,
                        permit: ConnectionPermit { _permit: permit },
                    });
                }
                Err(e) => match classify_accept_error(&e) {
                    AcceptFailure::PerPeer => {
                        tracing::warn!(error = %e, "Dropped connection before accept");
                    }
                    AcceptFailure::Exhausted => {
                        tracing::error!(
                            error = %e,
                            backoff_ms = RESOURCE_BACKOFF.as_millis() as u64,
                            "Out of resources while accepting, backing off"
                        );
                        tokio::time::sleep(RESOURCE_BACKOFF).await;
                    }
                    AcceptFailure::Fatal => return Err(ListenerError::Accept(e)),
                },
            }
        }
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, io::Error> {
        self.inner.local_addr()
    }

    /// Get current available connection slots.
    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }

    /// Get configured maximum connections.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Get configured backlog capacity.
    pub fn backlog(&self) -> u32 {
        self.backlog
    }
}

/// Pause before retrying accept after descriptor or buffer exhaustion.
const RESOURCE_BACKOFF: Duration = Duration::from_millis(100);

#[cfg(unix)]
const ENOMEM: i32 = 12;
#[cfg(unix)]
const ENFILE: i32 = 23;
#[cfg(unix)]
const EMFILE: i32 = 24;
#[cfg(target_os = "linux")]
const ENOBUFS: i32 = 105;
#[cfg(all(unix, not(target_os = "linux")))]
const ENOBUFS: i32 = 55;
#[cfg(windows)]
const WSAEMFILE: i32 = 10024;
#[cfg(windows)]
const WSAENOBUFS: i32 = 10055;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcceptFailure {
    /// One peer went away before we accepted it.
    PerPeer,
    /// The process or system ran out of descriptors or buffers; passes once
    /// connections close.
    Exhausted,
    /// The listening socket itself is broken.
    Fatal,
}

fn classify_accept_error(err: &io::Error) -> AcceptFailure {
    match err.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock => return AcceptFailure::PerPeer,
        io::ErrorKind::OutOfMemory => return AcceptFailure::Exhausted,
        _ => {}
    }

    match err.raw_os_error() {
        #[cfg(unix)]
        Some(ENOMEM | ENFILE | EMFILE | ENOBUFS) => AcceptFailure::Exhausted,
        #[cfg(windows)]
        Some(WSAEMFILE | WSAENOBUFS) => AcceptFailure::Exhausted,
        _ => AcceptFailure::Fatal,
    }
}

/// A permit representing a connection slot.
///
/// When dropped, the connection slot is released back to the pool.
/// This ensures backpressure is maintained even if the connection task panics.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(addr: &str, max_connections: usize) -> ListenerConfig {
        ListenerConfig {
            bind_address: addr.to_string(),
            backlog: 16,
            max_connections,
            tls: None,
        }
    }

    #[tokio::test]
    async fn bind_rejects_invalid_address() {
        let err = Listener::bind(&config("not-an-addr", 1)).err().unwrap();
        assert!(matches!(err, ListenerError::Bind { .. }));
        assert_eq!(err.class(), ErrorClass::ListenerFatal);
    }

    #[tokio::test]
    async fn bind_rejects_address_in_use() {
        let first = Listener::bind(&config("127.0.0.1:0", 1)).unwrap();
        let addr = first.local_addr().unwrap();

        let err = Listener::bind(&config(&addr.to_string(), 1)).err().unwrap();
        assert!(matches!(err, ListenerError::Bind { .. }));
    }

    #[test]
    fn peer_failures_are_skipped() {
        for kind in [
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::Interrupted,
        ] {
            assert_eq!(
                classify_accept_error(&io::Error::from(kind)),
                AcceptFailure::PerPeer
            );
        }
    }

    #[cfg(unix)]
    #[test]
    fn descriptor_exhaustion_is_not_fatal() {
        for errno in [EMFILE, ENFILE, ENOBUFS, ENOMEM] {
            let err = io::Error::from_raw_os_error(errno);
            assert_eq!(classify_accept_error(&err), AcceptFailure::Exhausted, "errno {errno}");
        }
    }

    #[test]
    fn other_failures_stop_the_listener() {
        let err = io::Error::from(io::ErrorKind::InvalidInput);
        assert_eq!(classify_accept_error(&err), AcceptFailure::Fatal);
    }

    #[tokio::test]
    async fn accept_holds_a_permit_per_connection() {
        let listener = Listener::bind(&config("127.0.0.1:0", 2)).unwrap();
        let addr = listener.local_addr().unwrap();
        assert_eq!(listener.backlog(), 16);

        let _client = TcpStream::connect(addr).await.unwrap();
        let accepted = listener.accept_next().await.unwrap();
        assert_eq!(listener.available_permits(), 1);

        drop(accepted);
        assert_eq!(listener.available_permits(), 2);
    }
}
