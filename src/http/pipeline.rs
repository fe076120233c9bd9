//! Per-connection ingestion pipeline.
//!
//! # Data Flow
//! ```text
//! accepted stream
//!     → SecurityTransform::handshake   (Handshaking → Established)
//!     → TransportReader::read_chunk    (idle deadline, shutdown signal)
//!     → Framer::next_message
//!     → DecodedRequest::new
//!     → Dispatcher::dispatch
//!     → ResponseSpec::serialize → TransportWriter::write_all
//!     → loop for keep-alive, or shut the stream down (Closing → Closed)
//! ```
//!
//! # Design Decisions
//! - The task owns buffer, cursor and security state; nothing is shared
//! - Messages are handled strictly one at a time in arrival order
//! - Reads and the handshake are the only suspension points on the
//!   ingestion side

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::time::error::Elapsed;
use tracing::Instrument;

use crate::config::ServerConfig;
use crate::error::{ConnectionError, ProtocolError, TransportError};
use crate::http::decoder::DecodedRequest;
use crate::http::dispatch::Dispatcher;
use crate::http::framer::{Framer, FramerLimits};
use crate::http::request::{Message, Version};
use crate::http::response::{ResponseSpec, CONTINUE};
use crate::lifecycle::shutdown::recv_shutdown;
use crate::net::{
    BoxedStream, ConnectionState, ReadOutcome, SecurityTransform, TransportReader, TransportWriter,
};
use crate::observability::{metrics, tracing::request_span};
use crate::resilience::IdleDeadline;

/// Knobs each pipeline needs, extracted once from the server config.
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub idle_timeout: Duration,
    pub read_chunk_size: usize,
    pub limits: FramerLimits,
}

impl PipelineSettings {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            idle_timeout: Duration::from_secs(config.timeouts.idle_secs),
            read_chunk_size: config.http.read_chunk_size,
            limits: FramerLimits::from(&config.http),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default())
    }
}

/// Drive one accepted connection until it closes.
///
/// Returns `Ok` for an orderly close (peer finished, `Connection: close`,
/// shutdown) and the reason otherwise.
pub async fn serve_connection(
    stream: BoxedStream,
    peer_addr: SocketAddr,
    security: Arc<dyn SecurityTransform>,
    dispatcher: Dispatcher,
    settings: PipelineSettings,
    shutdown: broadcast::Receiver<()>,
) -> Result<(), ConnectionError> {
    let mut state = ConnectionState::Handshaking;
    let secured = security.handshake(stream).await?;
    state.advance(ConnectionState::Established);
    tracing::debug!(state = ?state, "Connection established");

    let (read_half, write_half) = tokio::io::split(secured);
    let mut pipeline = Pipeline {
        reader: TransportReader::new(read_half),
        writer: TransportWriter::new(write_half),
        framer: Framer::new(settings.limits),
        dispatcher,
        settings,
        peer_addr,
        shutdown,
        draining: false,
    };

    let result = pipeline.run().await;

    state.advance(ConnectionState::Closing);
    if let Err(e) = pipeline.writer.shutdown().await {
        tracing::trace!(error = %e, "Shutdown of write side failed");
    }
    state.advance(ConnectionState::Closed);
    tracing::trace!(state = ?state, "Pipeline finished");

    result
}

/// What woke the read loop.
enum Wake {
    Shutdown,
    Read(Result<Result<ReadOutcome, TransportError>, Elapsed>),
}

struct Pipeline {
    reader: TransportReader<ReadHalf<BoxedStream>>,
    writer: TransportWriter<WriteHalf<BoxedStream>>,
    framer: Framer,
    dispatcher: Dispatcher,
    settings: PipelineSettings,
    peer_addr: SocketAddr,
    shutdown: broadcast::Receiver<()>,
    /// Shutdown was signalled: finish the current message, then close.
    draining: bool,
}

impl Pipeline {
    async fn run(&mut self) -> Result<(), ConnectionError> {
        let mut deadline = IdleDeadline::new(self.settings.idle_timeout);

        loop {
            // Everything already buffered is framed before reading again,
            // so pipelined messages never wait on the transport.
            loop {
                match self.framer.next_message() {
                    Ok(Some(message)) => {
                        if !self.respond(message).await? {
                            return Ok(());
                        }
                    }
                    Ok(None) => break,
                    Err(err) => return Err(self.reject(err).await),
                }
            }

            if self.framer.take_continue() {
                self.writer.write_all(CONTINUE).await?;
            }
            if self.draining && self.framer.is_idle() {
                tracing::debug!("Closing idle connection for shutdown");
                return Ok(());
            }

            deadline.reset();
            let wake = tokio::select! {
                biased;
                _ = recv_shutdown(&mut self.shutdown), if !self.draining => Wake::Shutdown,
                read = deadline.run(self.reader.read_chunk(self.settings.read_chunk_size)) => {
                    Wake::Read(read)
                }
            };

            match wake {
                Wake::Shutdown => self.draining = true,
                Wake::Read(Err(_)) => return Err(self.timed_out(deadline.idle()).await),
                Wake::Read(Ok(Err(e))) => return Err(e.into()),
                Wake::Read(Ok(Ok(ReadOutcome::Chunk(chunk)))) => {
                    tracing::trace!(bytes = chunk.len(), "Read chunk");
                    self.framer.push(chunk.as_bytes());
                }
                Wake::Read(Ok(Ok(ReadOutcome::EndOfStream))) => return self.finish().await,
            }
        }
    }

    /// The peer closed its write side; answer whatever is still complete.
    async fn finish(&mut self) -> Result<(), ConnectionError> {
        loop {
            match self.framer.finish() {
                Ok(Some(message)) => {
                    if !self.respond(message).await? {
                        return Ok(());
                    }
                }
                Ok(None) => {
                    tracing::debug!("Peer closed connection");
                    return Ok(());
                }
                Err(err) => return Err(self.reject(err).await),
            }
        }
    }

    /// Decode, dispatch and write one response. Returns whether the
    /// connection stays open.
    async fn respond(&mut self, message: Message) -> Result<bool, ConnectionError> {
        let started = Instant::now();
        let request = DecodedRequest::new(message, self.peer_addr);
        let span = request_span(
            request.id(),
            request.message().method(),
            request.message().target(),
        );

        async move {
            let request_id = request.id();
            let version = request.message().version();
            let include_body = request.message().method() != "HEAD";
            let client_keep_alive = request.message().keep_alive();
            if let Err(e) = request.body() {
                tracing::debug!(error = %e, "Body could not be decoded");
            }

            let response = self.dispatcher.dispatch(request).await;
            self.observe_shutdown();
            let keep_alive = client_keep_alive && !response.wants_close() && !self.draining;

            let wire = response.serialize(version, Some(request_id), include_body, !keep_alive);
            self.writer.write_all(&wire).await?;

            metrics::record_request(response.status(), started);
            tracing::debug!(
                status = response.status(),
                keep_alive,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Request completed"
            );
            Ok(keep_alive)
        }
        .instrument(span)
        .await
    }

    /// Pick up a shutdown signalled while the handler was running, so the
    /// response already carries `Connection: close`.
    fn observe_shutdown(&mut self) {
        if self.draining {
            return;
        }
        match self.shutdown.try_recv() {
            Ok(()) | Err(TryRecvError::Lagged(_)) => self.draining = true,
            Err(TryRecvError::Empty | TryRecvError::Closed) => {}
        }
    }

    /// Best-effort error response for an unframeable request.
    async fn reject(&mut self, err: ProtocolError) -> ConnectionError {
        tracing::warn!(error = %err, "Rejecting malformed request");
        self.send_error(ResponseSpec::from_protocol_error(&err)).await;
        err.into()
    }

    async fn timed_out(&mut self, idle: Duration) -> ConnectionError {
        if self.framer.is_idle() {
            return ConnectionError::IdleTimeout(idle);
        }
        tracing::warn!(
            idle_ms = idle.as_millis() as u64,
            phase = ?self.framer.phase(),
            "Request stalled"
        );
        self.send_error(ResponseSpec::request_timeout()).await;
        ConnectionError::BodyTimeout(idle)
    }

    async fn send_error(&mut self, response: ResponseSpec) {
        let started = Instant::now();
        let wire = response.serialize(Version::Http11, None, true, true);
        match self.writer.write_all(&wire).await {
            Ok(()) => metrics::record_request(response.status(), started),
            Err(e) => tracing::debug!(error = %e, "Failed to write error response"),
        }
    }
}
