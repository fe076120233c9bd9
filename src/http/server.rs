//! Accept loop.
//!
//! # Responsibilities
//! - Build the security transform from config (TLS or plaintext)
//! - Accept connections and spawn one independent pipeline task per connection
//! - Log and count pipeline failures by error class
//! - On shutdown: stop accepting, let pipelines drain, bounded by the grace period

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::Instrument;

use crate::config::ServerConfig;
use crate::error::{ConnectionError, ErrorClass, SecurityError};
use crate::http::dispatch::{Dispatcher, Handler};
use crate::http::pipeline::{serve_connection, PipelineSettings};
use crate::lifecycle::shutdown::recv_shutdown;
use crate::net::{
    Accepted, ConnectionTracker, Listener, ListenerError, PassThrough, SecurityTransform,
    TlsTransform,
};
use crate::observability::{metrics, tracing::connection_span};

/// Ingestion server: listener, security transform and handler wired together.
pub struct HttpServer {
    config: ServerConfig,
    dispatcher: Dispatcher,
    security: Arc<dyn SecurityTransform>,
    tracker: ConnectionTracker,
}

impl HttpServer {
    /// Create a server; TLS material is loaded here when configured.
    pub fn new(config: ServerConfig, handler: impl Handler) -> Result<Self, SecurityError> {
        let security: Arc<dyn SecurityTransform> = match &config.listener.tls {
            Some(tls) => Arc::new(TlsTransform::from_config(
                tls,
                Duration::from_secs(config.timeouts.handshake_secs),
            )?),
            None => Arc::new(PassThrough),
        };
        Ok(Self::with_security(config, handler, security))
    }

    /// Create a server with an explicit security transform.
    pub fn with_security(
        config: ServerConfig,
        handler: impl Handler,
        security: Arc<dyn SecurityTransform>,
    ) -> Self {
        let dispatcher =
            Dispatcher::new(handler).close_on_error(config.http.close_on_handler_error);
        Self {
            config,
            dispatcher,
            security,
            tracker: ConnectionTracker::new(),
        }
    }

    /// Bind the configured address.
    pub fn bind(&self) -> Result<Listener, ListenerError> {
        Listener::bind(&self.config.listener)
    }

    /// Handle to the open-connection count.
    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Accept until `shutdown` fires or the listener fails, then drain.
    pub async fn run(
        self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError> {
        let addr = listener.local_addr().map_err(ListenerError::Accept)?;
        tracing::info!(
            address = %addr,
            security = self.security.name(),
            "HTTP server starting"
        );

        let settings = PipelineSettings::from_config(&self.config);
        let result = loop {
            let accepted = tokio::select! {
                biased;
                _ = recv_shutdown(&mut shutdown) => {
                    tracing::info!("Shutdown requested, no longer accepting connections");
                    break Ok(());
                }
                accepted = listener.accept_next() => accepted,
            };

            match accepted {
                Ok(accepted) => self.spawn_connection(accepted, settings, shutdown.resubscribe()),
                Err(e) => {
                    tracing::error!(error = %e, "Listener failed");
                    break Err(e);
                }
            }
        };

        // Release the socket so new peers are refused while we drain.
        drop(listener);
        self.drain().await;

        tracing::info!("HTTP server stopped");
        result
    }

    fn spawn_connection(
        &self,
        accepted: Accepted,
        settings: PipelineSettings,
        shutdown: broadcast::Receiver<()>,
    ) {
        let Accepted {
            stream,
            peer_addr,
            permit,
        } = accepted;

        let guard = self.tracker.track();
        let span = connection_span(guard.id(), peer_addr, self.security.name());
        let security = Arc::clone(&self.security);
        let dispatcher = self.dispatcher.clone();

        tokio::spawn(
            async move {
                // Both released when the task ends, panics included.
                let _permit = permit;
                let _guard = guard;

                let result = serve_connection(
                    Box::new(stream),
                    peer_addr,
                    security,
                    dispatcher,
                    settings,
                    shutdown,
                )
                .await;

                if let Err(e) = result {
                    log_connection_error(&e);
                }
            }
            .instrument(span),
        );
    }

    async fn drain(&self) {
        let open = self.tracker.active_count();
        if open == 0 {
            return;
        }

        let grace = Duration::from_secs(self.config.timeouts.shutdown_grace_secs);
        tracing::info!(
            open_connections = open,
            grace_secs = grace.as_secs(),
            "Waiting for connections to drain"
        );

        match tokio::time::timeout(grace, self.tracker.wait_for_idle()).await {
            Ok(()) => tracing::info!("All connections drained"),
            Err(_) => tracing::warn!(
                open_connections = self.tracker.active_count(),
                "Grace period elapsed with connections still open"
            ),
        }
    }
}

fn log_connection_error(err: &ConnectionError) {
    metrics::record_connection_error(err.kind());

    match (err.class(), err) {
        (_, ConnectionError::IdleTimeout(_)) => {
            tracing::debug!("Connection closed after idle timeout")
        }
        (ErrorClass::ProtocolFatal, _) => {
            tracing::warn!(error = %err, kind = err.kind(), "Connection closed after protocol error")
        }
        (ErrorClass::ConnectionFatal, _) => {
            tracing::info!(error = %err, kind = err.kind(), "Connection failed")
        }
        (class, _) => {
            tracing::error!(error = %err, class = ?class, "Unexpected connection error")
        }
    }
}
