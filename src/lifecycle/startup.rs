//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize metrics, then the security transform, then the listener
//! - Wire OS signals to the shutdown coordinator
//! - Run the accept loop until shutdown completes
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - The listener binds last, so traffic only arrives once everything is ready

use std::net::{AddrParseError, SocketAddr};

use metrics_exporter_prometheus::BuildError;
use thiserror::Error;

use crate::config::ServerConfig;
use crate::error::SecurityError;
use crate::http::{Handler, HttpServer};
use crate::lifecycle::{signals, Shutdown};
use crate::net::ListenerError;
use crate::observability::metrics;

/// Error type for server startup and run.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid metrics address: {0}")]
    MetricsAddress(#[from] AddrParseError),

    #[error("failed to start metrics exporter: {0}")]
    Metrics(#[from] BuildError),

    #[error(transparent)]
    Security(#[from] SecurityError),

    #[error(transparent)]
    Listener(#[from] ListenerError),
}

/// Run the server until SIGINT/SIGTERM and a graceful drain.
pub async fn run(config: ServerConfig, handler: impl Handler) -> Result<(), StartupError> {
    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let server = HttpServer::new(config, handler)?;
    let listener = server.bind()?;

    let shutdown = Shutdown::new();
    let shutdown_rx = shutdown.subscribe();
    let signal_task = tokio::spawn(async move {
        match signals::wait_for_termination().await {
            Ok(()) => shutdown.trigger(),
            Err(e) => tracing::error!(error = %e, "Failed to install signal handlers"),
        }
    });

    let result = server.run(listener, shutdown_rx).await;
    signal_task.abort();
    result?;
    Ok(())
}
