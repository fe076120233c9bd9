//! OS signal handling.
//!
//! SIGINT (ctrl-c) and, on unix, SIGTERM both mean "shut down gracefully".

use std::io;

/// Wait for the first termination signal.
pub async fn wait_for_termination() -> io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res?,
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutdown signal received");
    Ok(())
}
