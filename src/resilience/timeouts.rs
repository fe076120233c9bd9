//! Timeout enforcement.
//!
//! # Responsibilities
//! - Enforce the per-connection idle timeout on every read
//! - Cancel the suspended read cleanly when the deadline passes
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - The deadline is absolute and only moves when bytes arrive, so a peer
//!   that never sends cannot keep the connection alive

use std::future::Future;
use std::time::Duration;
use tokio::time::{error::Elapsed, Instant};

/// Absolute deadline for the next byte on a connection.
#[derive(Debug, Clone, Copy)]
pub struct IdleDeadline {
    idle: Duration,
    deadline: Instant,
}

impl IdleDeadline {
    /// Start a deadline `idle` from now.
    pub fn new(idle: Duration) -> Self {
        Self {
            idle,
            deadline: Instant::now() + idle,
        }
    }

    /// Push the deadline `idle` into the future; call when bytes arrive.
    pub fn reset(&mut self) {
        self.deadline = Instant::now() + self.idle;
    }

    pub fn idle(&self) -> Duration {
        self.idle
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Run `fut` until it completes or the deadline passes.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Elapsed> {
        tokio::time::timeout_at(self.deadline, fut).await
    }
}
