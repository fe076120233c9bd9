//! Resilience subsystem.
//!
//! # Components
//! - timeouts.rs: idle deadline applied to every connection read

pub mod timeouts;

pub use timeouts::IdleDeadline;
