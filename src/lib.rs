//! HTTP/1.x connection-to-request ingestion.
//!
//! Turns raw inbound TCP or TLS bytes into fully decoded requests, hands
//! each to an application [`Handler`], and writes the response back on the
//! same connection.
//!
//! ```text
//! Listener → Transport Reader → Security Transform → Framer → Decoder → Dispatcher
//! ```

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod resilience;

pub use config::schema::ServerConfig;
pub use error::{ConnectionError, ErrorClass};
pub use http::{DecodedRequest, Handler, HandlerError, HttpServer, ResponseSpec};
pub use lifecycle::Shutdown;
