//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! plaintext stream (from net)
//!     → framer.rs   (start line, headers, body policy, chunked reassembly)
//!     → request.rs  (framed Message)
//!     → decoder.rs  (typed body by content type, request id)
//!     → dispatch.rs (external handler, panic/error → 500)
//!     → response.rs (status line, headers, body)
//!     → pipeline.rs (keep-alive loop, timeouts, shutdown)
//!     → server.rs   (accept loop, one pipeline task per connection)
//! ```

pub mod decoder;
pub mod dispatch;
pub mod framer;
pub mod pipeline;
pub mod request;
pub mod response;
pub mod server;

pub use decoder::{decode, decode_as, Body, DecodedRequest};
pub use dispatch::{Dispatcher, Handler, HandlerError};
pub use framer::{FramePhase, Framer, FramerLimits};
pub use pipeline::{serve_connection, PipelineSettings};
pub use request::{BodyPolicy, Headers, Message, Version};
pub use response::{ResponseSpec, X_REQUEST_ID};
pub use server::HttpServer;
