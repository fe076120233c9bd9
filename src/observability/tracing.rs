//! Span constructors shared by the accept loop and the pipeline.
//!
//! Every connection runs inside a `connection` span; every message inside a
//! `request` span nested under it, so log lines carry both identities.

use std::net::SocketAddr;

use tracing::Span;
use uuid::Uuid;

use crate::net::ConnectionId;

pub fn connection_span(id: ConnectionId, peer_addr: SocketAddr, transform: &'static str) -> Span {
    tracing::info_span!(
        "connection",
        connection_id = %id,
        peer_addr = %peer_addr,
        security = transform,
    )
}

pub fn request_span(request_id: Uuid, method: &str, target: &str) -> Span {
    tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        target = %target,
    )
}
