//! Response description and wire serialization.
//!
//! # Responsibilities
//! - Let handlers describe a response (status, headers, body, close directive)
//! - Map protocol failures to their best-effort error responses
//! - Serialize to `VERSION SP CODE SP REASON CRLF`, headers, blank line, body
//!
//! # Design Decisions
//! - `Content-Length` is always framed by us unless the handler set it
//! - `x-request-id` is echoed unless the handler set its own
//! - Handler-supplied names, values and reason phrases are written without
//!   CR, LF or NUL, so they can never start a new header line

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use uuid::Uuid;

use crate::error::ProtocolError;
use crate::http::framer::is_tchar;
use crate::http::request::{Headers, Version};

pub const X_REQUEST_ID: &str = "x-request-id";

/// Interim response sent before reading a body announced with `Expect: 100-continue`.
pub const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// What a handler wants written back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseSpec {
    status: u16,
    reason: Option<String>,
    headers: Headers,
    body: Bytes,
    close: bool,
}

impl ResponseSpec {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            reason: None,
            headers: Headers::new(),
            body: Bytes::new(),
            close: false,
        }
    }

    pub fn ok() -> Self {
        Self::new(200)
    }

    /// `text/plain` response.
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self::new(status)
            .with_header("Content-Type", "text/plain; charset=utf-8")
            .with_body(body.into())
    }

    /// `application/json` response.
    pub fn json<T: Serialize + ?Sized>(status: u16, value: &T) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_vec(value)?;
        Ok(Self::new(status)
            .with_header("Content-Type", "application/json")
            .with_body(body))
    }

    /// Generic server error returned when the handler fails.
    pub fn server_error() -> Self {
        Self::text(500, "internal server error")
    }

    /// Best-effort response for a request that could not be framed.
    pub fn from_protocol_error(err: &ProtocolError) -> Self {
        Self::text(err.status(), err.to_string()).close()
    }

    /// Sent when a partially received request stalls.
    pub fn request_timeout() -> Self {
        Self::text(408, "request timeout").close()
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Close the connection once this response is written.
    pub fn close(mut self) -> Self {
        self.close = true;
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Whether the response itself ends the connection.
    pub fn wants_close(&self) -> bool {
        self.close || self.headers.has_token("connection", "close")
    }

    /// Encode for the wire.
    ///
    /// `include_body` is false for `HEAD`; the length header still describes
    /// the body that would have been sent.
    pub fn serialize(
        &self,
        version: Version,
        request_id: Option<Uuid>,
        include_body: bool,
        closing: bool,
    ) -> BytesMut {
        let reason = self
            .reason
            .as_deref()
            .unwrap_or_else(|| canonical_reason(self.status));

        let mut out = BytesMut::with_capacity(128 + self.body.len());
        out.put_slice(version.as_str().as_bytes());
        out.put_slice(format!(" {} ", self.status).as_bytes());
        put_field_text(&mut out, reason);
        out.put_slice(b"\r\n");

        for (name, value) in self.headers.iter() {
            put_header(&mut out, name, value);
        }
        if !self.headers.contains("content-length") && allows_body(self.status) {
            put_header(&mut out, "Content-Length", &self.body.len().to_string());
        }
        if closing {
            if !self.headers.has_token("connection", "close") {
                put_header(&mut out, "Connection", "close");
            }
        } else if version == Version::Http10 {
            put_header(&mut out, "Connection", "keep-alive");
        }
        if let Some(id) = request_id {
            if !self.headers.contains(X_REQUEST_ID) {
                put_header(&mut out, X_REQUEST_ID, &id.to_string());
            }
        }
        out.put_slice(b"\r\n");

        if include_body && allows_body(self.status) {
            out.put_slice(&self.body);
        }
        out
    }
}

fn put_header(out: &mut BytesMut, name: &str, value: &str) {
    out.extend(name.bytes().filter(|&b| is_tchar(b)));
    out.put_slice(b": ");
    put_field_text(out, value);
    out.put_slice(b"\r\n");
}

/// Copy `text`, replacing bytes that would end the line with a space.
fn put_field_text(out: &mut BytesMut, text: &str) {
    out.extend(
        text.bytes()
            .map(|b| if matches!(b, b'\r' | b'\n' | 0) { b' ' } else { b }),
    );
}

fn allows_body(status: u16) -> bool {
    !(100..200).contains(&status) && status != 204 && status != 304
}

/// Standard reason phrase for `status`.
pub fn canonical_reason(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        409 => "Conflict",
        411 => "Length Required",
        413 => "Content Too Large",
        415 => "Unsupported Media Type",
        422 => "Unprocessable Content",
        429 => "Too Many Requests",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(bytes: &BytesMut) -> &str {
        std::str::from_utf8(bytes).unwrap()
    }

    #[test]
    fn serializes_status_headers_and_body() {
        let response = ResponseSpec::text(200, "hi");
        let wire = response.serialize(Version::Http11, None, true, false);
        assert_eq!(
            text(&wire),
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: 2\r\n\r\nhi"
        );
    }

    #[test]
    fn head_keeps_length_but_drops_body() {
        let response = ResponseSpec::ok().with_body("abcd");
        let wire = response.serialize(Version::Http11, None, false, false);
        let wire = text(&wire);
        assert!(wire.contains("Content-Length: 4\r\n"));
        assert!(wire.ends_with("\r\n\r\n"));
    }

    #[test]
    fn handler_text_cannot_split_the_response() {
        let response = ResponseSpec::text(200, "ok")
            .with_reason("OK\r\nX-Injected: 1")
            .with_header("X-Echo", "a\r\nSet-Cookie: evil=1")
            .with_header("Bad\r\nName", "v");
        let wire = response.serialize(Version::Http11, None, true, false);
        let wire = text(&wire);

        assert!(wire.starts_with("HTTP/1.1 200 OK  X-Injected: 1\r\n"));
        assert!(wire.contains("X-Echo: a  Set-Cookie: evil=1\r\n"));
        assert!(wire.contains("BadName: v\r\n"));
        assert!(!wire.contains("\r\nSet-Cookie"));
        assert_eq!(wire.matches("\r\n\r\n").count(), 1);
    }

    #[test]
    fn closing_adds_connection_close_once() {
        let wire = ResponseSpec::ok().serialize(Version::Http11, None, true, true);
        assert_eq!(text(&wire).matches("Connection: close").count(), 1);

        let explicit = ResponseSpec::ok().with_header("Connection", "close");
        assert!(explicit.wants_close());
        let wire = explicit.serialize(Version::Http11, None, true, true);
        assert_eq!(text(&wire).matches("onnection: close").count(), 1);
    }

    #[test]
    fn http10_keep_alive_is_explicit() {
        let wire = ResponseSpec::ok().serialize(Version::Http10, None, true, false);
        assert!(text(&wire).starts_with("HTTP/1.0 200 OK\r\n"));
        assert!(text(&wire).contains("Connection: keep-alive\r\n"));
    }

    #[test]
    fn request_id_echoed_unless_set() {
        let id = Uuid::new_v4();
        let wire = ResponseSpec::ok().serialize(Version::Http11, Some(id), true, false);
        assert!(text(&wire).contains(&format!("x-request-id: {id}\r\n")));

        let own = ResponseSpec::ok().with_header("X-Request-Id", "mine");
        let wire = own.serialize(Version::Http11, Some(id), true, false);
        assert!(!text(&wire).contains(&id.to_string()));
    }

    #[test]
    fn protocol_errors_map_to_closing_responses() {
        let response = ResponseSpec::from_protocol_error(&ProtocolError::RequestTooLarge {
            limit: 10,
        });
        assert_eq!(response.status(), 413);
        assert!(response.wants_close());

        let response =
            ResponseSpec::from_protocol_error(&ProtocolError::MalformedHeader("x".into()));
        assert_eq!(response.status(), 400);
        assert_eq!(ResponseSpec::request_timeout().status(), 408);
    }

    #[test]
    fn no_content_has_no_length() {
        let wire = ResponseSpec::new(204).serialize(Version::Http11, None, true, false);
        assert_eq!(text(&wire), "HTTP/1.1 204 No Content\r\n\r\n");
    }

    #[test]
    fn json_body() {
        let response = ResponseSpec::json(201, &serde_json::json!({"ok": true})).unwrap();
        assert_eq!(response.body().as_ref(), br#"{"ok":true}"#);
        assert_eq!(response.headers().get("content-type"), Some("application/json"));
    }
}
