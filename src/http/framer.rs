//! Incremental request framer.
//!
//! Turns an append-only plaintext byte stream into complete [`Message`]s,
//! one at a time, however the stream was fragmented on the way in.
//!
//! # State machine
//! ```text
//! AwaitingStartLine ──line──▶ AwaitingHeaders ──blank line──▶ AwaitingBody ──▶ Complete
//!        ▲                          │ (no body)                                   │
//!        │                          └────────────────────────────────────────────▶│
//!        └───────────────────── emit message, keep remainder ◀────────────────────┘
//! ```
//!
//! # Design Decisions
//! - One `BytesMut` accumulates everything not yet framed; bytes belonging
//!   to a pipelined follow-up message stay in it untouched
//! - A scan cursor remembers how far the buffer was searched for CRLF, so
//!   each byte is scanned once no matter how the input is split
//! - Everything held for the current message counts against
//!   `max_buffered_bytes`; declared lengths are checked before any body
//!   bytes are read

use bytes::{Buf, Bytes, BytesMut};

use crate::config::HttpConfig;
use crate::error::ProtocolError;
use crate::http::request::{BodyPolicy, Headers, Message, Version};

const CRLF: &[u8] = b"\r\n";

/// Resource bounds applied while framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramerLimits {
    /// Maximum bytes held for one message before it completes.
    pub max_buffered_bytes: usize,
    /// Maximum header plus trailer fields per message.
    pub max_headers: usize,
}

impl Default for FramerLimits {
    fn default() -> Self {
        Self {
            max_buffered_bytes: 1024 * 1024,
            max_headers: 100,
        }
    }
}

impl From<&HttpConfig> for FramerLimits {
    fn from(config: &HttpConfig) -> Self {
        Self {
            max_buffered_bytes: config.max_buffered_bytes,
            max_headers: config.max_headers,
        }
    }
}

/// Coarse framing phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    AwaitingStartLine,
    AwaitingHeaders,
    AwaitingBody,
    Complete,
}

/// Position inside a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyState {
    Fixed { remaining: usize },
    ChunkSize,
    ChunkData { remaining: usize },
    ChunkDataEnd,
    Trailers,
    UntilClose,
}

/// Message under construction.
#[derive(Debug)]
struct Pending {
    method: String,
    target: String,
    version: Version,
    headers: Headers,
    trailers: Headers,
    policy: BodyPolicy,
    body: BytesMut,
}

impl Pending {
    fn field_count(&self) -> usize {
        self.headers.len() + self.trailers.len()
    }
}

#[derive(Debug)]
enum State {
    AwaitingStartLine,
    AwaitingHeaders(Pending),
    AwaitingBody(Pending, BodyState),
    Complete(Pending),
}

/// Per-connection framer. Owned by exactly one pipeline.
#[derive(Debug)]
pub struct Framer {
    buf: BytesMut,
    /// Bytes at the front of `buf` already searched for CRLF.
    scanned: usize,
    state: State,
    /// Bytes of the current message already moved out of `buf`.
    consumed: usize,
    continue_expected: bool,
    limits: FramerLimits,
}

impl Framer {
    pub fn new(limits: FramerLimits) -> Self {
        Self {
            buf: BytesMut::with_capacity(8 * 1024),
            scanned: 0,
            state: State::AwaitingStartLine,
            consumed: 0,
            continue_expected: false,
            limits,
        }
    }

    /// Append newly read plaintext.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn phase(&self) -> FramePhase {
        match self.state {
            State::AwaitingStartLine => FramePhase::AwaitingStartLine,
            State::AwaitingHeaders(_) => FramePhase::AwaitingHeaders,
            State::AwaitingBody(..) => FramePhase::AwaitingBody,
            State::Complete(_) => FramePhase::Complete,
        }
    }

    /// Bytes received but not yet framed.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// True when no byte of a next message has arrived yet.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::AwaitingStartLine)
            && self.buf.iter().all(|&b| b == b'\r' || b == b'\n')
    }

    /// Returns `true` once after the headers of a message carrying
    /// `Expect: 100-continue` complete.
    pub fn take_continue(&mut self) -> bool {
        std::mem::take(&mut self.continue_expected)
    }

    /// Frame as far as the buffered bytes allow.
    ///
    /// `Ok(None)` means more bytes are needed. Any error is fatal for the
    /// connection; the framer must not be used afterwards.
    pub fn next_message(&mut self) -> Result<Option<Message>, ProtocolError> {
        loop {
            let next = match std::mem::replace(&mut self.state, State::AwaitingStartLine) {
                State::AwaitingStartLine => match self.take_line() {
                    None => return self.need_more(),
                    // Stray CRLF between messages.
                    Some(line) if line.is_empty() => State::AwaitingStartLine,
                    Some(line) => {
                        let (method, target, version) = parse_start_line(&line)?;
                        State::AwaitingHeaders(Pending {
                            method,
                            target,
                            version,
                            headers: Headers::new(),
                            trailers: Headers::new(),
                            policy: BodyPolicy::Fixed(0),
                            body: BytesMut::new(),
                        })
                    }
                },
                State::AwaitingHeaders(mut pending) => match self.take_line() {
                    None => {
                        self.state = State::AwaitingHeaders(pending);
                        return self.need_more();
                    }
                    Some(line) if line.is_empty() => self.begin_body(pending)?,
                    Some(line) => {
                        self.check_field_count(&pending)?;
                        let (name, value) = parse_field_line(&line)?;
                        pending.headers.append(name, value);
                        State::AwaitingHeaders(pending)
                    }
                },
                State::AwaitingBody(mut pending, body) => {
                    match self.advance_body(&mut pending, body)? {
                        Some(body) => {
                            self.state = State::AwaitingBody(pending, body);
                            return self.need_more();
                        }
                        None => State::Complete(pending),
                    }
                }
                State::Complete(pending) => return Ok(Some(self.emit(pending))),
            };
            self.check_consumed()?;
            self.state = next;
        }
    }

    /// Frame what remains after the peer closed its write side.
    ///
    /// Completes an until-close body; a message cut short by the end of
    /// the stream is an error. Call repeatedly until `Ok(None)`.
    pub fn finish(&mut self) -> Result<Option<Message>, ProtocolError> {
        if let Some(message) = self.next_message()? {
            return Ok(Some(message));
        }

        match std::mem::replace(&mut self.state, State::AwaitingStartLine) {
            State::AwaitingStartLine => {
                if self.is_idle() {
                    self.buf.clear();
                    Ok(None)
                } else {
                    Err(ProtocolError::MalformedStartLine(
                        "stream ended inside the start line".to_string(),
                    ))
                }
            }
            State::AwaitingHeaders(_) => Err(ProtocolError::MalformedHeader(
                "stream ended inside the header section".to_string(),
            )),
            State::AwaitingBody(pending, BodyState::UntilClose) => Ok(Some(self.emit(pending))),
            State::AwaitingBody(pending, BodyState::Fixed { remaining }) => {
                let expected = match pending.policy {
                    BodyPolicy::Fixed(n) => n,
                    _ => remaining,
                };
                Err(ProtocolError::BodyLengthMismatch {
                    expected,
                    received: self.buf.len(),
                })
            }
            State::AwaitingBody(..) => Err(ProtocolError::ChunkFormatError(
                "stream ended inside a chunked body".to_string(),
            )),
            State::Complete(pending) => Ok(Some(self.emit(pending))),
        }
    }

    fn begin_body(&mut self, mut pending: Pending) -> Result<State, ProtocolError> {
        let policy = body_policy(&pending.headers)?;
        pending.policy = policy;

        let body = match policy {
            BodyPolicy::Fixed(0) => return Ok(State::Complete(pending)),
            BodyPolicy::Fixed(n) => {
                self.check_room(n)?;
                BodyState::Fixed { remaining: n }
            }
            BodyPolicy::Chunked => BodyState::ChunkSize,
            BodyPolicy::UntilClose => BodyState::UntilClose,
        };

        self.continue_expected = pending.version == Version::Http11
            && pending.headers.has_token("expect", "100-continue");

        Ok(State::AwaitingBody(pending, body))
    }

    /// Returns the state to resume in when more bytes are needed, or `None`
    /// once the body is complete.
    fn advance_body(
        &mut self,
        pending: &mut Pending,
        mut body: BodyState,
    ) -> Result<Option<BodyState>, ProtocolError> {
        loop {
            self.check_consumed()?;
            body = match body {
                BodyState::Fixed { remaining } => {
                    if self.buf.len() < remaining {
                        return Ok(Some(body));
                    }
                    pending.body = self.buf.split_to(remaining);
                    self.consumed += remaining;
                    return Ok(None);
                }
                BodyState::ChunkSize => {
                    let Some(line) = self.take_line() else {
                        return Ok(Some(body));
                    };
                    match parse_chunk_size(&line)? {
                        0 => BodyState::Trailers,
                        size => {
                            self.check_room(size)?;
                            BodyState::ChunkData { remaining: size }
                        }
                    }
                }
                BodyState::ChunkData { remaining } => {
                    if self.buf.is_empty() {
                        return Ok(Some(body));
                    }
                    let take = remaining.min(self.buf.len());
                    pending.body.extend_from_slice(&self.buf[..take]);
                    self.discard(take);
                    if take == remaining {
                        BodyState::ChunkDataEnd
                    } else {
                        BodyState::ChunkData {
                            remaining: remaining - take,
                        }
                    }
                }
                BodyState::ChunkDataEnd => {
                    if self.buf.len() < CRLF.len() {
                        return Ok(Some(body));
                    }
                    if &self.buf[..CRLF.len()] != CRLF {
                        return Err(ProtocolError::ChunkFormatError(
                            "chunk data not followed by CRLF".to_string(),
                        ));
                    }
                    self.discard(CRLF.len());
                    BodyState::ChunkSize
                }
                BodyState::Trailers => {
                    let Some(line) = self.take_line() else {
                        return Ok(Some(body));
                    };
                    if line.is_empty() {
                        return Ok(None);
                    }
                    self.check_field_count(pending)?;
                    let (name, value) = parse_field_line(&line)?;
                    pending.trailers.append(name, value);
                    BodyState::Trailers
                }
                BodyState::UntilClose => {
                    let n = self.buf.len();
                    pending.body.extend_from_slice(&self.buf);
                    self.discard(n);
                    return Ok(Some(body));
                }
            };
        }
    }

    fn emit(&mut self, pending: Pending) -> Message {
        self.consumed = 0;
        self.scanned = 0;
        self.continue_expected = false;
        Message::from_parts(
            pending.method,
            pending.target,
            pending.version,
            pending.headers,
            pending.trailers,
            pending.policy,
            pending.body.freeze(),
        )
    }

    /// Split off the next CRLF-terminated line, without the terminator.
    fn take_line(&mut self) -> Option<Bytes> {
        // A CR at the very end of the scanned region may pair with a new LF.
        let start = self.scanned.saturating_sub(1);
        match find_crlf(&self.buf[start..]) {
            Some(offset) => {
                let end = start + offset;
                let mut line = self.buf.split_to(end + CRLF.len());
                line.truncate(end);
                self.consumed += end + CRLF.len();
                self.scanned = 0;
                Some(line.freeze())
            }
            None => {
                self.scanned = self.buf.len();
                None
            }
        }
    }

    fn discard(&mut self, n: usize) {
        self.buf.advance(n);
        self.consumed += n;
        self.scanned = 0;
    }

    fn need_more(&self) -> Result<Option<Message>, ProtocolError> {
        if self.consumed + self.buf.len() > self.limits.max_buffered_bytes {
            return Err(ProtocolError::RequestTooLarge {
                limit: self.limits.max_buffered_bytes,
            });
        }
        Ok(None)
    }

    /// The current message's framed bytes must stay under the cap.
    fn check_consumed(&self) -> Result<(), ProtocolError> {
        self.check_room(0)
    }

    fn check_room(&self, declared: usize) -> Result<(), ProtocolError> {
        if self.consumed.saturating_add(declared) > self.limits.max_buffered_bytes {
            return Err(ProtocolError::RequestTooLarge {
                limit: self.limits.max_buffered_bytes,
            });
        }
        Ok(())
    }

    fn check_field_count(&self, pending: &Pending) -> Result<(), ProtocolError> {
        if pending.field_count() >= self.limits.max_headers {
            return Err(ProtocolError::TooManyHeaders {
                limit: self.limits.max_headers,
            });
        }
        Ok(())
    }
}

impl Default for Framer {
    fn default() -> Self {
        Self::new(FramerLimits::default())
    }
}

fn find_crlf(haystack: &[u8]) -> Option<usize> {
    haystack.windows(CRLF.len()).position(|w| w == CRLF)
}

pub(crate) fn is_tchar(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

fn trim_ows(bytes: &[u8]) -> &[u8] {
    let is_ows = |b: &u8| *b == b' ' || *b == b'\t';
    let start = bytes.iter().position(|b| !is_ows(b)).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !is_ows(b)).map_or(start, |i| i + 1);
    &bytes[start..end]
}

fn preview(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).chars().take(64).collect()
}

fn parse_start_line(line: &[u8]) -> Result<(String, String, Version), ProtocolError> {
    let text = std::str::from_utf8(line).map_err(|_| {
        ProtocolError::MalformedStartLine("start line is not valid UTF-8".to_string())
    })?;

    let mut parts = text.split(' ');
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ProtocolError::MalformedStartLine(format!(
            "expected METHOD SP TARGET SP VERSION, got {:?}",
            preview(line)
        )));
    };

    if method.is_empty() || !method.bytes().all(is_tchar) {
        return Err(ProtocolError::MalformedStartLine(format!(
            "invalid method {:?}",
            preview(method.as_bytes())
        )));
    }
    if target.is_empty() || target.bytes().any(|b| b.is_ascii_control()) {
        return Err(ProtocolError::MalformedStartLine(format!(
            "invalid target {:?}",
            preview(target.as_bytes())
        )));
    }
    let version = Version::parse(version).ok_or_else(|| {
        ProtocolError::MalformedStartLine(format!(
            "unsupported version {:?}",
            preview(version.as_bytes())
        ))
    })?;

    Ok((method.to_string(), target.to_string(), version))
}

fn parse_field_line(line: &[u8]) -> Result<(String, String), ProtocolError> {
    if matches!(line.first(), Some(b' ' | b'\t')) {
        return Err(ProtocolError::MalformedHeader(
            "obsolete line folding is not supported".to_string(),
        ));
    }

    let colon = line.iter().position(|&b| b == b':').ok_or_else(|| {
        ProtocolError::MalformedHeader(format!("missing ':' in {:?}", preview(line)))
    })?;

    let name = &line[..colon];
    if name.is_empty() || !name.iter().all(|&b| is_tchar(b)) {
        return Err(ProtocolError::MalformedHeader(format!(
            "invalid field name {:?}",
            preview(name)
        )));
    }

    let value = trim_ows(&line[colon + 1..]);
    let value = std::str::from_utf8(value).map_err(|_| {
        ProtocolError::MalformedHeader(format!("non UTF-8 value for {:?}", preview(name)))
    })?;
    if value.bytes().any(|b| b == b'\r' || b == b'\n' || b == 0) {
        return Err(ProtocolError::MalformedHeader(format!(
            "control character in value of {:?}",
            preview(name)
        )));
    }

    Ok((String::from_utf8_lossy(name).into_owned(), value.to_string()))
}

/// Decide how the body ends from the header section.
fn body_policy(headers: &Headers) -> Result<BodyPolicy, ProtocolError> {
    let codings: Vec<String> = headers
        .get_all("transfer-encoding")
        .flat_map(|value| value.split(','))
        .map(|coding| coding.trim().to_ascii_lowercase())
        .filter(|coding| !coding.is_empty())
        .collect();
    if let Some(last) = codings.last() {
        return Ok(if last == "chunked" {
            BodyPolicy::Chunked
        } else {
            BodyPolicy::UntilClose
        });
    }

    let mut length: Option<usize> = None;
    for value in headers.get_all("content-length") {
        for item in value.split(',') {
            let item = item.trim();
            if item.is_empty() || !item.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ProtocolError::MalformedHeader(format!(
                    "invalid Content-Length {:?}",
                    value
                )));
            }
            let n: usize = item.parse().map_err(|_| {
                ProtocolError::MalformedHeader(format!("Content-Length {:?} out of range", item))
            })?;
            match length {
                Some(previous) if previous != n => {
                    return Err(ProtocolError::MalformedHeader(
                        "conflicting Content-Length values".to_string(),
                    ))
                }
                _ => length = Some(n),
            }
        }
    }

    Ok(BodyPolicy::Fixed(length.unwrap_or(0)))
}

fn parse_chunk_size(line: &[u8]) -> Result<usize, ProtocolError> {
    let size = match line.iter().position(|&b| b == b';') {
        Some(i) => &line[..i],
        None => line,
    };
    let size = trim_ows(size);
    if size.is_empty() || !size.iter().all(u8::is_ascii_hexdigit) {
        return Err(ProtocolError::ChunkFormatError(format!(
            "invalid chunk size {:?}",
            preview(line)
        )));
    }

    let text = String::from_utf8_lossy(size);
    usize::from_str_radix(&text, 16).map_err(|_| {
        ProtocolError::ChunkFormatError(format!("chunk size {:?} overflows", preview(size)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framer() -> Framer {
        Framer::default()
    }

    fn frame_all(input: &[u8]) -> Result<Vec<Message>, ProtocolError> {
        let mut framer = framer();
        framer.push(input);
        let mut out = Vec::new();
        while let Some(message) = framer.next_message()? {
            out.push(message);
        }
        Ok(out)
    }

    #[test]
    fn frames_simple_get() {
        let messages = frame_all(b"GET /x HTTP/1.1\r\nHost: a\r\n\r\n").unwrap();
        assert_eq!(messages.len(), 1);

        let message = &messages[0];
        assert_eq!(message.method(), "GET");
        assert_eq!(message.target(), "/x");
        assert_eq!(message.version(), Version::Http11);
        assert_eq!(message.headers().get("host"), Some("a"));
        assert_eq!(message.headers().len(), 1);
        assert!(message.body().is_empty());
    }

    #[test]
    fn reassembles_chunked_body() {
        let input = b"POST /u HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n0\r\n\r\n";
        let messages = frame_all(input).unwrap();
        assert_eq!(messages[0].body().as_ref(), b"abc");
        assert_eq!(messages[0].policy(), BodyPolicy::Chunked);
    }

    #[test]
    fn chunk_extensions_and_trailers() {
        let input = b"POST /u HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n\
            4;name=value\r\nWiki\r\n5\r\npedia\r\n0\r\nX-Checksum: 42\r\n\r\n";
        let messages = frame_all(input).unwrap();
        assert_eq!(messages[0].body().as_ref(), b"Wikipedia");
        assert_eq!(messages[0].trailers().get("x-checksum"), Some("42"));
    }

    #[test]
    fn pipelined_messages_keep_remainder() {
        let mut framer = framer();
        framer.push(b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n");

        let first = framer.next_message().unwrap().unwrap();
        assert_eq!(first.target(), "/a");
        assert_eq!(framer.buffered_len(), b"GET /b HTTP/1.1\r\n\r\n".len());

        let second = framer.next_message().unwrap().unwrap();
        assert_eq!(second.target(), "/b");
        assert!(framer.next_message().unwrap().is_none());
        assert!(framer.is_idle());
    }

    #[test]
    fn zero_length_body_completes_immediately() {
        let mut framer = framer();
        framer.push(b"POST /a HTTP/1.1\r\nContent-Length: 0\r\n\r\n");
        let message = framer.next_message().unwrap().unwrap();
        assert!(message.body().is_empty());
        assert_eq!(message.policy(), BodyPolicy::Fixed(0));
        assert_eq!(framer.phase(), FramePhase::AwaitingStartLine);
    }

    #[test]
    fn fixed_body_waits_for_every_byte() {
        let mut framer = framer();
        framer.push(b"POST /a HTTP/1.1\r\nContent-Length: 5\r\n\r\nhel");
        assert!(framer.next_message().unwrap().is_none());
        assert_eq!(framer.phase(), FramePhase::AwaitingBody);
        assert!(!framer.is_idle());

        framer.push(b"loGET");
        let message = framer.next_message().unwrap().unwrap();
        assert_eq!(message.body().as_ref(), b"hello");
        assert_eq!(framer.buffered_len(), 3);
    }

    #[test]
    fn byte_at_a_time_matches_single_push() {
        let input = b"PUT /r?x=1 HTTP/1.1\r\nHost: h\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nhi\r\n0\r\n\r\n";
        let whole = frame_all(input).unwrap();

        let mut framer = framer();
        let mut pieces = Vec::new();
        for byte in input.iter() {
            framer.push(std::slice::from_ref(byte));
            while let Some(message) = framer.next_message().unwrap() {
                pieces.push(message);
            }
        }
        assert_eq!(pieces, whole);
    }

    #[test]
    fn crlf_split_across_pushes() {
        let mut framer = framer();
        framer.push(b"GET / HTTP/1.1\r");
        assert!(framer.next_message().unwrap().is_none());
        framer.push(b"\n\r");
        assert!(framer.next_message().unwrap().is_none());
        framer.push(b"\n");
        assert!(framer.next_message().unwrap().is_some());
    }

    #[test]
    fn skips_blank_lines_between_messages() {
        let messages = frame_all(b"\r\n\r\nGET / HTTP/1.0\r\n\r\n").unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].version(), Version::Http10);
    }

    #[test]
    fn duplicate_headers_preserved_in_order() {
        let messages =
            frame_all(b"GET / HTTP/1.1\r\nAccept: a\r\naccept: b\r\nHost:   spaced  \r\n\r\n")
                .unwrap();
        let headers = messages[0].headers();
        assert_eq!(headers.get_all("ACCEPT").collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(headers.get("host"), Some("spaced"));
    }

    #[test]
    fn rejects_malformed_start_lines() {
        for input in [
            &b"GET /x\r\n\r\n"[..],
            b"GET  /x HTTP/1.1\r\n\r\n",
            b"GET /x HTTP/2.0\r\n\r\n",
            b"G(T /x HTTP/1.1\r\n\r\n",
            b"GET /x HTTP/1.1 extra\r\n\r\n",
        ] {
            assert!(
                matches!(frame_all(input), Err(ProtocolError::MalformedStartLine(_))),
                "accepted {:?}",
                String::from_utf8_lossy(input)
            );
        }
    }

    #[test]
    fn rejects_malformed_headers() {
        for input in [
            &b"GET / HTTP/1.1\r\nNoColon\r\n\r\n"[..],
            b"GET / HTTP/1.1\r\nBad Name: x\r\n\r\n",
            b"GET / HTTP/1.1\r\n: empty\r\n\r\n",
            b"GET / HTTP/1.1\r\nA: b\r\n folded\r\n\r\n",
            b"POST / HTTP/1.1\r\nContent-Length: 4x\r\n\r\n",
            b"POST / HTTP/1.1\r\nContent-Length: 1\r\nContent-Length: 2\r\n\r\n",
        ] {
            assert!(
                matches!(frame_all(input), Err(ProtocolError::MalformedHeader(_))),
                "accepted {:?}",
                String::from_utf8_lossy(input)
            );
        }
    }

    #[test]
    fn identical_content_lengths_are_accepted() {
        let messages =
            frame_all(b"POST / HTTP/1.1\r\nContent-Length: 2\r\nContent-Length: 2\r\n\r\nok")
                .unwrap();
        assert_eq!(messages[0].body().as_ref(), b"ok");
    }

    #[test]
    fn chunked_wins_over_content_length() {
        let messages = frame_all(
            b"POST / HTTP/1.1\r\nContent-Length: 99\r\nTransfer-Encoding: chunked\r\n\r\n1\r\nz\r\n0\r\n\r\n",
        )
        .unwrap();
        assert_eq!(messages[0].body().as_ref(), b"z");
    }

    #[test]
    fn rejects_bad_chunks() {
        let bad_size = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\n";
        assert!(matches!(frame_all(bad_size), Err(ProtocolError::ChunkFormatError(_))));

        let missing_crlf = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabcX\r\n";
        assert!(matches!(
            frame_all(missing_crlf),
            Err(ProtocolError::ChunkFormatError(_))
        ));

        let overflow =
            b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\nffffffffffffffffffff\r\n";
        assert!(matches!(frame_all(overflow), Err(ProtocolError::ChunkFormatError(_))));
    }

    #[test]
    fn oversized_start_line_fails_promptly() {
        let mut framer = Framer::new(FramerLimits {
            max_buffered_bytes: 32,
            max_headers: 10,
        });
        framer.push(&[b'A'; 20]);
        assert!(framer.next_message().unwrap().is_none());
        framer.push(&[b'A'; 20]);
        assert_eq!(
            framer.next_message(),
            Err(ProtocolError::RequestTooLarge { limit: 32 })
        );
    }

    #[test]
    fn declared_length_over_limit_fails_before_body() {
        let mut framer = Framer::new(FramerLimits {
            max_buffered_bytes: 64,
            max_headers: 10,
        });
        framer.push(b"POST / HTTP/1.1\r\nContent-Length: 1000\r\n\r\n");
        assert_eq!(
            framer.next_message(),
            Err(ProtocolError::RequestTooLarge { limit: 64 })
        );
    }

    #[test]
    fn chunked_body_over_limit_fails() {
        let mut framer = Framer::new(FramerLimits {
            max_buffered_bytes: 80,
            max_headers: 10,
        });
        framer.push(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n");
        framer.push(b"10\r\n0123456789abcdef\r\n");
        assert!(framer.next_message().unwrap().is_none());
        framer.push(b"20\r\n");
        assert_eq!(
            framer.next_message(),
            Err(ProtocolError::RequestTooLarge { limit: 80 })
        );
    }

    #[test]
    fn oversized_header_section_fails_however_it_arrives() {
        let limits = FramerLimits {
            max_buffered_bytes: 64,
            max_headers: 32,
        };
        let mut request = b"GET /padded HTTP/1.1\r\n".to_vec();
        for i in 0..8 {
            request.extend_from_slice(format!("X-Pad-{i}: {}\r\n", "p".repeat(24)).as_bytes());
        }
        request.extend_from_slice(b"\r\n");

        let mut whole = Framer::new(limits);
        whole.push(&request);
        assert_eq!(
            whole.next_message(),
            Err(ProtocolError::RequestTooLarge { limit: 64 })
        );

        let mut drip = Framer::new(limits);
        let mut outcome = Ok(None);
        for byte in &request {
            drip.push(std::slice::from_ref(byte));
            outcome = drip.next_message();
            if outcome.is_err() {
                break;
            }
        }
        assert_eq!(outcome, Err(ProtocolError::RequestTooLarge { limit: 64 }));
    }

    #[test]
    fn chunk_terminator_counts_toward_limit() {
        // Head is 47 bytes, chunk line 4, data 13: exactly 64 before the CRLF.
        let mut framer = Framer::new(FramerLimits {
            max_buffered_bytes: 64,
            max_headers: 10,
        });
        framer.push(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\nd\r\n0123456789abc\r\n0\r\n\r\n");
        assert_eq!(
            framer.next_message(),
            Err(ProtocolError::RequestTooLarge { limit: 64 })
        );
    }

    #[test]
    fn message_exactly_at_limit_is_accepted() {
        let request = b"GET /x HTTP/1.1\r\nHost: a\r\n\r\n";
        let mut framer = Framer::new(FramerLimits {
            max_buffered_bytes: request.len(),
            max_headers: 10,
        });
        framer.push(request);
        assert!(framer.next_message().unwrap().is_some());
    }

    #[test]
    fn too_many_headers() {
        let mut framer = Framer::new(FramerLimits {
            max_buffered_bytes: 1024,
            max_headers: 2,
        });
        framer.push(b"GET / HTTP/1.1\r\nA: 1\r\nB: 2\r\nC: 3\r\n\r\n");
        assert_eq!(
            framer.next_message(),
            Err(ProtocolError::TooManyHeaders { limit: 2 })
        );
    }

    #[test]
    fn finish_reports_truncation() {
        let mut framer = framer();
        framer.push(b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc");
        assert!(framer.next_message().unwrap().is_none());
        assert_eq!(
            framer.finish(),
            Err(ProtocolError::BodyLengthMismatch {
                expected: 10,
                received: 3
            })
        );

        let mut framer = Framer::default();
        framer.push(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nab");
        assert!(matches!(framer.finish(), Err(ProtocolError::ChunkFormatError(_))));

        let mut framer = Framer::default();
        framer.push(b"GET / HTTP/1.1\r\nHost");
        assert!(matches!(framer.finish(), Err(ProtocolError::MalformedHeader(_))));

        let mut framer = Framer::default();
        framer.push(b"GET / HT");
        assert!(matches!(framer.finish(), Err(ProtocolError::MalformedStartLine(_))));
    }

    #[test]
    fn finish_on_clean_boundary() {
        let mut framer = framer();
        framer.push(b"GET / HTTP/1.1\r\n\r\n\r\n");
        assert!(framer.finish().unwrap().is_some());
        assert_eq!(framer.finish(), Ok(None));
    }

    #[test]
    fn until_close_body_completes_at_end_of_stream() {
        let mut framer = framer();
        framer.push(b"POST / HTTP/1.1\r\nTransfer-Encoding: gzip\r\n\r\nraw");
        assert!(framer.next_message().unwrap().is_none());
        framer.push(b" bytes");
        assert!(framer.next_message().unwrap().is_none());

        let message = framer.finish().unwrap().unwrap();
        assert_eq!(message.policy(), BodyPolicy::UntilClose);
        assert_eq!(message.body().as_ref(), b"raw bytes");
        assert!(!message.keep_alive());
    }

    #[test]
    fn expect_continue_is_flagged_once() {
        let mut framer = framer();
        framer.push(b"POST / HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: 2\r\n\r\n");
        assert!(framer.next_message().unwrap().is_none());
        assert!(framer.take_continue());
        assert!(!framer.take_continue());

        framer.push(b"ok");
        assert!(framer.next_message().unwrap().is_some());
    }

    #[test]
    fn expect_continue_ignored_without_body() {
        let mut framer = framer();
        framer.push(b"GET / HTTP/1.1\r\nExpect: 100-continue\r\n\r\n");
        assert!(framer.next_message().unwrap().is_some());
        assert!(!framer.take_continue());
    }
}
