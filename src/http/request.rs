//! Framed request model.
//!
//! # Responsibilities
//! - Hold the framed but undecoded unit (start line, headers, body)
//! - Case-insensitive header lookup with duplicates preserved in order
//! - Connection-management decisions derived from version and headers

use bytes::Bytes;

/// Protocol version from the start line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "HTTP/1.1" => Some(Version::Http11),
            "HTTP/1.0" => Some(Version::Http10),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered header fields. Names compare case-insensitively; duplicates are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field after all existing ones.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replace every field called `name` with a single one.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.entries.push((name, value.into()));
    }

    /// Remove every field called `name`, returning how many were removed.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        before - self.entries.len()
    }

    /// First value of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).next()
    }

    /// Every value of `name`, in arrival order.
    pub fn get_all<'a: 'b, 'b>(&'a self, name: &'b str) -> impl Iterator<Item = &'a str> + 'b {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Whether any comma-separated element of any `name` field equals `token`
    /// (case-insensitive), e.g. `Connection: keep-alive, Upgrade`.
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name)
            .flat_map(|value| value.split(','))
            .any(|item| item.trim().eq_ignore_ascii_case(token))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// How the end of a message body is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyPolicy {
    /// Exactly this many bytes follow the header section (0 = no body).
    Fixed(usize),
    /// Size-prefixed segments ending with a zero-size chunk.
    Chunked,
    /// Everything until the peer closes its write side.
    UntilClose,
}

/// A complete framed message. Only produced once its whole body has arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    method: String,
    target: String,
    version: Version,
    headers: Headers,
    trailers: Headers,
    policy: BodyPolicy,
    body: Bytes,
}

impl Message {
    /// A body-less message; chain `with_header`/`with_body` to fill it in.
    pub fn new(method: impl Into<String>, target: impl Into<String>, version: Version) -> Self {
        Self {
            method: method.into(),
            target: target.into(),
            version,
            headers: Headers::new(),
            trailers: Headers::new(),
            policy: BodyPolicy::Fixed(0),
            body: Bytes::new(),
        }
    }

    pub(crate) fn from_parts(
        method: String,
        target: String,
        version: Version,
        headers: Headers,
        trailers: Headers,
        policy: BodyPolicy,
        body: Bytes,
    ) -> Self {
        Self {
            method,
            target,
            version,
            headers,
            trailers,
            policy,
            body,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Attach a fixed-length body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self.policy = BodyPolicy::Fixed(self.body.len());
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Target without the query string.
    pub fn path(&self) -> &str {
        self.target
            .split_once('?')
            .map_or(self.target.as_str(), |(path, _)| path)
    }

    /// Query string without the leading `?`.
    pub fn query(&self) -> Option<&str> {
        self.target.split_once('?').map(|(_, query)| query)
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Trailer fields sent after a chunked body.
    pub fn trailers(&self) -> &Headers {
        &self.trailers
    }

    pub fn policy(&self) -> BodyPolicy {
        self.policy
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type")
    }

    /// Whether the client allows another message on this connection.
    pub fn keep_alive(&self) -> bool {
        if self.policy == BodyPolicy::UntilClose {
            return false;
        }
        match self.version {
            Version::Http11 => !self.headers.has_token("connection", "close"),
            Version::Http10 => self.headers.has_token("connection", "keep-alive"),
        }
    }
}
