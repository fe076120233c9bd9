//! Body decoding by declared content type.
//!
//! # Responsibilities
//! - Pick a representation from the `Content-Type` media type
//! - Deserialize structured bodies in a single pass, either into a generic
//!   tree or into a caller-chosen shape
//! - Tell malformed input apart from well-formed input of the wrong shape
//!
//! Decoding is pure: it only reads the message and never performs I/O.

use std::net::SocketAddr;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::DecodeError;
use crate::http::request::Message;

/// A decoded body.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// The message carried no body bytes.
    Empty,
    /// `application/json` or any `+json` media type.
    Json(Value),
    /// `application/x-www-form-urlencoded`, pairs in arrival order.
    Form(Vec<(String, String)>),
    /// `text/*` in UTF-8.
    Text(String),
    /// Anything else, untouched.
    Bytes(Bytes),
}

/// Media type classes the decoder understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MediaKind {
    Json,
    Form,
    Text,
    Other,
}

#[derive(Debug)]
struct MediaType {
    kind: MediaKind,
    charset: Option<String>,
}

impl MediaType {
    fn of(message: &Message) -> Self {
        let Some(raw) = message.content_type() else {
            return Self {
                kind: MediaKind::Other,
                charset: None,
            };
        };

        let mut params = raw.split(';');
        let essence = params.next().unwrap_or_default().trim().to_ascii_lowercase();
        let charset = params.find_map(|param| {
            let (name, value) = param.split_once('=')?;
            name.trim()
                .eq_ignore_ascii_case("charset")
                .then(|| value.trim().trim_matches('"').to_ascii_lowercase())
        });

        let kind = if essence == "application/json" || essence.ends_with("+json") {
            MediaKind::Json
        } else if essence == "application/x-www-form-urlencoded" {
            MediaKind::Form
        } else if essence.starts_with("text/") {
            MediaKind::Text
        } else {
            MediaKind::Other
        };

        Self { kind, charset }
    }
}

/// Decode a complete message into a generic value.
pub fn decode(message: &Message) -> Result<Body, DecodeError> {
    let body = message.body();
    if body.is_empty() {
        return Ok(Body::Empty);
    }

    let media = MediaType::of(message);
    match media.kind {
        MediaKind::Json => serde_json::from_slice(body).map(Body::Json).map_err(classify),
        MediaKind::Form => form_pairs(body).map(Body::Form),
        MediaKind::Text => text(body, media.charset.as_deref()).map(Body::Text),
        MediaKind::Other => Ok(Body::Bytes(body.clone())),
    }
}

/// Decode a JSON or form body straight into `T`.
///
/// An empty body is presented to `T` as `null`, so `Option<_>` shapes accept it.
pub fn decode_as<T: DeserializeOwned>(message: &Message) -> Result<T, DecodeError> {
    let body = message.body();
    if body.is_empty() {
        return serde_json::from_value(Value::Null).map_err(classify);
    }

    let media = MediaType::of(message);
    match media.kind {
        MediaKind::Json => serde_json::from_slice(body).map_err(classify),
        MediaKind::Form => {
            let tree = form_tree(form_pairs(body)?);
            serde_json::from_value(tree).map_err(classify)
        }
        MediaKind::Text => {
            let text = text(body, media.charset.as_deref())?;
            serde_json::from_value(Value::String(text)).map_err(classify)
        }
        MediaKind::Other => Err(DecodeError::Unsupported(format!(
            "cannot deserialize a {} body",
            message.content_type().unwrap_or("untyped")
        ))),
    }
}

fn classify(err: serde_json::Error) -> DecodeError {
    use serde_json::error::Category;

    match err.classify() {
        Category::Data => DecodeError::TypeMismatch(err.to_string()),
        Category::Syntax | Category::Eof | Category::Io => DecodeError::Syntax(err.to_string()),
    }
}

fn form_pairs(body: &[u8]) -> Result<Vec<(String, String)>, DecodeError> {
    std::str::from_utf8(body)
        .map_err(|e| DecodeError::Syntax(format!("form body is not UTF-8: {e}")))?;
    Ok(url::form_urlencoded::parse(body).into_owned().collect())
}

/// Repeated keys become arrays, in order.
fn form_tree(pairs: Vec<(String, String)>) -> Value {
    let mut map = Map::new();
    for (key, value) in pairs {
        match map.get_mut(&key) {
            None => {
                map.insert(key, Value::String(value));
            }
            Some(Value::Array(items)) => items.push(Value::String(value)),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::String(value)]);
            }
        }
    }
    Value::Object(map)
}

fn text(body: &[u8], charset: Option<&str>) -> Result<String, DecodeError> {
    match charset {
        None | Some("utf-8" | "utf8" | "us-ascii") => {}
        Some(other) => {
            return Err(DecodeError::Unsupported(format!("charset {other}")));
        }
    }
    String::from_utf8(body.to_vec())
        .map_err(|e| DecodeError::Syntax(format!("text body is not UTF-8: {e}")))
}

/// A complete message plus the outcome of decoding its body.
///
/// Built once per message, after the message is complete. A failed decode
/// is carried to the handler rather than failing the connection.
#[derive(Debug, Clone)]
pub struct DecodedRequest {
    id: Uuid,
    peer_addr: SocketAddr,
    message: Message,
    body: Result<Body, DecodeError>,
}

impl DecodedRequest {
    pub fn new(message: Message, peer_addr: SocketAddr) -> Self {
        let body = decode(&message);
        Self {
            id: Uuid::new_v4(),
            peer_addr,
            message,
            body,
        }
    }

    /// Request id, echoed as `x-request-id`.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn body(&self) -> Result<&Body, &DecodeError> {
        self.body.as_ref()
    }

    /// Deserialize the body into a caller-chosen shape.
    pub fn decode_as<T: DeserializeOwned>(&self) -> Result<T, DecodeError> {
        decode_as(&self.message)
    }

    pub fn into_message(self) -> Message {
        self.message
    }
}
