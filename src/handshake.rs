//! # Handshake
//!
//! Server half of the opening handshake ([RFC 6455 Section 4.2](https://datatracker.ietf.org/doc/html/rfc6455#section-4.2)).
//!
//! A client asks for the upgrade with a request like:
//!
//! ```text
//! GET /chat HTTP/1.1
//! Host: example.com:3210
//! Upgrade: websocket
//! Connection: Upgrade
//! Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==
//! Sec-WebSocket-Protocol: chat, json
//! ```
//!
//! and the server answers with:
//!
//! ```text
//! HTTP/1.1 101 Web Socket Protocol Handshake
//! Upgrade: WebSocket
//! Connection: Upgrade
//! Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=
//! Sec-WebSocket-Protocol: json
//! ```
//!
//! Everything in this module is pure: it parses bytes and formats strings, and the
//! caller writes the result to the transport.
use std::fmt;

use base64::prelude::*;
use nom::{
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{crlf, space0, space1},
    multi::many0,
    sequence::{preceded, separated_pair, terminated},
    IResult, Parser,
};
use sha1::{Digest, Sha1};

use crate::{Result, WebSocketError};

/// WebSocket GUID appended to the client key before hashing.
pub const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Status line and blank line sent when the upgrade request is rejected.
pub const REJECT_RESPONSE: &[u8] = b"HTTP/1.1 400 Bad Request\r\n\r\n";

const SEC_WEBSOCKET_KEY: &str = "Sec-WebSocket-Key";
const SEC_WEBSOCKET_PROTOCOL: &str = "Sec-WebSocket-Protocol";
const UPGRADE: &str = "Upgrade";

/// Derives the `Sec-WebSocket-Accept` token from the client's `Sec-WebSocket-Key`.
///
/// The key is hashed exactly as received, without decoding it first.
///
/// ```
/// use frameline::handshake::accept_key;
/// assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
pub fn accept_key(key: impl AsRef<[u8]>) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_ref());
    sha1.update(GUID.as_bytes());
    let result = sha1.finalize();
    BASE64_STANDARD.encode(&result[..])
}

/// Returns the length of the request head in `buf`, blank line included, or `None`
/// if the head is not complete yet.
pub fn head_len(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

/// A parsed HTTP request head: request line and header fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub path: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    /// Parses a complete request head, terminated by an empty line.
    ///
    /// # Errors
    /// [`WebSocketError::BadRequest`] if the head is not valid UTF-8 or not well formed.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let input = std::str::from_utf8(buf)
            .map_err(|_| WebSocketError::BadRequest("request head is not valid UTF-8"))?;

        let (_, ((method, path, version), headers)) = request_head(input)
            .map_err(|_| WebSocketError::BadRequest("malformed request head"))?;

        Ok(Self {
            method: method.to_owned(),
            path: path.to_owned(),
            version: version.to_owned(),
            headers: headers
                .into_iter()
                .map(|(name, value)| (name.to_owned(), value.trim().to_owned()))
                .collect(),
        })
    }

    /// Returns the first value of header `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns every value of header `name`, in the order they appear.
    pub fn headers_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

fn is_token(c: char) -> bool {
    c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~".contains(c)
}

fn request_line(input: &str) -> IResult<&str, (&str, &str, &str)> {
    (
        terminated(take_while1(is_token), space1),
        terminated(take_while1(|c: char| !c.is_ascii_whitespace()), space1),
        terminated(
            preceded(
                tag("HTTP/"),
                take_while1(|c: char| c.is_ascii_digit() || c == '.'),
            ),
            crlf,
        ),
    )
        .parse(input)
}

fn header_line(input: &str) -> IResult<&str, (&str, &str)> {
    terminated(
        separated_pair(
            take_while1(is_token),
            (tag(":"), space0),
            take_while(|c: char| c != '\r' && c != '\n'),
        ),
        crlf,
    )
    .parse(input)
}

#[allow(clippy::type_complexity)]
fn request_head(input: &str) -> IResult<&str, ((&str, &str, &str), Vec<(&str, &str)>)> {
    terminated((request_line, many0(header_line)), crlf).parse(input)
}

/// What the client asked for in its upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// Request target, e.g. `/chat`.
    pub path: String,
    /// Value of `Sec-WebSocket-Key`, as sent.
    pub key: String,
    /// Requested subprotocols, in the client's order of preference.
    pub protocols: Vec<String>,
}

impl HandshakeRequest {
    /// Parses a raw request head and extracts the handshake fields.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        Self::try_from(&RequestHead::parse(buf)?)
    }
}

impl TryFrom<&RequestHead> for HandshakeRequest {
    type Error = WebSocketError;

    /// Validates that `head` asks for a WebSocket upgrade.
    ///
    /// # Errors
    /// [`WebSocketError::BadRequest`] if `Upgrade` does not name `websocket` or the key is missing.
    fn try_from(head: &RequestHead) -> Result<Self> {
        let upgrade = head
            .header(UPGRADE)
            .ok_or(WebSocketError::BadRequest("missing Upgrade header"))?;
        if !upgrade
            .split(',')
            .any(|proto| proto.trim().eq_ignore_ascii_case("websocket"))
        {
            return Err(WebSocketError::BadRequest("Upgrade is not websocket"));
        }

        let key = head
            .header(SEC_WEBSOCKET_KEY)
            .filter(|key| !key.is_empty())
            .ok_or(WebSocketError::BadRequest("missing Sec-WebSocket-Key header"))?;

        let protocols = head
            .headers_all(SEC_WEBSOCKET_PROTOCOL)
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .filter(|proto| !proto.is_empty())
            .map(str::to_owned)
            .collect();

        Ok(Self {
            path: head.path.clone(),
            key: key.to_owned(),
            protocols,
        })
    }
}

/// The server's answer to an accepted upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// `Sec-WebSocket-Accept` token derived from the client key.
    pub accept: String,
    /// Selected subprotocol, always one the client asked for.
    pub protocol: Option<String>,
}

impl HandshakeResponse {
    /// Builds the response for `request`, picking the first requested subprotocol that
    /// appears in `supported`.
    pub fn negotiate<S: AsRef<str>>(request: &HandshakeRequest, supported: &[S]) -> Self {
        let protocol = request
            .protocols
            .iter()
            .find(|proto| supported.iter().any(|s| s.as_ref() == proto.as_str()))
            .cloned();

        Self {
            accept: accept_key(&request.key),
            protocol,
        }
    }
}

impl fmt::Display for HandshakeResponse {
    /// Writes the response head exactly as it goes on the wire, blank line included.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP/1.1 101 Web Socket Protocol Handshake\r\n")?;
        write!(f, "Upgrade: WebSocket\r\n")?;
        write!(f, "Connection: Upgrade\r\n")?;
        write!(f, "Sec-WebSocket-Accept: {}\r\n", self.accept)?;
        if let Some(protocol) = &self.protocol {
            write!(f, "{}: {}\r\n", SEC_WEBSOCKET_PROTOCOL, protocol)?;
        }
        write!(f, "\r\n")
    }
}

/// Parses the request head in `buf` and negotiates the response in one go.
pub fn negotiate<S: AsRef<str>>(buf: &[u8], supported: &[S]) -> Result<HandshakeResponse> {
    let request = HandshakeRequest::parse(buf)?;
    log::debug!("upgrade requested for {}", request.path);
    Ok(HandshakeResponse::negotiate(&request, supported))
}
