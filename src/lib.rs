//! # frameline
//! Server side of a text-only WebSocket channel (RFC 6455 subset) layered on top of
//! an existing byte stream.
//!
//! The crate is split into a sans-io protocol core and a thin tokio driver:
//!
//! - [`handshake`]: parses the HTTP upgrade request, derives the `Sec-WebSocket-Accept`
//!   token and negotiates a subprotocol from a configured set.
//! - [`codec`]: decodes one inbound frame from a complete buffer and encodes outbound
//!   text frames. A streaming [`codec::Decoder`] accumulates bytes until a full frame
//!   is available.
//! - [`session`]: the per-connection state machine (`Handshaking → Open → Closed`).
//! - [`server`]: accepts TCP connections and runs one session per connection,
//!   handing every decoded text message to a [`Handler`].
//!
//! # Scope
//! Only unfragmented text frames are surfaced. Close frames end the session, while
//! binary, ping, pong and continuation frames are ignored. Payloads that need the
//! 64-bit extended length are rejected, and outbound frames are never masked.
//!
//! # Example
//! ```no_run
//! use frameline::{Options, Server};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> frameline::Result<()> {
//!     let server = Server::bind("127.0.0.1:3210", Options::default()).await?;
//!     server
//!         .run(|text: &str| {
//!             log::info!("{text}");
//!             Some(json!({ "message": "Hello from the server!" }))
//!         })
//!         .await
//! }
//! ```
//!
//! # Features
//! - `simd`: validates inbound text payloads with `simdutf8`.
//! - `cli`: builds the `frameline` binary.

pub mod codec;
pub mod frame;
pub mod handshake;
mod mask;
mod options;
pub mod server;
pub mod session;

use thiserror::Error;

pub use frame::{Decoded, Frame, OpCode};
pub use options::Options;
pub use server::{Handler, Server};
pub use session::{Action, Session, State};

/// A result type for WebSocket operations, using `WebSocketError` as the error type.
pub type Result<T> = std::result::Result<T, WebSocketError>;

/// Represents errors that can occur while negotiating or running a connection.
///
/// Every variant is terminal for the connection it occurred on; nothing is retried
/// internally.
#[derive(Error, Debug)]
pub enum WebSocketError {
    /// The upgrade request is malformed or does not ask for the WebSocket protocol.
    /// The connection is rejected with a `400 Bad Request` status line.
    #[error("Bad request: {0}")]
    BadRequest(&'static str),

    /// Reserved bits in the frame header are set when they should be 0.
    #[error("Reserved bits are not zero")]
    ProtocolViolation,

    /// The buffer ends before the header or the declared payload length.
    #[error("Truncated frame")]
    TruncatedFrame,

    /// Inbound frame uses the 64-bit extended length or exceeds the configured
    /// maximum, or an outbound payload does not fit in 16 bits.
    #[error("Payload too large")]
    PayloadTooLarge,

    /// A text frame contains invalid UTF-8 data.
    #[error("Invalid UTF-8")]
    InvalidUTF8,

    /// Returned when feeding bytes to, or sending on, a closed session.
    #[error("Connection is closed")]
    ConnectionClosed,

    /// The peer sent nothing within the configured idle timeout.
    #[error("Connection timed out")]
    Timeout,

    /// Wraps standard I/O errors from the underlying transport.
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// Occurs when serialization of a JSON reply fails.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
